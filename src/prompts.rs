//! Instruction prompts for travel-document extraction.
//!
//! All prompt text lives here so the orchestrator only decides *which*
//! prompt to send and unit tests can inspect the wording without a model.
//!
//! Two branches exist because the model sees different inputs:
//!
//! * **text mode**: the PDF's own text layer is embedded in the prompt;
//! * **image mode**: the canonical bitmap travels as an attachment and the
//!   prompt only carries instructions.
//!
//! Both ask for the same JSON shape so a single parser handles either reply.

use crate::document::ExtractedText;

/// The JSON contract and the time-handling rules shared by both modes.
const RECORD_CONTRACT: &str = r#"Return the information in exactly this JSON shape:
{
    "title": "[Type] from [departure] to [destination], e.g. 'Flight from Memmingen to Kraków'",
    "start_date": "YYYY-MM-DDTHH:MM:SS — the TRAVEL date and departure/check-in time as printed",
    "end_date": "YYYY-MM-DDTHH:MM:SS — arrival/check-out as printed, or null",
    "location": "Destination with the full details written on the document (station, terminal, address)",
    "description": "Type, company, ticket/booking/order numbers, full route, passenger names and contacts, passenger count, price, invoice date, and every note or condition"
}

TIME RULES:
- Copy times exactly as printed. "Departure 07:00" on "14 / Dec / 2025" is "2025-12-14T07:00:00".
- Never convert timezones and never add or subtract hours.
- Use the travel date, not the invoice or booking date.
- Do not append "Z" or an offset.

CONTENT RULES:
- If the document is not in English, translate everything to English first.
- Use null for anything you cannot find.
- Return ONLY the JSON object, no commentary."#;

/// Image-mode instruction; the bitmap is attached to the same message.
pub const IMAGE_PROMPT: &str = r#"Extract travel information from this document. It may be a flight, bus or train ticket, a boarding pass, a hotel reservation or another travel document.

Read it carefully and look for:
- Passenger names, flight/train/bus numbers, ticket numbers, booking references, PNRs
- Departure and destination with full details (airport, terminal, station, street address)
- Travel date, departure time, arrival time
- Hotel name, check-in and check-out dates, address
- Company or carrier name, seat, gate, price, important notes"#;

/// Text-mode instruction; the document text is inserted below it.
pub const TEXT_PROMPT_HEADER: &str =
    "Extract travel information from this travel document text:";

/// Build the text-mode prompt around the PDF text layer.
pub fn text_prompt(document_text: &str) -> String {
    format!(
        "{TEXT_PROMPT_HEADER}\n\n\"\"\"\n{}\n\"\"\"\n\n{RECORD_CONTRACT}",
        document_text.trim()
    )
}

/// Build the image-mode prompt, optionally prefixed with OCR context.
///
/// OCR text is only used when it passed
/// [`ExtractedText::passes_quality_gate`]; otherwise the model would be
/// steered by noise.
pub fn image_prompt(ocr: Option<&ExtractedText>) -> String {
    let mut prompt = String::new();
    if let Some(ocr) = ocr.filter(|o| o.passes_quality_gate()) {
        prompt.push_str(&ocr_context(ocr));
        prompt.push_str("\n\n");
    }
    prompt.push_str(IMAGE_PROMPT);
    prompt.push_str("\n\n");
    prompt.push_str(RECORD_CONTRACT);
    prompt
}

/// Supplementary context block carrying OCR output.
pub fn ocr_context(ocr: &ExtractedText) -> String {
    format!(
        "Text recognised on the document by OCR (confidence {:.0}%). Use it to \
         double-check small print, but trust the image when they disagree:\n\"\"\"\n{}\n\"\"\"",
        ocr.confidence,
        ocr.text.trim()
    )
}
