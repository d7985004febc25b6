//! MIME parsing of fetched messages.
//!
//! A part is an attachment when it has a `Content-Disposition` of
//! `attachment` or `inline` and a file name (from the disposition's
//! `filename` or the content-type's `name`). A non-multipart message whose
//! body carries a file name counts as one attachment even without a
//! disposition header. Of those, only `image/*` and `application/pdf` are
//! kept.

use super::{is_qualifying_type, Attachment, InboxMessage, Uid};
use crate::error::MailError;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use tracing::{debug, warn};

/// Parse a raw RFC 822 message.
pub fn parse_message(uid: Uid, raw: &[u8]) -> Result<InboxMessage, MailError> {
    let parsed = mailparse::parse_mail(raw).map_err(|e| MailError::protocol("parse", e))?;

    let subject = parsed
        .headers
        .get_first_value("Subject")
        .unwrap_or_else(|| "No Subject".to_string());
    let sender = parsed
        .headers
        .get_first_value("From")
        .unwrap_or_else(|| "Unknown".to_string());
    let date = parsed.headers.get_first_value("Date").unwrap_or_default();

    let mut attachments = Vec::new();
    if parsed.subparts.is_empty() {
        if let Some(a) = attachment_from(&parsed, true) {
            attachments.push(a);
        }
    } else {
        collect(&parsed, &mut attachments);
    }

    debug!(
        "Message {} '{}': {} qualifying attachment(s)",
        uid,
        subject,
        attachments.len()
    );

    Ok(InboxMessage {
        uid,
        subject,
        sender,
        date,
        attachments,
    })
}

fn collect(part: &ParsedMail<'_>, out: &mut Vec<Attachment>) {
    for sub in &part.subparts {
        if sub.subparts.is_empty() {
            if let Some(a) = attachment_from(sub, false) {
                out.push(a);
            }
        } else {
            collect(sub, out);
        }
    }
}

fn attachment_from(part: &ParsedMail<'_>, single_part: bool) -> Option<Attachment> {
    let has_disposition = part.headers.get_first_value("Content-Disposition").is_some();
    let disposition = part.get_content_disposition();
    let attachment_like = matches!(
        disposition.disposition,
        DispositionType::Attachment | DispositionType::Inline
    );
    if !single_part && !(has_disposition && attachment_like) {
        return None;
    }

    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map(|n| decode_words(n))
        .filter(|n| !n.trim().is_empty())?;

    let content_type = part.ctype.mimetype.to_ascii_lowercase();
    if !is_qualifying_type(&content_type) {
        debug!("Ignoring attachment '{}' ({})", filename, content_type);
        return None;
    }

    match part.get_body_raw() {
        Ok(bytes) => Some(Attachment {
            filename,
            content_type,
            bytes,
        }),
        Err(e) => {
            warn!("Attachment '{}' could not be decoded: {}", filename, e);
            None
        }
    }
}

/// Decode RFC 2047 encoded words that some clients put in file names.
fn decode_words(name: &str) -> String {
    if !name.contains("=?") {
        return name.to_string();
    }
    mailparse::parse_header(format!("X: {name}").as_bytes())
        .map(|(h, _)| h.get_value())
        .unwrap_or_else(|_| name.to_string())
}
