//! Response parsing: model reply text → [`TravelRecord`].
//!
//! Models are told to answer with bare JSON but regularly wrap it in a
//! Markdown fence anyway. A ```` ```json ```` fence is preferred; failing that
//! the first fence of any language is used; failing that the whole reply is
//! decoded as-is. Whatever survives must decode as a record with a usable
//! `start_date`, or the reply is [`ExtractError::MalformedResponse`].
//!
//! Parsing is terminal: a malformed reply is never sent back to the model.

use crate::document::{parse_naive, TravelRecord};
use crate::error::ExtractError;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[ \t]*json[ \t]*\r?\n?(.*?)```").unwrap());

static RE_ANY_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap());

/// Strip a Markdown code fence, preferring one tagged `json`.
pub fn strip_fences(reply: &str) -> &str {
    RE_JSON_FENCE
        .captures(reply)
        .or_else(|| RE_ANY_FENCE.captures(reply))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(reply)
        .trim()
}

/// Decode a model reply into a validated [`TravelRecord`].
///
/// The date strings are kept exactly as the model wrote them; validation
/// only checks that `start_date` parses.
pub fn parse_record(reply: &str) -> Result<TravelRecord, ExtractError> {
    let body = strip_fences(reply);
    if body.is_empty() {
        return Err(ExtractError::MalformedResponse {
            detail: "empty reply".into(),
        });
    }

    let record: TravelRecord =
        serde_json::from_str(body).map_err(|e| ExtractError::MalformedResponse {
            detail: format!("not a travel record: {e}"),
        })?;

    if parse_naive(&record.start_date).is_none() {
        return Err(ExtractError::MalformedResponse {
            detail: format!(
                "start_date '{}' is not an ISO-8601 datetime",
                record.start_date
            ),
        });
    }

    Ok(record)
}
