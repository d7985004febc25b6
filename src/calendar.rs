//! Calendar adapter: [`TravelRecord`] → calendar event id, or nothing.
//!
//! The extraction pipeline never fails because of the calendar. Every
//! calendar error is logged and turned into `None` by
//! [`add_record_to_calendar`]; the record is still returned to the caller.
//!
//! ## Time handling
//!
//! Record dates are naive local times exactly as printed on the ticket. They
//! are sent to the calendar unchanged together with an IANA zone name, so the
//! calendar does the only conversion that ever happens. The zone comes from a
//! small keyword table over the record's location; unlisted places fall back
//! to the service's default zone.

use crate::config::CalendarConfig;
use crate::document::{parse_naive, TravelRecord};
use crate::error::CalendarError;
use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

/// Title used when the model could not name the trip.
pub const DEFAULT_TITLE: &str = "Travel Event";

/// Location keyword → IANA zone. Matched case-insensitively, first hit wins.
const TIMEZONE_TABLE: &[(&str, &str)] = &[
    ("münchen", "Europe/Berlin"),
    ("munich", "Europe/Berlin"),
    ("memmingen", "Europe/Berlin"),
    ("berlin", "Europe/Berlin"),
    ("frankfurt", "Europe/Berlin"),
    ("paris", "Europe/Paris"),
    ("london", "Europe/London"),
    ("vienna", "Europe/Vienna"),
    ("wien", "Europe/Vienna"),
    ("zurich", "Europe/Zurich"),
    ("zürich", "Europe/Zurich"),
    ("rome", "Europe/Rome"),
    ("madrid", "Europe/Madrid"),
    ("amsterdam", "Europe/Amsterdam"),
    ("warsaw", "Europe/Warsaw"),
    ("kraków", "Europe/Warsaw"),
    ("krakow", "Europe/Warsaw"),
    ("budapest", "Europe/Budapest"),
    ("new york", "America/New_York"),
];

/// Zone for a free-text location, if the table knows it.
pub fn timezone_for(location: &str) -> Option<&'static str> {
    let location = location.to_lowercase();
    TIMEZONE_TABLE
        .iter()
        .find(|(keyword, _)| location.contains(keyword))
        .map(|(_, zone)| *zone)
}

/// A calendar-ready event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub summary: String,
    pub location: String,
    pub description: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub timezone: String,
}

impl CalendarEvent {
    /// Convert a record, defaulting a missing end to start + 1 h.
    pub fn from_record(record: &TravelRecord, default_timezone: &str) -> Result<Self, CalendarError> {
        let start = parse_naive(&record.start_date).ok_or_else(|| CalendarError::InvalidDate {
            value: record.start_date.clone(),
            detail: "start_date is not an ISO-8601 datetime".into(),
        })?;
        let end = match record.end_date.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(raw) => parse_naive(raw).ok_or_else(|| CalendarError::InvalidDate {
                value: raw.to_string(),
                detail: "end_date is not an ISO-8601 datetime".into(),
            })?,
            None => start + Duration::hours(1),
        };

        let timezone = timezone_for(&record.location)
            .unwrap_or(default_timezone)
            .to_string();

        let summary = if record.title.trim().is_empty() {
            DEFAULT_TITLE.to_string()
        } else {
            record.title.clone()
        };

        Ok(Self {
            summary,
            location: record.location.clone(),
            description: record.description.clone(),
            start,
            end,
            timezone,
        })
    }

    /// Calendar v3 request body.
    pub fn to_google_json(&self) -> serde_json::Value {
        let fmt = "%Y-%m-%dT%H:%M:%S";
        json!({
            "summary": self.summary,
            "location": self.location,
            "description": self.description,
            "start": { "dateTime": self.start.format(fmt).to_string(), "timeZone": self.timezone },
            "end":   { "dateTime": self.end.format(fmt).to_string(),   "timeZone": self.timezone },
        })
    }
}

/// Creates events in a calendar.
#[async_trait]
pub trait CalendarService: Send + Sync {
    /// Create the event and return its id.
    async fn create_event(&self, event: &CalendarEvent) -> Result<String, CalendarError>;

    /// Zone for locations the keyword table does not know.
    fn default_timezone(&self) -> &str {
        "UTC"
    }
}

/// Add a record to the calendar; `None` on any failure.
pub async fn add_record_to_calendar(
    service: &dyn CalendarService,
    record: &TravelRecord,
) -> Option<String> {
    let event = match CalendarEvent::from_record(record, service.default_timezone()) {
        Ok(e) => e,
        Err(e) => {
            warn!("Skipping calendar event for '{}': {}", record.title, e);
            return None;
        }
    };

    match service.create_event(&event).await {
        Ok(id) => {
            info!("Calendar event {} created for '{}'", id, event.summary);
            Some(id)
        }
        Err(e) => {
            warn!("Calendar event for '{}' failed: {}", event.summary, e);
            None
        }
    }
}

// ── Google Calendar ──────────────────────────────────────────────────────

/// Calendar v3 REST client using a caller-supplied OAuth access token.
pub struct GoogleCalendarClient {
    http: reqwest::Client,
    config: CalendarConfig,
}

#[derive(Deserialize)]
struct CreatedEvent {
    id: String,
}

impl GoogleCalendarClient {
    pub fn new(config: CalendarConfig) -> Result<Self, CalendarError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CalendarError::Http(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn events_url(&self) -> String {
        format!(
            "{}/calendars/{}/events",
            self.config.api_base.trim_end_matches('/'),
            urlencoding::encode(&self.config.calendar_id)
        )
    }
}

#[async_trait]
impl CalendarService for GoogleCalendarClient {
    async fn create_event(&self, event: &CalendarEvent) -> Result<String, CalendarError> {
        let token = self
            .config
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                CalendarError::NotAuthorised("set GOOGLE_CALENDAR_ACCESS_TOKEN".into())
            })?;

        let response = self
            .http
            .post(self.events_url())
            .bearer_auth(token)
            .json(&event.to_google_json())
            .send()
            .await
            .map_err(|e| CalendarError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let created: CreatedEvent = response
            .json()
            .await
            .map_err(|e| CalendarError::Http(format!("unexpected response: {e}")))?;
        Ok(created.id)
    }

    fn default_timezone(&self) -> &str {
        &self.config.default_timezone
    }
}
