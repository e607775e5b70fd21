use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub name: String,
    pub registration_is_open: bool,
    pub start_date: String,
    pub end_date: String,
    pub city: String,
    pub date_scraped: NaiveDate,
}

impl Event {
    pub fn registration_label(&self) -> &'static str {
        if self.registration_is_open {
            "OPEN"
        } else {
            "CLOSED"
        }
    }

    /// Leading `YYYY-MM-DD` of the start date, or the raw value when shorter.
    pub fn start_day(&self) -> &str {
        day_prefix(&self.start_date)
    }

    pub fn end_day(&self) -> &str {
        day_prefix(&self.end_date)
    }
}

fn day_prefix(value: &str) -> &str {
    value.get(..10).unwrap_or(value)
}

/// An [`Event`] as persisted, with its storage timestamps.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    #[serde(flatten)]
    pub event: Event,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of the upstream `results` array before validation.
///
/// Every field is optional; a value of the wrong JSON type is treated as absent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventCandidate {
    pub id: Option<String>,
    pub name: Option<String>,
    pub registration_is_open: Option<bool>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub city: Option<String>,
}

impl EventCandidate {
    pub fn from_json(value: &Value) -> Self {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(|field| field.as_str())
                .map(str::to_string)
        };
        let id = value
            .get("id")
            .and_then(|field| match field {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|id| !id.trim().is_empty());

        Self {
            id,
            name: text("name"),
            registration_is_open: value
                .get("registrationIsOpen")
                .and_then(|field| field.as_bool()),
            start_date: text("startDate"),
            end_date: text("endDate"),
            city: text("city"),
        }
    }

    /// Checks required fields in declaration order and stamps the scrape date.
    pub fn validate(self, date_scraped: NaiveDate) -> Result<Event, ValidationError> {
        let id = self.id.clone();
        let missing = |field: &'static str| ValidationError {
            id: id.clone(),
            field,
        };

        Ok(Event {
            id: self.id.clone().ok_or_else(|| missing("id"))?,
            name: self.name.ok_or_else(|| missing("name"))?,
            registration_is_open: self
                .registration_is_open
                .ok_or_else(|| missing("registrationIsOpen"))?,
            start_date: self.start_date.ok_or_else(|| missing("startDate"))?,
            end_date: self.end_date.ok_or_else(|| missing("endDate"))?,
            city: self.city.ok_or_else(|| missing("city"))?,
            date_scraped,
        })
    }
}
