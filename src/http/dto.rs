//! JSON view-model mapping for the HTTP/WS surface (SPEC_FULL.md §6).
//! Trivial by design; waived from the design ledger.

use crate::model::Generation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct GenerationOut {
    pub id: String,
    #[serde(rename = "type")]
    pub feed_type: String,
    pub progress: u32,
    pub data_fetched: bool,
    pub files_uploaded: u32,
    pub is_canceled: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<&Generation> for GenerationOut {
    fn from(g: &Generation) -> Self {
        Self {
            id: g.id.clone(),
            feed_type: g.feed_type.clone(),
            progress: g.progress,
            data_fetched: g.data_fetched,
            files_uploaded: g.files_uploaded,
            is_canceled: g.is_canceled,
            start_time: g.start_time,
            end_time: g.end_time,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleIn {
    pub start_timestamp: DateTime<Utc>,
    pub delay_interval: i64,
}

#[derive(Debug, Serialize)]
pub struct ScheduleOut {
    pub start_timestamp: DateTime<Utc>,
    pub delay_interval: i64,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub details: String,
}
