//! JSON output envelope for query results.
//!
//! Every `--json` response has the same shape so scripts can check
//! `status` before looking at `data`.

use serde::{Deserialize, Serialize};
use std::process::ExitCode;

/// Bumped when the envelope layout changes.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Query outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The subject exists; `data` may still be empty.
    Success,
    /// The subject is not a node of the network.
    NotFound,
}

impl Status {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::NotFound => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub schema_version: String,
    /// Query name, e.g. `ancestors`
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// True if a limit cut the result short
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T = serde_json::Value> {
    pub status: Status,
    pub exit_code: u8,
    pub message: String,
    /// Result payload, null when the subject was not found
    pub data: Option<T>,
    pub meta: Meta,
}

impl<T> Envelope<T> {
    pub fn success(query: &str, data: T) -> Self {
        Self {
            status: Status::Success,
            exit_code: Status::Success.exit_code(),
            message: format!("{query} query completed"),
            data: Some(data),
            meta: Meta {
                schema_version: SCHEMA_VERSION.to_string(),
                query: query.to_string(),
                subject: None,
                count: None,
                truncated: None,
            },
        }
    }

    pub fn not_found(query: &str, subject: &str) -> Self {
        Self {
            status: Status::NotFound,
            exit_code: Status::NotFound.exit_code(),
            message: format!("'{subject}' is not in the call network"),
            data: None,
            meta: Meta {
                schema_version: SCHEMA_VERSION.to_string(),
                query: query.to_string(),
                subject: Some(subject.to_string()),
                count: None,
                truncated: None,
            },
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.meta.subject = Some(subject.into());
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.meta.count = Some(count);
        self
    }

    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.meta.truncated = Some(truncated);
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error>
    where
        T: Serialize,
    {
        serde_json::to_string_pretty(self)
    }

    pub fn process_exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_code)
    }
}
