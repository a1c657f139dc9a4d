//! `status` responses.

use serde::{Deserialize, Serialize};

use crate::error::RequestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Success,
    Failure,
}

/// A `status` message: the response to a correlated request, or an
/// unsolicited notice (e.g. the feed closing the connection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub status_code: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub connection_closed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections_available: Option<u32>,
}

impl StatusMessage {
    pub fn success(id: u64) -> Self {
        Self {
            id: Some(id),
            status_code: StatusCode::Success,
            error_code: None,
            error_message: None,
            connection_closed: false,
            connection_id: None,
            connections_available: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == StatusCode::Success
    }

    /// Map a response to `Ok(self)` on success, `RequestError::Rejected` otherwise.
    pub fn into_result(self) -> Result<Self, RequestError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(RequestError::Rejected {
                id: self.id.unwrap_or_default(),
                error_code: self.error_code,
                error_message: self.error_message,
            })
        }
    }
}
