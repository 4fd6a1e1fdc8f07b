// 📨 API Response Envelope
//
//   { "success": true,  "data": ..., "pagination": {...}? }
//   { "success": false, "error": { "code", "message", "details"? } }
//
// Shared by the HTTP server and the API client so both sides agree on shape.

use crate::error::Error;
use crate::pagination::PageMeta;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        ErrorBody {
            code: err.code().to_string(),
            message: err.message(),
            details: None,
        }
    }
}

impl From<ErrorBody> for Error {
    fn from(body: ErrorBody) -> Self {
        Error::Remote {
            code: body.code,
            message: body.message,
        }
    }
}

/// Body of every successful DELETE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deleted {
    pub deleted: bool,
}

/// Body of `POST /auth/logout`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedOut {
    pub logged_out: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PageMeta>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            pagination: None,
        }
    }

    pub fn paged(data: T, pagination: PageMeta) -> Self {
        Self {
            pagination: Some(pagination),
            ..Self::ok(data)
        }
    }

    pub fn err(error: ErrorBody) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            pagination: None,
        }
    }

    /// Unwrap the payload, turning an error envelope back into an `Error`
    pub fn into_result(self) -> Result<T, Error> {
        match (self.success, self.data, self.error) {
            (true, Some(data), _) => Ok(data),
            (_, _, Some(error)) => Err(error.into()),
            (true, None, None) => Err(Error::Internal(
                "response envelope carried no data".to_string(),
            )),
            (false, _, None) => Err(Error::Internal(
                "error envelope carried no error body".to_string(),
            )),
        }
    }
}
