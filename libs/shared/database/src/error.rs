use serde::Deserialize;
use thiserror::Error;

/// Postgres SQLSTATE for a unique constraint violation.
pub const UNIQUE_VIOLATION: &str = "23505";
/// Postgres SQLSTATE for a foreign key violation.
pub const FOREIGN_KEY_VIOLATION: &str = "23503";
/// PostgREST code for "no rows returned" on a singular request.
pub const NO_ROWS: &str = "PGRST116";

#[derive(Error, Debug)]
pub enum DatabaseError {
    /// The database could not be reached: refused, timed out, dropped mid-flight,
    /// or the gateway in front of it reported it unavailable.
    #[error("Database unreachable: {0}")]
    Connectivity(String),

    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Request error: {0}")]
    Request(String),
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

impl DatabaseError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, DatabaseError::Connectivity(_))
    }

    /// SQLSTATE or PostgREST error code, when the server supplied one.
    pub fn code(&self) -> Option<&str> {
        match self {
            DatabaseError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DatabaseError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify a non-success HTTP response from PostgREST.
    pub fn from_response(status: u16, body: &str) -> Self {
        if matches!(status, 502 | 503 | 504) {
            return DatabaseError::Connectivity(format!("gateway returned {}: {}", status, body));
        }

        match serde_json::from_str::<PostgrestErrorBody>(body) {
            Ok(parsed) => {
                let message = match (parsed.message, parsed.details) {
                    (Some(message), Some(details)) => format!("{} ({})", message, details),
                    (Some(message), None) => message,
                    (None, Some(details)) => details,
                    (None, None) => body.to_string(),
                };
                DatabaseError::Api { status, code: parsed.code, message }
            }
            Err(_) => DatabaseError::Api {
                status,
                code: None,
                message: body.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for DatabaseError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_connect() || error.is_timeout() || error.is_request() || error.is_body() {
            DatabaseError::Connectivity(error.to_string())
        } else if error.is_decode() {
            DatabaseError::Serialization(error.to_string())
        } else {
            DatabaseError::Request(error.to_string())
        }
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(error: serde_json::Error) -> Self {
        DatabaseError::Serialization(error.to_string())
    }
}
