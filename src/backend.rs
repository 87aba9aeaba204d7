//! Remote backend: one request/response exchange per job kind.
//!
//! The wire protocol encodes success as an `error` string equal to `"none"`.
//! That sentinel is parsed into [`Status`] at this boundary; nothing above
//! the backend compares strings.

mod http;

pub use http::HttpBackend;

use crate::model::{Constructed, DetailLevel, GeoFilter, JobSummary, MapId, StatusReport};

/// The wire value of `error` that means success.
pub const SUCCESS_SENTINEL: &str = "none";

/// Result status of one backend exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,

    /// The backend's error code, verbatim.
    Failed(String),
}

impl Status {
    /// Parse the wire `error` field. Only the exact sentinel is success.
    pub fn from_wire(error: &str) -> Self {
        if error == SUCCESS_SENTINEL {
            Self::Ok
        } else {
            Self::Failed(error.to_string())
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Ok => Ok(()),
            Self::Failed(code) => Err(BackendError::Rejected(code)),
        }
    }
}

/// Errors from a backend exchange.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Http(u16),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("backend reported error: {0}")]
    Rejected(String),
}

pub type Result<T> = core::result::Result<T, BackendError>;

/// A map payload as served, still base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapPayload {
    pub b64: String,

    /// Hex SHA-256 of the decoded payload, as claimed by the backend.
    pub sha256: String,
}

/// The remote mapping service.
///
/// Implementations block until the exchange completes; callers run them
/// off the tick thread.
pub trait Backend: Send + Sync {
    fn list_jobs(&self, bank: u32, filter: Option<&GeoFilter>) -> Result<Vec<JobSummary>>;

    fn construct(&self, bank: u32, name: &str, detail: DetailLevel) -> Result<Constructed>;

    fn load_map(&self, id: MapId) -> Result<MapPayload>;

    fn delete_map(&self, id: MapId) -> Result<()>;

    fn restore_map_images(&self, id: MapId) -> Result<()>;

    fn clear_workspace(&self, bank: u32, delete_anchor: bool) -> Result<()>;

    fn status(&self, bank: u32) -> Result<StatusReport>;
}
