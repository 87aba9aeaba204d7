//! Job identity and listing types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A map id assigned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapId(pub u32);

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which operation a job performs.
///
/// Every kind except `FreeMap` is one request/response exchange with the
/// backend. `FreeMap` only releases engine resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobKind {
    ListJobs,
    Construct,
    LoadMap,
    FreeMap,
    DeleteMap,
    RestoreMapImages,
    ClearWorkspace,
    StatusPoll,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ListJobs => "list-jobs",
            Self::Construct => "construct",
            Self::LoadMap => "load-map",
            Self::FreeMap => "free-map",
            Self::DeleteMap => "delete-map",
            Self::RestoreMapImages => "restore-map-images",
            Self::ClearWorkspace => "clear-workspace",
            Self::StatusPoll => "status-poll",
        };
        f.write_str(name)
    }
}

/// Where a map stands in the backend's construction pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MapStatus {
    Pending,
    Processing,
    Done,
    Failed,
    Unknown,
}

impl MapStatus {
    /// Parse the backend's status string. Unrecognized values map to `Unknown`.
    pub fn from_wire(status: &str) -> Self {
        match status {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "done" => Self::Done,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// One entry of a job listing: a map the backend has built or is building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: MapId,
    pub name: String,
    pub status: MapStatus,

    /// Number of source images the map was built from.
    pub image_count: u32,

    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub created: String,
    pub modified: String,

    /// SHA-256 of the map payload as reported by the backend.
    pub checksum: String,
}
