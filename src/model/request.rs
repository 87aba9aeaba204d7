//! Request: what a job asks the backend (or engine) to do.

use serde::{Deserialize, Serialize};

use crate::engine::MapHandle;

use super::{JobKind, MapId};

/// Construction detail tier, selected from a fixed set rather than a
/// continuous feature count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetailLevel {
    #[default]
    Standard,
    High,
}

impl DetailLevel {
    /// Number of features the backend extracts per image at this tier.
    pub fn feature_count(self) -> u32 {
        match self {
            Self::Standard => 600,
            Self::High => 1024,
        }
    }
}

/// Restricts a job listing to maps near a point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoFilter {
    pub latitude: f64,
    pub longitude: f64,

    /// Search radius in meters.
    pub radius: f64,
}

/// The kind-specific payload of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Request {
    /// List the maps available to this token.
    ///
    /// `active` is not sent. It is echoed back in the reply as the maps
    /// loaded when the job was queued; owners with a registry refresh it
    /// on completion.
    ListJobs {
        bank: u32,
        filter: Option<GeoFilter>,
        active: Vec<MapId>,
    },

    /// Build a map from the images captured into `bank`.
    Construct {
        bank: u32,
        name: String,
        detail: DetailLevel,
    },

    /// Download a map and load it into the engine.
    LoadMap { id: MapId },

    /// Release an already-loaded map's engine resources.
    FreeMap { id: MapId, handle: MapHandle },

    /// Remove a map from the backend permanently.
    DeleteMap { id: MapId },

    /// Put a map's source images back into the workspace for reprocessing.
    RestoreMapImages { id: MapId },

    /// Drop captured-but-unconstructed images.
    ClearWorkspace { bank: u32, delete_anchor: bool },

    /// Ask how many images the workspace holds.
    StatusPoll { bank: u32 },
}

impl Request {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::ListJobs { .. } => JobKind::ListJobs,
            Self::Construct { .. } => JobKind::Construct,
            Self::LoadMap { .. } => JobKind::LoadMap,
            Self::FreeMap { .. } => JobKind::FreeMap,
            Self::DeleteMap { .. } => JobKind::DeleteMap,
            Self::RestoreMapImages { .. } => JobKind::RestoreMapImages,
            Self::ClearWorkspace { .. } => JobKind::ClearWorkspace,
            Self::StatusPoll { .. } => JobKind::StatusPoll,
        }
    }

    /// The map this request targets, if any.
    pub fn map_id(&self) -> Option<MapId> {
        match self {
            Self::LoadMap { id }
            | Self::FreeMap { id, .. }
            | Self::DeleteMap { id }
            | Self::RestoreMapImages { id } => Some(*id),
            _ => None,
        }
    }
}
