//! Reply: what came back from a successful job.

use nalgebra::Point3;
use serde::Serialize;

use crate::engine::MapHandle;

use super::{JobKind, JobSummary, MapId};

/// The typed success payload of a job, one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Reply {
    Jobs(JobListing),
    Constructed(Constructed),

    /// Boxed to keep variant sizes balanced.
    MapLoaded(Box<LoadedMap>),

    MapFreed { id: MapId, freed: bool },
    MapDeleted { id: MapId },
    ImagesRestored { id: MapId },
    WorkspaceCleared { delete_anchor: bool },
    Status(StatusReport),
}

impl Reply {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Jobs(_) => JobKind::ListJobs,
            Self::Constructed(_) => JobKind::Construct,
            Self::MapLoaded(_) => JobKind::LoadMap,
            Self::MapFreed { .. } => JobKind::FreeMap,
            Self::MapDeleted { .. } => JobKind::DeleteMap,
            Self::ImagesRestored { .. } => JobKind::RestoreMapImages,
            Self::WorkspaceCleared { .. } => JobKind::ClearWorkspace,
            Self::Status(_) => JobKind::StatusPoll,
        }
    }
}

/// Maps available to the caller, with the ids already loaded locally.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListing {
    pub jobs: Vec<JobSummary>,
    pub active: Vec<MapId>,
}

/// A construction job the backend accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Constructed {
    pub id: MapId,
    pub image_count: u32,
}

/// A map that was downloaded, checked, and loaded into the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedMap {
    pub id: MapId,
    pub handle: MapHandle,

    /// Size of the decoded map payload.
    pub byte_len: usize,

    /// Checksum the backend reported.
    pub checksum: String,

    /// Whether the computed digest matched `checksum`.
    pub verified: bool,

    /// Sparse point cloud, in map space.
    #[serde(skip)]
    pub points: Vec<Point3<f32>>,
}

/// Workspace status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub image_count: u32,
    pub user_level: u32,
    pub bank_max: u32,
}
