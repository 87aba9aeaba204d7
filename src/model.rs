//! Core data model for the mapper.
//!
//! These types describe the work a mapping session hands to the backend:
//! requests, replies, job listings, and localized poses.

mod job;
mod pose;
mod reply;
mod request;

pub use job::{JobKind, JobSummary, MapId, MapStatus};
pub use pose::{LocalizedPose, Pose};
pub use reply::{Constructed, JobListing, LoadedMap, Reply, StatusReport};
pub use request::{DetailLevel, GeoFilter, Request};
