//! The localization engine: loads map payloads and exposes their point clouds.
//!
//! The engine is an external collaborator. This module only fixes the call
//! shape; feature extraction, relocalization and map optimization live
//! behind the trait.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Upper bound on points fetched from a loaded map.
pub const MAX_VERTICES: usize = 65_535;

/// The engine's id for a loaded map. Distinct from the backend's `MapId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapHandle(pub i32);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine rejected map payload ({0} bytes)")]
    Rejected(usize),

    #[error("engine has no map with handle {0:?}")]
    UnknownHandle(MapHandle),
}

/// The contract for any localization engine.
///
/// Implementations are called from dispatch threads, never from the tick.
pub trait Engine: Send + Sync {
    /// Load a decoded map payload and return the engine's handle for it.
    fn load_map(&self, bytes: &[u8]) -> Result<MapHandle, EngineError>;

    /// Release a loaded map. Returns `false` if the handle was not loaded.
    fn free_map(&self, handle: MapHandle) -> bool;

    /// Up to `MAX_VERTICES` points of the map's sparse cloud, in map space.
    fn point_cloud(&self, handle: MapHandle) -> Result<Vec<Point3<f32>>, EngineError>;
}

/// A placeholder engine that tracks handles but produces no geometry.
///
/// Used when no native engine is linked: maps load and free normally,
/// their point clouds are empty.
#[derive(Debug, Default)]
pub struct NoneEngine {
    next: AtomicI32,
    loaded: Mutex<HashMap<MapHandle, usize>>,
}

impl NoneEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of maps currently loaded.
    pub fn loaded(&self) -> usize {
        self.loaded.lock().map_or(0, |m| m.len())
    }
}

impl Engine for NoneEngine {
    fn load_map(&self, bytes: &[u8]) -> Result<MapHandle, EngineError> {
        if bytes.is_empty() {
            return Err(EngineError::Rejected(0));
        }
        let handle = MapHandle(self.next.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut loaded) = self.loaded.lock() {
            loaded.insert(handle, bytes.len());
        }
        Ok(handle)
    }

    fn free_map(&self, handle: MapHandle) -> bool {
        self.loaded
            .lock()
            .is_ok_and(|mut loaded| loaded.remove(&handle).is_some())
    }

    fn point_cloud(&self, handle: MapHandle) -> Result<Vec<Point3<f32>>, EngineError> {
        let known = self
            .loaded
            .lock()
            .is_ok_and(|loaded| loaded.contains_key(&handle));
        if known {
            Ok(Vec::new())
        } else {
            Err(EngineError::UnknownHandle(handle))
        }
    }
}
