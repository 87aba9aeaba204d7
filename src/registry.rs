//! Loaded maps, keyed by backend map id.

use std::collections::{BTreeMap, BTreeSet};

use crate::engine::MapHandle;
use crate::model::{LoadedMap, MapId};

/// Maps loaded into the engine, plus loads still in flight.
#[derive(Debug, Default)]
pub struct MapRegistry {
    loaded: BTreeMap<MapId, LoadedMap>,
    pending: BTreeSet<MapId>,
}

impl MapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loaded map, clearing its pending mark. Returns the map it
    /// replaced, if any.
    pub fn insert(&mut self, map: LoadedMap) -> Option<LoadedMap> {
        self.pending.remove(&map.id);
        self.loaded.insert(map.id, map)
    }

    pub fn remove(&mut self, id: MapId) -> Option<LoadedMap> {
        self.loaded.remove(&id)
    }

    pub fn get(&self, id: MapId) -> Option<&LoadedMap> {
        self.loaded.get(&id)
    }

    pub fn contains(&self, id: MapId) -> bool {
        self.loaded.contains_key(&id)
    }

    pub fn handle(&self, id: MapId) -> Option<MapHandle> {
        self.loaded.get(&id).map(|m| m.handle)
    }

    /// Ids of every loaded map, ascending.
    pub fn ids(&self) -> Vec<MapId> {
        self.loaded.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    /// Mark a load as in flight. Returns `false` if it already was.
    pub fn mark_pending(&mut self, id: MapId) -> bool {
        self.pending.insert(id)
    }

    pub fn clear_pending(&mut self, id: MapId) {
        self.pending.remove(&id);
    }

    pub fn is_pending(&self, id: MapId) -> bool {
        self.pending.contains(&id)
    }
}
