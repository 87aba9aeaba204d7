//! Test doubles shared across module tests.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use nalgebra::Point3;

use crate::backend::{self, Backend, BackendError, MapPayload};
use crate::dispatch::{Dispatch, Work};
use crate::engine::{Engine, EngineError, MapHandle, NoneEngine};
use crate::integrity::{ChecksumPolicy, sha256_hex};
use crate::job::Services;
use crate::model::{
    Constructed, DetailLevel, GeoFilter, JobKind, JobSummary, MapId, MapStatus, StatusReport,
};

/// An in-memory backend that records every call.
#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<JobKind>>,
    failing: Mutex<HashSet<JobKind>>,
    maps: Mutex<HashMap<MapId, MapPayload>>,
    jobs: Mutex<Vec<JobSummary>>,
    last_filter: Mutex<Option<GeoFilter>>,
    last_bank: AtomicU32,
    image_count: AtomicU32,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `kind` answer with a non-sentinel error.
    pub fn fail(self, kind: JobKind) -> Self {
        self.failing.lock().unwrap().insert(kind);
        self
    }

    /// Serve `bytes` as map `id` with a correct checksum.
    pub fn with_map(self, id: MapId, bytes: &[u8]) -> Self {
        let sha256 = sha256_hex(bytes);
        self.with_payload(id, bytes, &sha256)
    }

    /// Serve `bytes` as map `id` with a checksum that does not match.
    pub fn with_corrupt_map(self, id: MapId, bytes: &[u8]) -> Self {
        self.with_payload(id, bytes, &sha256_hex(b"something else"))
    }

    fn with_payload(self, id: MapId, bytes: &[u8], sha256: &str) -> Self {
        self.maps.lock().unwrap().insert(
            id,
            MapPayload {
                b64: STANDARD.encode(bytes),
                sha256: sha256.to_string(),
            },
        );
        self
    }

    pub fn with_job(self, id: MapId, name: &str) -> Self {
        self.jobs.lock().unwrap().push(JobSummary {
            id,
            name: name.to_string(),
            status: MapStatus::Done,
            image_count: 12,
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
            created: String::new(),
            modified: String::new(),
            checksum: String::new(),
        });
        self
    }

    pub fn set_image_count(&self, count: u32) {
        self.image_count.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<JobKind> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, kind: JobKind) -> usize {
        self.calls().iter().filter(|k| **k == kind).count()
    }

    pub fn last_filter(&self) -> Option<GeoFilter> {
        *self.last_filter.lock().unwrap()
    }

    pub fn last_bank(&self) -> u32 {
        self.last_bank.load(Ordering::SeqCst)
    }

    fn record(&self, kind: JobKind) -> backend::Result<()> {
        self.calls.lock().unwrap().push(kind);
        if self.failing.lock().unwrap().contains(&kind) {
            return Err(BackendError::Rejected("error".to_string()));
        }
        Ok(())
    }
}

impl Backend for FakeBackend {
    fn list_jobs(&self, bank: u32, filter: Option<&GeoFilter>) -> backend::Result<Vec<JobSummary>> {
        self.record(JobKind::ListJobs)?;
        self.last_bank.store(bank, Ordering::SeqCst);
        *self.last_filter.lock().unwrap() = filter.copied();
        Ok(self.jobs.lock().unwrap().clone())
    }

    fn construct(&self, bank: u32, _name: &str, detail: DetailLevel) -> backend::Result<Constructed> {
        self.record(JobKind::Construct)?;
        self.last_bank.store(bank, Ordering::SeqCst);
        Ok(Constructed {
            id: MapId(100 + detail.feature_count()),
            image_count: self.image_count.load(Ordering::SeqCst),
        })
    }

    fn load_map(&self, id: MapId) -> backend::Result<MapPayload> {
        self.record(JobKind::LoadMap)?;
        self.maps
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| BackendError::Rejected("map not found".to_string()))
    }

    fn delete_map(&self, _id: MapId) -> backend::Result<()> {
        self.record(JobKind::DeleteMap)
    }

    fn restore_map_images(&self, _id: MapId) -> backend::Result<()> {
        self.record(JobKind::RestoreMapImages)
    }

    fn clear_workspace(&self, bank: u32, _delete_anchor: bool) -> backend::Result<()> {
        self.last_bank.store(bank, Ordering::SeqCst);
        self.record(JobKind::ClearWorkspace)
    }

    fn status(&self, bank: u32) -> backend::Result<StatusReport> {
        self.record(JobKind::StatusPoll)?;
        self.last_bank.store(bank, Ordering::SeqCst);
        Ok(StatusReport {
            image_count: self.image_count.load(Ordering::SeqCst),
            user_level: 0,
            bank_max: 8,
        })
    }
}

/// An engine whose loads panic, standing in for a faulty native library.
pub struct Exploding;

impl Engine for Exploding {
    fn load_map(&self, _bytes: &[u8]) -> Result<MapHandle, EngineError> {
        panic!("engine blew up");
    }

    fn free_map(&self, _handle: MapHandle) -> bool {
        false
    }

    fn point_cloud(&self, _handle: MapHandle) -> Result<Vec<Point3<f32>>, EngineError> {
        Ok(Vec::new())
    }
}

/// Services backed by `backend` and a placeholder engine.
pub fn services(backend: &Arc<FakeBackend>) -> Services {
    Services {
        backend: Arc::clone(backend) as Arc<dyn Backend>,
        engine: Arc::new(NoneEngine::new()),
        checksum: ChecksumPolicy::Enforce,
    }
}

/// Holds work until the test releases it, standing in for a remote call
/// that resolves between ticks.
#[derive(Default)]
pub struct Deferred {
    held: Mutex<Vec<(String, Work)>>,
}

impl Deferred {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn held(&self) -> Vec<String> {
        self.held
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Run the oldest held work. Returns `false` if nothing was held.
    pub fn run_next(&self) -> bool {
        let next = {
            let mut held = self.held.lock().unwrap();
            if held.is_empty() {
                None
            } else {
                Some(held.remove(0))
            }
        };
        match next {
            Some((_, work)) => {
                work();
                true
            }
            None => false,
        }
    }

    pub fn run_all(&self) {
        while self.run_next() {}
    }
}

impl Dispatch for Deferred {
    fn spawn(&self, name: &str, work: Work) -> io::Result<()> {
        self.held.lock().unwrap().push((name.to_string(), work));
        Ok(())
    }
}

/// A dispatcher that can never start work.
pub struct Broken;

impl Dispatch for Broken {
    fn spawn(&self, _name: &str, _work: Work) -> io::Result<()> {
        Err(io::Error::other("no threads left"))
    }
}
