//! Jobs: one unit of remote work plus what to do when it succeeds.
//!
//! A job's request is executed on a dispatch thread against [`Services`].
//! Its success callback is kept on the tick thread and receives the typed
//! reply together with mutable access to the owner's state.

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::backend::{Backend, BackendError};
use crate::engine::{Engine, EngineError, MAX_VERTICES, MapHandle};
use crate::integrity::{self, ChecksumPolicy};
use crate::model::{
    Constructed, DetailLevel, GeoFilter, JobKind, JobListing, LoadedMap, MapId, Reply, Request,
};

/// What job execution needs from the outside world.
#[derive(Clone)]
pub struct Services {
    pub backend: Arc<dyn Backend>,
    pub engine: Arc<dyn Engine>,
    pub checksum: ChecksumPolicy,
}

/// Why a job failed.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("map {id} checksum mismatch: expected {expected}, computed {actual}")]
    Integrity {
        id: MapId,
        expected: String,
        actual: String,
    },

    #[error("map payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("failed to start worker: {0}")]
    Spawn(#[from] io::Error),

    #[error("job panicked: {0}")]
    Panicked(String),
}

/// Runs on the tick thread after a job succeeds.
pub type Callback<C> = Box<dyn FnOnce(Reply, &mut C)>;

/// A request and its optional success callback.
pub struct Job<C> {
    request: Request,
    on_success: Option<Callback<C>>,
}

impl<C> fmt::Debug for Job<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("request", &self.request)
            .field("on_success", &self.on_success.is_some())
            .finish()
    }
}

impl<C> Job<C> {
    /// A job with no callback.
    pub fn new(request: Request) -> Self {
        Self {
            request,
            on_success: None,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn kind(&self) -> JobKind {
        self.request.kind()
    }

    pub(crate) fn into_callback(self) -> Option<Callback<C>> {
        self.on_success
    }
}

impl<C: 'static> Job<C> {
    /// Attach an untyped success callback.
    #[must_use]
    pub fn on_success(mut self, callback: impl FnOnce(Reply, &mut C) + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    // ── Typed constructors ──

    pub fn list_jobs(
        bank: u32,
        filter: Option<GeoFilter>,
        active: Vec<MapId>,
        f: impl FnOnce(JobListing, &mut C) + 'static,
    ) -> Self {
        Self::new(Request::ListJobs {
            bank,
            filter,
            active,
        })
        .on_success(move |reply, ctx| match reply {
            Reply::Jobs(listing) => f(listing, ctx),
            other => unexpected(JobKind::ListJobs, &other),
        })
    }

    pub fn construct(
        bank: u32,
        name: &str,
        detail: DetailLevel,
        f: impl FnOnce(Constructed, &mut C) + 'static,
    ) -> Self {
        Self::new(Request::Construct {
            bank,
            name: name.to_string(),
            detail,
        })
        .on_success(move |reply, ctx| match reply {
            Reply::Constructed(constructed) => f(constructed, ctx),
            other => unexpected(JobKind::Construct, &other),
        })
    }

    pub fn load_map(id: MapId, f: impl FnOnce(LoadedMap, &mut C) + 'static) -> Self {
        Self::new(Request::LoadMap { id }).on_success(move |reply, ctx| match reply {
            Reply::MapLoaded(map) => f(*map, ctx),
            other => unexpected(JobKind::LoadMap, &other),
        })
    }

    /// `f` receives whether the engine actually released the map.
    pub fn free_map(id: MapId, handle: MapHandle, f: impl FnOnce(bool, &mut C) + 'static) -> Self {
        Self::new(Request::FreeMap { id, handle }).on_success(move |reply, ctx| match reply {
            Reply::MapFreed { freed, .. } => f(freed, ctx),
            other => unexpected(JobKind::FreeMap, &other),
        })
    }

    pub fn delete_map(id: MapId, f: impl FnOnce(MapId, &mut C) + 'static) -> Self {
        Self::new(Request::DeleteMap { id }).on_success(move |reply, ctx| match reply {
            Reply::MapDeleted { id } => f(id, ctx),
            other => unexpected(JobKind::DeleteMap, &other),
        })
    }

    pub fn restore_map_images(id: MapId, f: impl FnOnce(MapId, &mut C) + 'static) -> Self {
        Self::new(Request::RestoreMapImages { id }).on_success(move |reply, ctx| match reply {
            Reply::ImagesRestored { id } => f(id, ctx),
            other => unexpected(JobKind::RestoreMapImages, &other),
        })
    }

    pub fn clear_workspace(
        bank: u32,
        delete_anchor: bool,
        f: impl FnOnce(&mut C) + 'static,
    ) -> Self {
        Self::new(Request::ClearWorkspace {
            bank,
            delete_anchor,
        })
        .on_success(move |reply, ctx| match reply {
            Reply::WorkspaceCleared { .. } => f(ctx),
            other => unexpected(JobKind::ClearWorkspace, &other),
        })
    }
}

fn unexpected(kind: JobKind, reply: &Reply) {
    log::error!("{kind} job produced a {} reply; callback skipped", reply.kind());
}

// ── Execution ──

/// [`execute`], with a panic in the backend or engine reported as
/// [`JobError::Panicked`] instead of unwinding out of the worker.
pub fn run(request: &Request, services: &Services) -> Result<Reply, JobError> {
    panic::catch_unwind(AssertUnwindSafe(|| execute(request, services)))
        .unwrap_or_else(|payload| Err(JobError::Panicked(panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Perform `request`. Blocks; call from a dispatch thread.
pub fn execute(request: &Request, services: &Services) -> Result<Reply, JobError> {
    let backend = services.backend.as_ref();
    match request {
        Request::ListJobs {
            bank,
            filter,
            active,
        } => {
            let jobs = backend.list_jobs(*bank, filter.as_ref())?;
            Ok(Reply::Jobs(JobListing {
                jobs,
                active: active.clone(),
            }))
        }
        Request::Construct { bank, name, detail } => {
            Ok(Reply::Constructed(backend.construct(*bank, name, *detail)?))
        }
        Request::LoadMap { id } => Ok(Reply::MapLoaded(Box::new(load_map(*id, services)?))),
        Request::FreeMap { id, handle } => Ok(Reply::MapFreed {
            id: *id,
            freed: services.engine.free_map(*handle),
        }),
        Request::DeleteMap { id } => {
            backend.delete_map(*id)?;
            Ok(Reply::MapDeleted { id: *id })
        }
        Request::RestoreMapImages { id } => {
            backend.restore_map_images(*id)?;
            Ok(Reply::ImagesRestored { id: *id })
        }
        Request::ClearWorkspace {
            bank,
            delete_anchor,
        } => {
            backend.clear_workspace(*bank, *delete_anchor)?;
            Ok(Reply::WorkspaceCleared {
                delete_anchor: *delete_anchor,
            })
        }
        Request::StatusPoll { bank } => Ok(Reply::Status(backend.status(*bank)?)),
    }
}

/// Download, decode, verify, and hand a map to the engine.
fn load_map(id: MapId, services: &Services) -> Result<LoadedMap, JobError> {
    let payload = services.backend.load_map(id)?;
    let bytes = STANDARD.decode(payload.b64.as_bytes())?;

    let verified = match integrity::verify(&bytes, &payload.sha256) {
        Ok(()) => true,
        Err(actual) => match services.checksum {
            ChecksumPolicy::Enforce => {
                log::error!(
                    "map {id} checksum mismatch (expected {}, computed {actual})",
                    payload.sha256
                );
                return Err(JobError::Integrity {
                    id,
                    expected: payload.sha256,
                    actual,
                });
            }
            ChecksumPolicy::Warn => {
                log::warn!(
                    "map {id} checksum mismatch (expected {}, computed {actual}); loading anyway",
                    payload.sha256
                );
                false
            }
        },
    };

    log::info!("loading map {id} ({} bytes, sha256 {})", bytes.len(), payload.sha256);
    let handle = services.engine.load_map(&bytes)?;

    let mut points = match services.engine.point_cloud(handle) {
        Ok(points) => points,
        Err(e) => {
            services.engine.free_map(handle);
            return Err(e.into());
        }
    };
    points.truncate(MAX_VERTICES);
    log::debug!("map {id} loaded as {handle:?} with {} points", points.len());

    Ok(LoadedMap {
        id,
        handle,
        byte_len: bytes.len(),
        checksum: payload.sha256,
        verified,
        points,
    })
}
