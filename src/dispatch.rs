//! Task dispatch: where job work runs.
//!
//! The queue and the status poller take a dispatcher explicitly. Work handed
//! to a dispatcher reports back over a channel; callbacks always run on the
//! thread that calls `tick`.

use std::io;
use std::thread;

/// A unit of work handed to a dispatcher.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Runs work somewhere.
pub trait Dispatch: Send + Sync {
    /// Start `work`. `name` labels the worker for logs and thread names.
    ///
    /// On error the work was dropped without running.
    fn spawn(&self, name: &str, work: Work) -> io::Result<()>;
}

/// Runs work immediately on the calling thread.
///
/// Jobs complete within the tick that starts them. Used by tests and by
/// hosts that prefer blocking ticks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Dispatch for Inline {
    fn spawn(&self, name: &str, work: Work) -> io::Result<()> {
        log::trace!("running {name} inline");
        work();
        Ok(())
    }
}

/// Runs each unit of work on its own named thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Threaded;

impl Dispatch for Threaded {
    fn spawn(&self, name: &str, work: Work) -> io::Result<()> {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(work)
            .map(|_| ())
    }
}
