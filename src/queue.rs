//! The job queue: strict FIFO, at most one job in flight.
//!
//! Driven by `tick`. A tick first collects any finished job (running its
//! callback on the calling thread), then starts the head of the queue if
//! nothing is in flight. The head stays in the queue until it finishes, so
//! `len` counts the in-flight job too.

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use jiff::Timestamp;
use serde::Serialize;

use crate::dispatch::Dispatch;
use crate::job::{self, Job, JobError, Services};
use crate::model::{JobKind, MapId, Reply};

/// Identifies a job for the lifetime of its queue.
pub type JobId = u64;

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Outcome {
    Succeeded,
    Failed { reason: String },
}

/// One finished job, as seen by the host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub id: JobId,
    pub kind: JobKind,

    /// The map the job targeted, if any.
    pub map: Option<MapId>,

    pub outcome: Outcome,
    pub finished_at: Timestamp,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }
}

/// Sent from the worker back to the tick thread.
struct Finished {
    id: JobId,
    result: Result<Reply, JobError>,
}

/// FIFO of jobs whose callbacks mutate a `C`.
pub struct JobQueue<C> {
    pending: VecDeque<(JobId, Job<C>)>,
    busy: bool,
    next_id: JobId,
    services: Services,
    dispatch: Arc<dyn Dispatch>,
    done_tx: Sender<Finished>,
    done_rx: Receiver<Finished>,
}

impl<C> JobQueue<C> {
    pub fn new(services: Services, dispatch: Arc<dyn Dispatch>) -> Self {
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        Self {
            pending: VecDeque::new(),
            busy: false,
            next_id: 1,
            services,
            dispatch,
            done_tx,
            done_rx,
        }
    }

    /// Append a job. It runs after every job already queued.
    pub fn enqueue(&mut self, job: Job<C>) -> JobId {
        let id = self.next_id;
        self.next_id += 1;
        log::debug!("queued job {id} ({})", job.kind());
        self.pending.push_back((id, job));
        id
    }

    /// Jobs not yet finished, including the one in flight.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether a job is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Whether a job of `kind` is queued or in flight.
    pub fn has_pending(&self, kind: JobKind) -> bool {
        self.pending.iter().any(|(_, job)| job.kind() == kind)
    }

    /// Advance the queue. Returns the jobs that finished during this tick.
    pub fn tick(&mut self, ctx: &mut C) -> Vec<JobReport> {
        let mut reports = Vec::new();
        self.collect(ctx, &mut reports);
        if !self.busy {
            self.start_head();
            // Inline dispatch finishes before spawn returns.
            self.collect(ctx, &mut reports);
        }
        reports
    }

    fn start_head(&mut self) {
        let Some((id, job)) = self.pending.front() else {
            return;
        };
        let id = *id;
        let kind = job.kind();
        let request = job.request().clone();
        let services = self.services.clone();
        let tx = self.done_tx.clone();

        self.busy = true;
        log::debug!("starting job {id} ({kind})");

        let work = Box::new(move || {
            let result = job::run(&request, &services);
            // The queue owns a sender, so the receiver outlives every worker.
            let _ = tx.send(Finished { id, result });
        });

        if let Err(e) = self.dispatch.spawn(&format!("job-{id}-{kind}"), work) {
            let _ = self.done_tx.send(Finished {
                id,
                result: Err(JobError::Spawn(e)),
            });
        }
    }

    fn collect(&mut self, ctx: &mut C, reports: &mut Vec<JobReport>) {
        while let Ok(finished) = self.done_rx.try_recv() {
            let Some((id, job)) = self.pending.pop_front() else {
                log::error!("job {} finished with an empty queue", finished.id);
                continue;
            };
            debug_assert_eq!(id, finished.id);
            self.busy = false;

            let kind = job.kind();
            let map = job.request().map_id();
            let outcome = match finished.result {
                Ok(reply) => {
                    log::info!("job {id} ({kind}) succeeded");
                    if let Some(callback) = job.into_callback() {
                        callback(reply, ctx);
                    }
                    Outcome::Succeeded
                }
                Err(e) => {
                    log::warn!("job {id} ({kind}) failed: {e}");
                    Outcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };

            reports.push(JobReport {
                id,
                kind,
                map,
                outcome,
                finished_at: Timestamp::now(),
            });
        }
    }
}
