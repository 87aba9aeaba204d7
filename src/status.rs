//! Workspace status polling, independent of the job queue.
//!
//! One poll is in flight at most. The next poll is due `interval` after the
//! previous one completed, so a slow backend stretches the period rather
//! than stacking requests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::dispatch::Dispatch;
use crate::job::{self, JobError, Services};
use crate::model::{Reply, Request, StatusReport};
use crate::session::SessionState;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

pub struct StatusPoller {
    interval: Duration,
    bank: u32,
    next_due: Option<Instant>,
    in_flight: bool,
    completed: u64,
    last: Option<StatusReport>,
    services: Services,
    dispatch: Arc<dyn Dispatch>,
    tx: Sender<Result<Reply, JobError>>,
    rx: Receiver<Result<Reply, JobError>>,
}

impl StatusPoller {
    /// The first poll fires on the first tick.
    pub fn new(services: Services, dispatch: Arc<dyn Dispatch>, interval: Duration) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            interval,
            bank: 0,
            next_due: None,
            in_flight: false,
            completed: 0,
            last: None,
            services,
            dispatch,
            tx,
            rx,
        }
    }

    /// Poll `bank` from the next request on.
    pub fn set_bank(&mut self, bank: u32) {
        self.bank = bank;
    }

    /// Polls that have completed, successfully or not.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn last_report(&self) -> Option<&StatusReport> {
        self.last.as_ref()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn tick(&mut self, now: Instant, session: &mut SessionState) {
        self.collect(now, session);
        if self.in_flight || self.next_due.is_some_and(|due| now < due) {
            return;
        }
        self.start(now);
        self.collect(now, session);
    }

    fn start(&mut self, now: Instant) {
        let services = self.services.clone();
        let tx = self.tx.clone();
        let request = Request::StatusPoll { bank: self.bank };

        self.in_flight = true;
        let work = Box::new(move || {
            let _ = tx.send(job::run(&request, &services));
        });

        if let Err(e) = self.dispatch.spawn("status-poll", work) {
            log::warn!("failed to start status poll: {e}");
            self.in_flight = false;
            self.next_due = Some(now + self.interval);
        }
    }

    fn collect(&mut self, now: Instant, session: &mut SessionState) {
        while let Ok(result) = self.rx.try_recv() {
            self.in_flight = false;
            self.completed += 1;
            self.next_due = Some(now + self.interval);

            match result {
                Ok(Reply::Status(report)) => {
                    log::trace!("workspace holds {} images", report.image_count);
                    session.set_image_count(report.image_count);
                    self.last = Some(report);
                }
                Ok(other) => log::error!("status poll produced a {} reply", other.kind()),
                Err(e) => log::debug!("status poll failed: {e}"),
            }
        }
    }
}
