//! The mapper: owns the session, the job queue, and the status poller, and
//! is advanced by the host once per frame.
//!
//! Every public operation either changes local state immediately or
//! enqueues a job. Job callbacks mutate [`MapperState`] on the tick thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dispatch::Dispatch;
use crate::geodesy::{self, VirtualLocation};
use crate::job::{Job, Services};
use crate::location::{self, GeoFix, LocationError, LocationProvider, MAX_WAIT_POLLS};
use crate::model::{
    Constructed, DetailLevel, GeoFilter, JobKind, JobListing, LocalizedPose, MapId, Pose,
};
use crate::queue::{JobId, JobQueue, JobReport};
use crate::registry::MapRegistry;
use crate::session::{CaptureTag, ConnectionNotice, SessionState};
use crate::status::StatusPoller;

/// Timing and limits, usually from [`crate::config::Config::settings`].
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub max_banks: u32,
    pub status_interval: Duration,
    pub job_list_interval: Duration,
    pub job_list_radius: f64,

    /// Whether `tick` runs the status poller.
    pub poll_status: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_banks: 1,
            status_interval: Duration::from_secs(3),
            job_list_interval: Duration::from_secs(3),
            job_list_radius: 200.0,
            poll_status: true,
        }
    }
}

/// State that job callbacks write to.
#[derive(Debug, Default)]
pub struct MapperState {
    pub session: SessionState,
    pub registry: MapRegistry,

    /// The most recent job listing.
    pub listing: Option<JobListing>,

    /// The most recent construction the backend accepted.
    pub last_constructed: Option<Constructed>,
}

pub struct Mapper {
    queue: JobQueue<MapperState>,
    state: MapperState,
    poller: StatusPoller,
    location: Box<dyn LocationProvider>,
    settings: Settings,
    gps_fix: Option<GeoFix>,
    localized: Option<LocalizedPose>,
    virtual_location: Option<VirtualLocation>,
    watching_jobs: bool,
    job_list_due: Option<Instant>,
}

impl Mapper {
    pub fn new(
        services: Services,
        dispatch: Arc<dyn Dispatch>,
        settings: Settings,
        location: Box<dyn LocationProvider>,
    ) -> Self {
        let poller = StatusPoller::new(
            services.clone(),
            Arc::clone(&dispatch),
            settings.status_interval,
        );
        let mut state = MapperState::default();
        state.session.reset();
        log::debug!("session {} started", state.session.id);

        Self {
            queue: JobQueue::new(services, dispatch),
            state,
            poller,
            location,
            settings,
            gps_fix: None,
            localized: None,
            virtual_location: None,
            watching_jobs: false,
            job_list_due: None,
        }
    }

    pub fn state(&self) -> &MapperState {
        &self.state
    }

    pub fn session(&self) -> &SessionState {
        &self.state.session
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_busy(&self) -> bool {
        self.queue.is_busy()
    }

    pub fn virtual_location(&self) -> Option<VirtualLocation> {
        self.virtual_location
    }

    pub fn localized_pose(&self) -> Option<&LocalizedPose> {
        self.localized.as_ref()
    }

    // ── Jobs ──

    /// List maps, filtered by the device location when tracking is on.
    pub fn list_jobs(&mut self) -> JobId {
        let filter = self.listing_filter();
        let active = self.state.registry.ids();
        let job = Job::list_jobs(
            self.state.session.bank(),
            filter,
            active,
            |mut listing, state: &mut MapperState| {
                log::info!("{} maps listed", listing.jobs.len());
                // Loads queued ahead of this listing have landed by now.
                listing.active = state.registry.ids();
                state.listing = Some(listing);
            },
        );
        self.queue.enqueue(job)
    }

    fn listing_filter(&self) -> Option<GeoFilter> {
        if !self.gps_on() {
            return None;
        }
        self.gps_fix
            .map(|fix| fix.filter(self.settings.job_list_radius))
    }

    /// Build a map from the images in the current bank.
    pub fn construct(&mut self, name: &str, detail: DetailLevel) -> JobId {
        let job = Job::construct(
            self.state.session.bank(),
            name,
            detail,
            |constructed, state: &mut MapperState| {
                log::info!(
                    "Started constructing map {} containing {} images",
                    constructed.id,
                    constructed.image_count
                );
                state.last_constructed = Some(constructed);
            },
        );
        self.queue.enqueue(job)
    }

    /// Load map `id`, or free it if it is already loaded.
    ///
    /// Returns `None` when a load of `id` is already in flight.
    pub fn load_map(&mut self, id: MapId) -> Option<JobId> {
        if let Some(handle) = self.state.registry.handle(id) {
            let job = Job::free_map(id, handle, move |freed, state: &mut MapperState| {
                if freed {
                    log::info!("map {id} freed");
                    state.registry.remove(id);
                } else {
                    log::warn!("engine did not free map {id}");
                }
            });
            return Some(self.queue.enqueue(job));
        }

        if !self.state.registry.mark_pending(id) {
            log::debug!("map {id} is already loading");
            return None;
        }

        let job = Job::load_map(id, |map, state: &mut MapperState| {
            log::info!("map {} loaded with {} points", map.id, map.points.len());
            state.registry.insert(map);
            state.session.reset_localization_counters();
        });
        Some(self.queue.enqueue(job))
    }

    pub fn delete_map(&mut self, id: MapId) -> JobId {
        self.queue
            .enqueue(Job::delete_map(id, |id, _: &mut MapperState| {
                log::info!("map {id} deleted");
            }))
    }

    /// Put a map's images back into the workspace.
    ///
    /// The next capture starts a fresh run.
    pub fn restore_map_images(&mut self, id: MapId) -> JobId {
        self.state.session.mark_first_image();
        self.queue
            .enqueue(Job::restore_map_images(id, |id, _: &mut MapperState| {
                log::info!("images of map {id} restored to workspace");
            }))
    }

    /// Drop captured images from the current bank.
    pub fn reset_workspace(&mut self, delete_anchor: bool) -> JobId {
        self.state.session.mark_first_image();
        let job = Job::clear_workspace(
            self.state.session.bank(),
            delete_anchor,
            |state: &mut MapperState| {
                log::info!("workspace cleared");
                state.session.set_image_count(0);
            },
        );
        self.queue.enqueue(job)
    }

    // ── Session ──

    pub fn switch_bank(&mut self) -> u32 {
        let bank = self.state.session.switch_bank(self.settings.max_banks);
        self.poller.set_bank(bank);
        bank
    }

    pub fn select_bank(&mut self, bank: u32) -> Result<(), String> {
        self.state
            .session
            .select_bank(bank, self.settings.max_banks)?;
        self.poller.set_bank(bank);
        Ok(())
    }

    pub fn next_capture(&mut self, anchor: bool) -> CaptureTag {
        self.state.session.next_capture(anchor)
    }

    pub fn record_capture(&mut self, connected: bool) -> Option<ConnectionNotice> {
        let notice = self.state.session.record_capture(connected);
        if let Some(notice) = notice {
            log::info!("{}", notice.message());
        }
        notice
    }

    /// Record a localization attempt. A pose means success and becomes the
    /// reference for geodetic updates.
    pub fn record_localization(&mut self, result: Option<LocalizedPose>) {
        self.state.session.record_localization(result.is_some());
        if let Some(pose) = result {
            self.localized = Some(pose);
        }
    }

    // ── Location ──

    pub fn gps_on(&self) -> bool {
        self.location.is_running()
    }

    pub fn gps_fix(&self) -> Option<GeoFix> {
        self.gps_fix
    }

    /// Start location tracking, calling `wait` between status checks.
    ///
    /// On error tracking stays off.
    pub fn start_gps(&mut self, wait: impl FnMut()) -> Result<(), LocationError> {
        match location::enable(self.location.as_mut(), MAX_WAIT_POLLS, wait) {
            Ok(()) => {
                self.gps_fix = self.location.last_fix();
                Ok(())
            }
            Err(e) => {
                log::warn!("{e}");
                self.location.stop();
                self.gps_fix = None;
                Err(e)
            }
        }
    }

    pub fn stop_gps(&mut self) {
        self.location.stop();
        self.gps_fix = None;
        log::info!("Geolocation tracking stopped");
    }

    /// Keep the job listing fresh while `on`.
    pub fn watch_job_list(&mut self, on: bool) {
        self.watching_jobs = on;
        self.job_list_due = None;
    }

    // ── Tick ──

    /// Advance one frame. `camera` is the tracked camera pose, if any.
    pub fn tick(&mut self, camera: Option<&Pose>) -> Vec<JobReport> {
        self.tick_at(Instant::now(), camera)
    }

    pub fn tick_at(&mut self, now: Instant, camera: Option<&Pose>) -> Vec<JobReport> {
        if self.gps_on() {
            self.gps_fix = self.location.last_fix();
        }

        self.state.session.queue_len = self.queue.len();
        let reports = self.queue.tick(&mut self.state);
        for report in &reports {
            if report.kind == JobKind::LoadMap
                && !report.succeeded()
                && let Some(id) = report.map
            {
                self.state.registry.clear_pending(id);
            }
        }

        if self.settings.poll_status {
            self.poller.tick(now, &mut self.state.session);
        }
        self.refresh_job_list(now);

        if let Some(camera) = camera {
            self.update_location(camera);
        }

        reports
    }

    fn refresh_job_list(&mut self, now: Instant) {
        if !self.watching_jobs || self.job_list_due.is_some_and(|due| now < due) {
            return;
        }
        self.job_list_due = Some(now + self.settings.job_list_interval);
        if self.queue.has_pending(JobKind::ListJobs) {
            return;
        }
        self.list_jobs();
    }

    fn update_location(&mut self, camera: &Pose) {
        let Some(pose) = self.localized.as_mut() else {
            return;
        };
        if let Some(mut location) = geodesy::update_location(camera, pose) {
            // Looking straight up or down: keep the last bearing.
            if location.bearing.is_none() {
                location.bearing = self.virtual_location.and_then(|l| l.bearing);
            }
            self.virtual_location = Some(location);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use nalgebra::{Matrix4, UnitQuaternion, Vector3};

    use crate::dispatch::Inline;
    use crate::geodesy::{MapToEcef, Wgs84, wgs84_to_ecef};
    use crate::integrity::ChecksumPolicy;
    use crate::location::{FixedLocation, NoLocation};
    use crate::queue::Outcome;
    use crate::testing::{Deferred, FakeBackend, services};

    fn mapper(backend: &Arc<FakeBackend>) -> Mapper {
        Mapper::new(
            services(backend),
            Arc::new(Inline),
            Settings::default(),
            Box::new(NoLocation),
        )
    }

    fn drain(mapper: &mut Mapper) -> Vec<JobReport> {
        let mut reports = Vec::new();
        while mapper.queue_len() > 0 {
            reports.extend(mapper.tick(None));
        }
        reports
    }

    fn fix() -> GeoFix {
        GeoFix {
            latitude: 60.17,
            longitude: 24.94,
            altitude: 0.0,
            horizontal_accuracy: 5.0,
            vertical_accuracy: 5.0,
        }
    }

    #[test]
    fn load_then_load_again_frees() {
        let backend = Arc::new(FakeBackend::new().with_map(MapId(7), b"map"));
        let mut mapper = mapper(&backend);
        mapper.record_localization(None);

        mapper.load_map(MapId(7)).unwrap();
        drain(&mut mapper);

        assert!(mapper.state().registry.contains(MapId(7)));
        assert!(!mapper.state().registry.is_pending(MapId(7)));
        assert_eq!(mapper.session().loc_failure, 0);

        mapper.load_map(MapId(7)).unwrap();
        let reports = drain(&mut mapper);

        assert_eq!(reports[0].kind, JobKind::FreeMap);
        assert!(mapper.state().registry.is_empty());
        assert_eq!(backend.count(JobKind::LoadMap), 1);
    }

    #[test]
    fn checksum_mismatch_blocks_activation() {
        let backend = Arc::new(FakeBackend::new().with_corrupt_map(MapId(7), b"map"));
        let mut mapper = mapper(&backend);

        mapper.load_map(MapId(7)).unwrap();
        let reports = drain(&mut mapper);

        assert!(matches!(reports[0].outcome, Outcome::Failed { .. }));
        assert!(!mapper.state().registry.contains(MapId(7)));
        assert!(!mapper.state().registry.is_pending(MapId(7)));
    }

    #[test]
    fn warn_policy_activates_mismatched_map() {
        let backend = Arc::new(FakeBackend::new().with_corrupt_map(MapId(7), b"map"));
        let svc = Services {
            checksum: ChecksumPolicy::Warn,
            ..services(&backend)
        };
        let mut mapper = Mapper::new(svc, Arc::new(Inline), Settings::default(), Box::new(NoLocation));

        mapper.load_map(MapId(7)).unwrap();
        drain(&mut mapper);

        let map = mapper.state().registry.get(MapId(7)).unwrap();
        assert!(!map.verified);
    }

    #[test]
    fn duplicate_load_is_ignored_while_pending() {
        let backend = Arc::new(FakeBackend::new().with_map(MapId(7), b"map"));
        let mut mapper = mapper(&backend);

        assert!(mapper.load_map(MapId(7)).is_some());
        assert!(mapper.load_map(MapId(7)).is_none());
        assert_eq!(mapper.queue_len(), 1);
    }

    #[test]
    fn listing_marks_active_maps() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_map(MapId(7), b"map")
                .with_job(MapId(7), "lobby")
                .with_job(MapId(8), "hall"),
        );
        let mut mapper = mapper(&backend);

        mapper.load_map(MapId(7));
        mapper.list_jobs();
        drain(&mut mapper);

        let listing = mapper.state().listing.as_ref().unwrap();
        assert_eq!(listing.jobs.len(), 2);
        assert_eq!(listing.active, vec![MapId(7)]);
        assert_eq!(backend.last_filter(), None);
    }

    #[test]
    fn listing_drops_maps_freed_before_it_completes() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_map(MapId(7), b"map")
                .with_job(MapId(7), "lobby"),
        );
        let mut mapper = mapper(&backend);
        mapper.load_map(MapId(7));
        drain(&mut mapper);

        // Enqueued while 7 is loaded, completes after it is freed.
        mapper.load_map(MapId(7));
        mapper.list_jobs();
        drain(&mut mapper);

        let listing = mapper.state().listing.as_ref().unwrap();
        assert!(listing.active.is_empty());
    }

    #[test]
    fn listing_is_geo_filtered_while_tracking() {
        let backend = Arc::new(FakeBackend::new());
        let mut mapper = Mapper::new(
            services(&backend),
            Arc::new(Inline),
            Settings::default(),
            Box::new(FixedLocation::new(fix())),
        );

        mapper.start_gps(|| {}).unwrap();
        mapper.list_jobs();
        drain(&mut mapper);

        assert_eq!(backend.last_filter(), Some(fix().filter(200.0)));

        mapper.stop_gps();
        mapper.list_jobs();
        drain(&mut mapper);
        assert_eq!(backend.last_filter(), None);
    }

    #[test]
    fn gps_failure_leaves_tracking_off() {
        let backend = Arc::new(FakeBackend::new());
        let mut mapper = mapper(&backend);

        assert_eq!(mapper.start_gps(|| {}), Err(LocationError::NotEnabled));
        assert!(!mapper.gps_on());
    }

    #[test]
    fn construct_uses_current_bank() {
        let backend = Arc::new(FakeBackend::new());
        backend.set_image_count(30);
        let mut mapper = Mapper::new(
            services(&backend),
            Arc::new(Inline),
            Settings {
                max_banks: 3,
                ..Settings::default()
            },
            Box::new(NoLocation),
        );

        assert_eq!(mapper.switch_bank(), 1);
        mapper.construct("lobby", DetailLevel::High);
        drain(&mut mapper);

        assert_eq!(backend.last_bank(), 1);
        let constructed = mapper.state().last_constructed.unwrap();
        assert_eq!(constructed.image_count, 30);
    }

    #[test]
    fn restore_and_reset_start_a_fresh_run() {
        let backend = Arc::new(FakeBackend::new());
        let mut mapper = mapper(&backend);
        mapper.record_capture(true);
        assert!(mapper.record_capture(true).is_some());

        mapper.restore_map_images(MapId(3));
        assert_eq!(mapper.record_capture(true), None);

        mapper.reset_workspace(true);
        assert_eq!(mapper.record_capture(false), None);
        assert_eq!(
            mapper.record_capture(false),
            Some(ConnectionNotice::Disconnected)
        );
    }

    #[test]
    fn status_polls_while_queue_is_busy() {
        let backend = Arc::new(FakeBackend::new());
        backend.set_image_count(5);
        let dispatch = Arc::new(Deferred::new());
        let mut mapper = Mapper::new(
            services(&backend),
            dispatch.clone(),
            Settings::default(),
            Box::new(NoLocation),
        );

        mapper.construct("lobby", DetailLevel::Standard);
        mapper.tick(None);

        assert!(mapper.is_busy());
        assert_eq!(dispatch.held(), vec!["job-1-construct", "status-poll"]);

        dispatch.run_all();
        let reports = mapper.tick(None);

        assert_eq!(reports.len(), 1);
        assert_eq!(mapper.session().image_count, 5);
        assert_eq!(mapper.queue_len(), 0);
    }

    #[test]
    fn status_polling_can_be_turned_off() {
        let backend = Arc::new(FakeBackend::new());
        let dispatch = Arc::new(Deferred::new());
        let mut mapper = Mapper::new(
            services(&backend),
            dispatch.clone(),
            Settings {
                poll_status: false,
                ..Settings::default()
            },
            Box::new(NoLocation),
        );

        mapper.delete_map(MapId(5));
        mapper.tick(None);
        dispatch.run_all();
        mapper.tick(None);

        assert_eq!(backend.calls(), vec![JobKind::DeleteMap]);
        assert_eq!(mapper.poller().completed(), 0);
    }

    #[test]
    fn queue_len_is_mirrored_each_tick() {
        let backend = Arc::new(FakeBackend::new());
        let dispatch = Arc::new(Deferred::new());
        let mut mapper = Mapper::new(
            services(&backend),
            dispatch.clone(),
            Settings::default(),
            Box::new(NoLocation),
        );

        mapper.delete_map(MapId(1));
        mapper.delete_map(MapId(2));
        mapper.tick(None);

        assert_eq!(mapper.session().queue_len, 2);
    }

    #[test]
    fn watched_job_list_refreshes_on_interval() {
        let backend = Arc::new(FakeBackend::new());
        let mut mapper = mapper(&backend);
        let t0 = Instant::now();

        mapper.watch_job_list(true);
        mapper.tick_at(t0, None);
        mapper.tick_at(t0 + Duration::from_millis(16), None);
        mapper.tick_at(t0 + Duration::from_secs(1), None);
        assert_eq!(backend.count(JobKind::ListJobs), 1);

        mapper.tick_at(t0 + Duration::from_secs(3), None);
        mapper.tick_at(t0 + Duration::from_secs(3) + Duration::from_millis(16), None);
        assert_eq!(backend.count(JobKind::ListJobs), 2);

        mapper.watch_job_list(false);
        mapper.tick_at(t0 + Duration::from_secs(9), None);
        mapper.tick_at(t0 + Duration::from_secs(10), None);
        assert_eq!(backend.count(JobKind::ListJobs), 2);
    }

    #[test]
    fn localized_pose_drives_virtual_location() {
        let backend = Arc::new(FakeBackend::new());
        let mut mapper = mapper(&backend);
        let origin = Wgs84 {
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
        };
        // At lat 0, lon 0: map x = east (ECEF y), y = up (ECEF x), z = north (ECEF z).
        let m = MapToEcef {
            translation: wgs84_to_ecef(&origin),
            rotation: nalgebra::Matrix3::new(0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0),
            scale: 1.0,
        };

        mapper.tick(Some(&Pose::default()));
        assert!(mapper.virtual_location().is_none());

        mapper.record_localization(Some(LocalizedPose::new(Matrix4::identity(), m)));
        let camera = Pose::new(Vector3::zeros(), UnitQuaternion::identity());
        mapper.tick(Some(&camera));

        let location = mapper.virtual_location().unwrap();
        assert_relative_eq!(location.latitude, 0.0, epsilon = 1e-6);
        assert_relative_eq!(location.longitude, 0.0, epsilon = 1e-6);
        assert_relative_eq!(location.bearing.unwrap(), 0.0, epsilon = 1e-6);
        assert_eq!(mapper.session().loc_success, 1);
        assert!(mapper.localized_pose().unwrap().last_updated_pose.is_some());
    }

    #[test]
    fn failed_jobs_do_not_stall_later_work() {
        let backend = Arc::new(FakeBackend::new().fail(JobKind::DeleteMap));
        let mut mapper = mapper(&backend);

        mapper.delete_map(MapId(5));
        mapper.list_jobs();
        let reports = drain(&mut mapper);

        assert_eq!(reports.len(), 2);
        assert!(!reports[0].succeeded());
        assert!(reports[1].succeeded());
        assert!(mapper.state().listing.is_some());
    }
}
