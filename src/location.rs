//! Device geolocation.
//!
//! The provider is a platform collaborator. Hosts without a location
//! source use [`NoLocation`]; a fixed position from the config file gives
//! [`FixedLocation`].

use serde::Serialize;

use crate::config::LocationConfig;
use crate::model::GeoFilter;

/// How many times `enable` polls an initializing provider.
pub const MAX_WAIT_POLLS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationStatus {
    Stopped,
    Initializing,
    Running,
    Failed,
}

/// One position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub horizontal_accuracy: f64,
    pub vertical_accuracy: f64,
}

impl GeoFix {
    /// A listing filter centered on this fix.
    pub fn filter(&self, radius: f64) -> GeoFilter {
        GeoFilter {
            latitude: self.latitude,
            longitude: self.longitude,
            radius,
        }
    }
}

pub trait LocationProvider: Send {
    /// Whether the user allows location access at all.
    fn enabled_by_user(&self) -> bool;

    fn start(&mut self);

    fn stop(&mut self);

    fn status(&self) -> LocationStatus;

    fn last_fix(&self) -> Option<GeoFix>;

    fn is_running(&self) -> bool {
        self.status() == LocationStatus::Running
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("Location services not enabled")]
    NotEnabled,

    #[error("Location services timed out")]
    TimedOut,

    #[error("Unable to determine device location")]
    Unavailable,
}

/// Start `provider` and wait for it to come up.
///
/// Calls `wait` between status checks, at most `max_polls` times.
pub fn enable(
    provider: &mut dyn LocationProvider,
    max_polls: u32,
    mut wait: impl FnMut(),
) -> Result<(), LocationError> {
    if !provider.enabled_by_user() {
        return Err(LocationError::NotEnabled);
    }

    provider.start();

    let mut remaining = max_polls;
    while provider.status() == LocationStatus::Initializing && remaining > 0 {
        wait();
        remaining -= 1;
    }

    match provider.status() {
        LocationStatus::Running => {
            log::info!("Tracking geolocation");
            Ok(())
        }
        LocationStatus::Initializing => Err(LocationError::TimedOut),
        LocationStatus::Stopped | LocationStatus::Failed => Err(LocationError::Unavailable),
    }
}

/// A device with no location source.
#[derive(Debug, Default)]
pub struct NoLocation;

impl LocationProvider for NoLocation {
    fn enabled_by_user(&self) -> bool {
        false
    }

    fn start(&mut self) {}

    fn stop(&mut self) {}

    fn status(&self) -> LocationStatus {
        LocationStatus::Stopped
    }

    fn last_fix(&self) -> Option<GeoFix> {
        None
    }
}

/// Reports one configured position once started.
#[derive(Debug)]
pub struct FixedLocation {
    fix: GeoFix,
    status: LocationStatus,
}

impl FixedLocation {
    pub fn new(fix: GeoFix) -> Self {
        Self {
            fix,
            status: LocationStatus::Stopped,
        }
    }
}

impl LocationProvider for FixedLocation {
    fn enabled_by_user(&self) -> bool {
        true
    }

    fn start(&mut self) {
        self.status = LocationStatus::Running;
    }

    fn stop(&mut self) {
        self.status = LocationStatus::Stopped;
    }

    fn status(&self) -> LocationStatus {
        self.status
    }

    fn last_fix(&self) -> Option<GeoFix> {
        (self.status == LocationStatus::Running).then_some(self.fix)
    }
}

/// The provider a host should use for `config`.
pub fn select(config: Option<&LocationConfig>) -> Box<dyn LocationProvider> {
    match config {
        Some(c) => Box::new(FixedLocation::new(GeoFix {
            latitude: c.latitude,
            longitude: c.longitude,
            altitude: c.altitude,
            horizontal_accuracy: c.accuracy,
            vertical_accuracy: c.accuracy,
        })),
        None => Box::new(NoLocation),
    }
}
