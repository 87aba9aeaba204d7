//! Capture session state: counters, image bank, and capture tagging.

use jiff::Timestamp;
use serde::Serialize;
use uuid::Uuid;

/// FNV-1a 32-bit prime.
const FNV_PRIME: u32 = 16_777_619;

/// Mutable state of one mapping session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub id: Uuid,
    pub started_at: Timestamp,

    /// Jobs queued or in flight, as of the last tick.
    pub queue_len: usize,

    /// Images in the workspace, as of the last status poll.
    pub image_count: u32,

    pub loc_success: u32,
    pub loc_failure: u32,

    bank: u32,
    image_run: u32,
    image_index: u32,
    first_image: bool,
}

/// Labels one captured image so the backend can group and order it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureTag {
    pub run: u32,
    pub index: u32,
    pub bank: u32,
    pub anchor: bool,
}

impl CaptureTag {
    /// A file stem unique within a run, sortable by capture order.
    pub fn file_stem(&self) -> String {
        let suffix = if self.anchor { "-anchor" } else { "" };
        format!("{:08x}-{}-{:05}{suffix}", self.run, self.bank, self.index)
    }
}

/// Whether the backend is reachable, reported after a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionNotice {
    Connected,
    Disconnected,
}

impl ConnectionNotice {
    pub fn message(self) -> &'static str {
        match self {
            Self::Connected => "Connected to mapping service",
            Self::Disconnected => "Failed to connect to mapping service",
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        let mut state = Self {
            id: Uuid::new_v4(),
            started_at: Timestamp::now(),
            queue_len: 0,
            image_count: 0,
            loc_success: 0,
            loc_failure: 0,
            bank: 0,
            image_run: 0,
            image_index: 0,
            first_image: true,
        };
        state.reseed_image_run();
        state
    }

    /// Zero the counters. The bank and image run survive.
    pub fn reset(&mut self) {
        self.queue_len = 0;
        self.image_count = 0;
        self.loc_success = 0;
        self.loc_failure = 0;
        self.image_index = 0;
        self.first_image = true;
    }

    pub fn bank(&self) -> u32 {
        self.bank
    }

    /// Advance to the next bank, wrapping at `max_banks`.
    ///
    /// With `max_banks == 0` the bank is left alone.
    pub fn switch_bank(&mut self, max_banks: u32) -> u32 {
        if max_banks == 0 {
            log::warn!("no image banks available; staying on bank {}", self.bank);
            return self.bank;
        }
        self.bank = (self.bank + 1) % max_banks;
        self.first_image = true;
        log::info!("switched to bank {}", self.bank);
        self.bank
    }

    /// Select `bank` directly. Fails if it is not below `max_banks`.
    pub fn select_bank(&mut self, bank: u32, max_banks: u32) -> Result<(), String> {
        if bank >= max_banks {
            return Err(format!("bank {bank} out of range (0..{max_banks})"));
        }
        self.bank = bank;
        Ok(())
    }

    pub fn image_run(&self) -> u32 {
        self.image_run
    }

    /// Mix the current time into the image run.
    pub fn reseed_image_run(&mut self) {
        self.mix_image_run(Timestamp::now());
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn mix_image_run(&mut self, now: Timestamp) {
        let bits = now.as_nanosecond() as u64;
        let data = (bits as u32) ^ ((bits >> 32) as u32);
        self.image_run = (self.image_run ^ data).wrapping_mul(FNV_PRIME);
    }

    /// Whether the next capture is the first since the session (re)started.
    pub fn is_first_image(&self) -> bool {
        self.first_image
    }

    /// Treat the next capture as the first of the session.
    pub fn mark_first_image(&mut self) {
        self.first_image = true;
    }

    /// Tag for the next captured image. Advances the image index.
    pub fn next_capture(&mut self, anchor: bool) -> CaptureTag {
        let tag = CaptureTag {
            run: self.image_run,
            index: self.image_index,
            bank: self.bank,
            anchor,
        };
        self.image_index += 1;
        tag
    }

    /// Record that a capture was submitted.
    ///
    /// Returns a notice for every capture except the first of the session.
    pub fn record_capture(&mut self, connected: bool) -> Option<ConnectionNotice> {
        let notice = if self.first_image {
            None
        } else if connected {
            Some(ConnectionNotice::Connected)
        } else {
            Some(ConnectionNotice::Disconnected)
        };
        self.first_image = false;
        notice
    }

    pub fn record_localization(&mut self, success: bool) {
        if success {
            self.loc_success += 1;
        } else {
            self.loc_failure += 1;
        }
    }

    pub fn reset_localization_counters(&mut self) {
        self.loc_success = 0;
        self.loc_failure = 0;
    }

    pub fn set_image_count(&mut self, count: u32) {
        self.image_count = count;
    }
}
