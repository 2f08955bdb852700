use std::time::{Duration, Instant};

use crate::GcsRequest;

#[derive(Debug, Clone, Default)]
pub struct LinkStatus {
    pub connected: bool,
    pub gcs_sys_id: Option<u8>,
    pub last_heartbeat: Option<Instant>,
    pub last_request: Option<GcsRequest>,
    pub dropped_requests: u32,
}

impl LinkStatus {
    pub fn hb_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }

    /// A ground station is considered lost after three missed 1 Hz heartbeats.
    pub fn gcs_alive(&self) -> bool {
        self.hb_age().is_some_and(|age| age < Duration::from_secs(3))
    }
}
