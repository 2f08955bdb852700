use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::GcsRequest;

/// Drops repeats of the same request inside `min_interval`.
#[derive(Debug)]
pub struct CommandRateLimit {
    last: HashMap<GcsRequest, Instant>,
    min_interval: Duration,
}

impl CommandRateLimit {
    pub fn new(min_interval: Duration) -> Self {
        Self { last: HashMap::new(), min_interval }
    }

    pub fn allow(&mut self, req: GcsRequest) -> bool {
        self.allow_at(req, Instant::now())
    }

    pub fn allow_at(&mut self, req: GcsRequest, now: Instant) -> bool {
        if let Some(t) = self.last.get(&req) {
            if now.saturating_duration_since(*t) < self.min_interval {
                return false;
            }
        }
        self.last.insert(req, now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_inside_the_window_are_dropped() {
        let mut l = CommandRateLimit::new(Duration::from_secs(2));
        let t0 = Instant::now();
        assert!(l.allow_at(GcsRequest::ReturnToLaunch, t0));
        assert!(!l.allow_at(GcsRequest::ReturnToLaunch, t0 + Duration::from_millis(1500)));
        // independent per request
        assert!(l.allow_at(GcsRequest::Hold, t0 + Duration::from_millis(1500)));
        assert!(l.allow_at(GcsRequest::ReturnToLaunch, t0 + Duration::from_secs(2)));
    }
}
