use helm_ctrl::math::wrap_18000;
use helm_ctrl::{RingBuffer, Vec3};
use tracing::debug;

use crate::geo::distance_xy;

pub const TRACKBACK_POINTS: usize = 50;

const COURSE_CHANGE_CD: i32 = 4500;
const ALTITUDE_CHANGE_CM: f32 = 1000.0;
const MAX_SPACING_CM: f32 = 2000.0;
/// Course is only meaningful above this ground speed.
pub(crate) const MIN_COURSE_SPEED: f32 = 100.0;
/// A turn must also have moved this far to be recorded.
const MIN_SPACING_CM: f32 = 200.0;

/// Breadcrumb trail of the outbound flight, retraced in reverse on RTH.
#[derive(Debug, Clone, Default)]
pub struct Trackback {
    points: RingBuffer<Vec3, TRACKBACK_POINTS>,
    last_course: i32,
    /// Where retracing began, `None` while recording.
    started_at: Option<Vec3>,
}

impl Trackback {
    pub fn clear(&mut self) {
        self.points.clear();
        self.started_at = None;
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn points(&self) -> impl Iterator<Item = &Vec3> {
        self.points.iter()
    }

    /// Stores `pos` when the course, altitude or distance since the last point changed enough.
    /// Course in centidegrees, `None` when too slow to tell.
    pub fn record(&mut self, pos: Vec3, course: Option<i32>) -> bool {
        if self.is_active() {
            return false;
        }
        let store = match self.points.newest() {
            None => true,
            Some(last) => {
                let dist = distance_xy(last, &pos);
                let turned = course.is_some_and(|c| wrap_18000(c - self.last_course).abs() > COURSE_CHANGE_CD);
                let climbed = (pos.z - last.z).abs() > ALTITUDE_CHANGE_CM;
                dist > MAX_SPACING_CM || climbed || (dist > MIN_SPACING_CM && turned)
            }
        };
        if store {
            self.points.push(pos);
            if let Some(c) = course {
                self.last_course = c;
            }
        }
        store
    }

    /// Switches to retracing from `pos`. Needs at least one point.
    pub fn begin(&mut self, pos: Vec3) -> bool {
        if self.points.is_empty() {
            return false;
        }
        debug!("trackback over {} points", self.points.len());
        self.started_at = Some(pos);
        true
    }

    pub fn target(&self) -> Option<Vec3> {
        self.points.newest().copied()
    }

    /// Drops the point just reached. Returns false once the trail is used up.
    pub fn advance(&mut self) -> bool {
        self.points.pop_newest();
        !self.points.is_empty()
    }

    /// Retracing stops once `pos` is farther than `limit_cm` from where it began.
    pub fn limit_exceeded(&self, pos: &Vec3, limit_cm: f32) -> bool {
        self.started_at.is_some_and(|start| distance_xy(&start, pos) > limit_cm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_on_distance() {
        let mut t = Trackback::default();
        assert!(t.record(Vec3::ZERO, Some(0)));
        assert!(!t.record(Vec3::new(1500.0, 0.0, 0.0), Some(0)));
        assert!(t.record(Vec3::new(2100.0, 0.0, 0.0), Some(0)));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn records_on_turn_and_climb() {
        let mut t = Trackback::default();
        t.record(Vec3::ZERO, Some(0));
        assert!(t.record(Vec3::new(500.0, 0.0, 0.0), Some(9000)));
        assert!(!t.record(Vec3::new(1000.0, 0.0, 0.0), Some(9500)));
        assert!(t.record(Vec3::new(1000.0, 0.0, 1200.0), None));
    }

    #[test]
    fn vertical_climb_is_recorded_without_moving() {
        let mut t = Trackback::default();
        t.record(Vec3::ZERO, None);
        assert!(!t.record(Vec3::new(0.0, 0.0, 900.0), None));
        assert!(t.record(Vec3::new(0.0, 0.0, 1500.0), None));
        assert!(t.record(Vec3::new(50.0, 0.0, 300.0), None));
        assert_eq!(t.len(), 3);
        assert!(t.begin(Vec3::new(50.0, 0.0, 300.0)));
        assert_eq!(t.target().map(|p| p.z), Some(300.0));
        t.advance();
        assert_eq!(t.target().map(|p| p.z), Some(1500.0));
    }

    #[test]
    fn oldest_points_are_overwritten() {
        let mut t = Trackback::default();
        for i in 0..(TRACKBACK_POINTS + 5) {
            t.record(Vec3::new(i as f32 * 3000.0, 0.0, 0.0), Some(0));
        }
        assert_eq!(t.len(), TRACKBACK_POINTS);
        assert_eq!(t.points().last().map(|p| p.x), Some(5.0 * 3000.0));
    }

    #[test]
    fn retraces_newest_first() {
        let mut t = Trackback::default();
        for i in 0..3 {
            t.record(Vec3::new(i as f32 * 3000.0, 0.0, 0.0), Some(0));
        }
        assert!(t.begin(Vec3::new(7000.0, 0.0, 0.0)));
        assert!(!t.record(Vec3::new(9000.0, 0.0, 0.0), Some(0)));
        assert_eq!(t.target().map(|p| p.x), Some(6000.0));
        assert!(t.advance());
        assert_eq!(t.target().map(|p| p.x), Some(3000.0));
        assert!(t.advance());
        assert!(!t.advance());
    }

    #[test]
    fn distance_limit() {
        let mut t = Trackback::default();
        t.record(Vec3::ZERO, None);
        t.begin(Vec3::new(10_000.0, 0.0, 0.0));
        assert!(!t.limit_exceeded(&Vec3::new(6000.0, 0.0, 0.0), 5000.0));
        assert!(t.limit_exceeded(&Vec3::new(4000.0, 0.0, 0.0), 5000.0));
    }

    #[test]
    fn begin_needs_points() {
        let mut t = Trackback::default();
        assert!(!t.begin(Vec3::ZERO));
        assert!(!t.is_active());
    }
}
