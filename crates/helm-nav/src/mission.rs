use helm_ctrl::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Capacity of the mission store, all missions included.
pub const MAX_WAYPOINTS: usize = 60;
/// Flag value terminating a mission.
pub const FLAG_LAST: u8 = 0xA5;
/// Waypoint number addressing the home position.
pub const WP_HOME: u8 = 0;
/// Waypoint number addressing the current (or desired) position.
pub const WP_CURRENT: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WaypointAction {
    #[default]
    Waypoint = 1,
    HoldTime = 3,
    Rth = 4,
    SetPoi = 5,
    Jump = 6,
    SetHead = 7,
    Land = 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown waypoint action {0}")]
pub struct UnknownAction(pub u8);

impl TryFrom<u8> for WaypointAction {
    type Error = UnknownAction;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Ok(match v {
            1 => Self::Waypoint,
            3 => Self::HoldTime,
            4 => Self::Rth,
            5 => Self::SetPoi,
            6 => Self::Jump,
            7 => Self::SetHead,
            8 => Self::Land,
            other => return Err(UnknownAction(other)),
        })
    }
}

impl WaypointAction {
    /// Actions that carry a geographic position.
    pub fn is_geo(self) -> bool {
        matches!(self, Self::Waypoint | Self::HoldTime | Self::Land | Self::SetPoi)
    }
}

/// One mission record. Coordinates in 1e-7 degrees, altitude in cm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Waypoint {
    pub action: WaypointAction,
    pub lat: i32,
    pub lon: i32,
    pub alt: i32,
    pub p1: i16,
    pub p2: i16,
    pub p3: i16,
    pub flag: u8,
}

impl Waypoint {
    pub fn is_last(&self) -> bool {
        self.flag == FLAG_LAST
    }

    /// Altitude counts from mean sea level rather than from home.
    pub fn absolute_altitude(&self) -> bool {
        self.action.is_geo() && self.p3 & 1 != 0
    }
}

/// Heading policy set by SET_POI / SET_HEAD while flying a mission.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum WaypointHeading {
    #[default]
    None,
    /// Centidegrees.
    Fixed(i32),
    Poi(Vec3),
}

/// The waypoint currently being flown, resolved into the local frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActiveWaypoint {
    pub pos: Vec3,
    /// Bearing from the position where the leg started, centidegrees.
    pub yaw: i32,
    pub distance: f32,
    pub initial_distance: f32,
    pub initial_altitude: f32,
    pub altitude_reached: bool,
    pub reached_at_ms: Option<u64>,
}

/// Waypoint store: a volatile working list plus a persisted copy, split into missions by `FLAG_LAST`.
#[derive(Debug, Clone, Default)]
pub struct Mission {
    list: Vec<Waypoint>,
    stored: Vec<Waypoint>,
    valid: bool,
    start: usize,
    count: usize,
    active: usize,
    mission_count: u8,
    needs_restart: bool,
}

impl Mission {
    /// Number of waypoints in the selected mission.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Waypoints across all missions.
    pub fn total(&self) -> usize {
        self.list.len()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn start_index(&self) -> usize {
        self.start
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn mission_count(&self) -> u8 {
        self.mission_count
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.list[self.start..self.start + self.count]
    }

    pub fn get(&self, index: usize) -> Option<&Waypoint> {
        self.list.get(index)
    }

    pub fn active(&self) -> Option<&Waypoint> {
        self.list.get(self.active)
    }

    pub(crate) fn active_mut(&mut self) -> Option<&mut Waypoint> {
        self.list.get_mut(self.active)
    }

    pub fn active_action(&self) -> Option<WaypointAction> {
        self.active().map(|wp| wp.action)
    }

    pub(crate) fn set_active(&mut self, index: usize) {
        self.active = index;
    }

    /// Last waypoint of the selected mission, or flagged as such.
    pub fn is_last_active(&self) -> bool {
        self.active + 1 >= self.start + self.count || self.active().is_some_and(Waypoint::is_last)
    }

    pub fn reset(&mut self) {
        self.list.clear();
        self.valid = false;
        self.start = 0;
        self.count = 0;
        self.active = 0;
        self.mission_count = 0;
    }

    /// Sequential upload. `index` is 0-based and must extend the list by exactly one record.
    /// JUMP targets arrive 1-based and are stored 0-based. The JUMP counter in p3 is kept as
    /// received and seeded from p2 when the mission (re)starts.
    pub fn upload(&mut self, index: usize, mut wp: Waypoint) -> bool {
        if index >= MAX_WAYPOINTS || !(index == 0 || index == self.list.len()) {
            return false;
        }
        if wp.action == WaypointAction::Jump {
            match wp.p1.checked_sub(1) {
                Some(p1) => wp.p1 = p1,
                None => return false,
            }
        }
        if index == 0 {
            self.reset();
        }
        self.list.push(wp);
        self.valid = wp.is_last();
        if self.valid {
            self.select(1);
        } else {
            self.count = self.list.len();
        }
        true
    }

    /// Record as a ground station expects it back.
    pub fn download(&self, index: usize) -> Option<Waypoint> {
        self.list.get(index).map(|wp| {
            let mut out = *wp;
            if out.action == WaypointAction::Jump {
                out.p1 += 1;
            }
            out
        })
    }

    /// Selects mission `n` (1-based) of a multi-mission list. Falls back to the first.
    pub fn select(&mut self, n: u8) {
        let bounds = mission_bounds(&self.list);
        self.mission_count = u8::try_from(bounds.len()).unwrap_or(u8::MAX);
        let (start, end) = bounds
            .get(usize::from(n.max(1)) - 1)
            .or_else(|| bounds.first())
            .copied()
            .unwrap_or((0, self.list.len()));
        self.start = start;
        self.count = end - start;
        self.active = start;
        if self.mission_count > 1 {
            info!("mission {} of {} selected, {} waypoints", n, self.mission_count, self.count);
        }
    }

    pub fn load_stored(&mut self) -> bool {
        if self.stored.is_empty() {
            return false;
        }
        self.list = self.stored.clone();
        self.valid = self.list.last().is_some_and(Waypoint::is_last);
        self.select(1);
        self.clear_jump_counters();
        info!("loaded {} stored waypoints", self.list.len());
        true
    }

    pub fn save_stored(&mut self) -> bool {
        if !self.valid {
            return false;
        }
        self.stored = self.list.clone();
        true
    }

    pub fn stored(&self) -> &[Waypoint] {
        &self.stored
    }

    // ----- Jump counters -----

    pub fn clear_jump_counters(&mut self) {
        for wp in self.list.iter_mut().filter(|wp| wp.action == WaypointAction::Jump) {
            wp.p3 = wp.p2;
        }
    }

    pub fn reset_jump_counter(&mut self, index: usize) {
        if let Some(wp) = self.list.get_mut(index) {
            wp.p3 = wp.p2;
        }
    }

    /// Resolves a JUMP at the active index. Returns the next index to process,
    /// or `None` when the fallthrough runs off the end of the mission.
    pub(crate) fn resolve_jump(&mut self) -> Option<usize> {
        let last = self.start + self.count.saturating_sub(1);
        let index = self.active;
        let wp = self.list.get_mut(index)?;
        if wp.p3 != -1 {
            if wp.p3 <= 0 {
                wp.p3 = wp.p2;
                debug!("jump at {} exhausted", index);
                return (index < last).then_some(index + 1);
            }
            wp.p3 -= 1;
        }
        Some(self.start + usize::try_from(wp.p1).unwrap_or(0))
    }

    /// Starts over from the first waypoint on the next mission entry.
    pub fn restart(&mut self) {
        self.active = self.start;
        self.needs_restart = false;
        self.clear_jump_counters();
    }

    pub(crate) fn mark_finished(&mut self) {
        self.needs_restart = true;
    }

    pub(crate) fn needs_restart(&self) -> bool {
        self.needs_restart || self.active < self.start || self.active >= self.start + self.count
    }

    /// Index of the first JUMP whose target is unusable.
    pub fn invalid_jump(&self) -> Option<usize> {
        let wps = self.waypoints();
        wps.iter().enumerate().find_map(|(i, wp)| {
            if wp.action != WaypointAction::Jump {
                return None;
            }
            let bad_target = match usize::try_from(wp.p1) {
                Err(_) => true,
                Ok(t) => {
                    i == 0
                        || t == i
                        || t == i + 1
                        || t >= wps.len()
                        || !matches!(
                            wps[t].action,
                            WaypointAction::Waypoint | WaypointAction::HoldTime | WaypointAction::Land
                        )
                }
            };
            // -1 repeats forever, anything below is not a count
            (bad_target || wp.p2 < -1).then_some(i)
        })
    }
}

/// Half-open index ranges of the missions packed in `list`.
fn mission_bounds(list: &[Waypoint]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, wp) in list.iter().enumerate() {
        if wp.is_last() {
            out.push((start, i + 1));
            start = i + 1;
        }
    }
    if start < list.len() {
        out.push((start, list.len()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wp(action: WaypointAction) -> Waypoint {
        Waypoint { action, lat: 470_000_000, lon: 80_000_000, alt: 1000, ..Default::default() }
    }

    fn jump(to_1based: i16, repeat: i16) -> Waypoint {
        Waypoint { action: WaypointAction::Jump, p1: to_1based, p2: repeat, ..Default::default() }
    }

    fn last(mut w: Waypoint) -> Waypoint {
        w.flag = FLAG_LAST;
        w
    }

    fn upload_all(m: &mut Mission, wps: &[Waypoint]) {
        for (i, w) in wps.iter().enumerate() {
            assert!(m.upload(i, *w));
        }
    }

    #[test]
    fn upload_must_be_sequential() {
        let mut m = Mission::default();
        assert!(m.upload(0, wp(WaypointAction::Waypoint)));
        assert!(!m.upload(2, wp(WaypointAction::Waypoint)));
        assert!(m.upload(1, last(wp(WaypointAction::Waypoint))));
        assert!(m.is_valid());
        assert_eq!(m.count(), 2);
    }

    #[test]
    fn jump_target_is_stored_zero_based() {
        let mut m = Mission::default();
        upload_all(&mut m, &[wp(WaypointAction::Waypoint), jump(1, 2), last(wp(WaypointAction::Waypoint))]);
        assert_eq!(m.get(1).map(|w| w.p1), Some(0));
        assert_eq!(m.download(1).map(|w| w.p1), Some(1));
        assert_eq!(m.download(0), Some(wp(WaypointAction::Waypoint)));
    }

    #[test]
    fn jump_downloads_as_uploaded() {
        let mut m = Mission::default();
        let j = Waypoint { p3: 0, flag: FLAG_LAST, ..jump(1, 2) };
        upload_all(&mut m, &[wp(WaypointAction::Waypoint), j]);
        assert_eq!(m.download(1), Some(j));
        // the counter is seeded when the mission starts, not on upload
        m.restart();
        assert_eq!(m.get(1).map(|w| w.p3), Some(2));
    }

    #[test]
    fn jump_target_below_range_is_rejected() {
        let mut m = Mission::default();
        assert!(m.upload(0, wp(WaypointAction::Waypoint)));
        assert!(!m.upload(1, jump(i16::MIN, 1)));
        assert_eq!(m.total(), 1);
        // 0 on the wire is out of range but representable, left to the arming check
        assert!(m.upload(1, last(jump(0, 1))));
        assert_eq!(m.invalid_jump(), Some(1));
    }

    #[test]
    fn jump_loops_then_falls_through() {
        let mut m = Mission::default();
        upload_all(&mut m, &[wp(WaypointAction::Waypoint), jump(1, 2), last(wp(WaypointAction::Waypoint))]);
        m.restart();
        m.set_active(1);
        assert_eq!(m.resolve_jump(), Some(0));
        assert_eq!(m.get(1).map(|w| w.p3), Some(1));
        assert_eq!(m.resolve_jump(), Some(0));
        assert_eq!(m.get(1).map(|w| w.p3), Some(0));
        assert_eq!(m.resolve_jump(), Some(2));
        // counter re-armed for an enclosing loop
        assert_eq!(m.get(1).map(|w| w.p3), Some(2));
    }

    #[test]
    fn infinite_jump_never_counts_down() {
        let mut m = Mission::default();
        upload_all(&mut m, &[wp(WaypointAction::Waypoint), jump(1, -1), last(wp(WaypointAction::Waypoint))]);
        m.restart();
        m.set_active(1);
        for _ in 0..10 {
            assert_eq!(m.resolve_jump(), Some(0));
        }
        assert_eq!(m.get(1).map(|w| w.p3), Some(-1));
    }

    #[test]
    fn clear_jump_counters_restores_repeat_count() {
        let mut m = Mission::default();
        upload_all(&mut m, &[wp(WaypointAction::Waypoint), jump(1, 3), last(wp(WaypointAction::Waypoint))]);
        m.restart();
        m.set_active(1);
        m.resolve_jump();
        m.resolve_jump();
        m.clear_jump_counters();
        assert_eq!(m.get(1).map(|w| w.p3), Some(3));
    }

    #[test]
    fn invalid_jumps_are_reported() {
        let mut m = Mission::default();
        upload_all(&mut m, &[jump(2, 1), last(wp(WaypointAction::Waypoint))]);
        assert_eq!(m.invalid_jump(), Some(0));

        let mut m = Mission::default();
        upload_all(
            &mut m,
            &[wp(WaypointAction::Waypoint), wp(WaypointAction::Waypoint), jump(3, 1), last(wp(WaypointAction::Waypoint))],
        );
        assert_eq!(m.invalid_jump(), Some(2));

        let mut m = Mission::default();
        upload_all(&mut m, &[wp(WaypointAction::Waypoint), jump(9, 1), last(wp(WaypointAction::Waypoint))]);
        assert_eq!(m.invalid_jump(), Some(1));

        let mut m = Mission::default();
        upload_all(&mut m, &[wp(WaypointAction::Waypoint), jump(1, 1), last(wp(WaypointAction::Waypoint))]);
        assert_eq!(m.invalid_jump(), None);

        let mut m = Mission::default();
        upload_all(&mut m, &[wp(WaypointAction::Waypoint), jump(1, -2), last(wp(WaypointAction::Waypoint))]);
        assert_eq!(m.invalid_jump(), Some(1));
    }

    #[test]
    fn negative_counter_counts_as_exhausted() {
        let mut m = Mission::default();
        let j = Waypoint { p3: i16::MIN, ..jump(1, 1) };
        upload_all(&mut m, &[wp(WaypointAction::Waypoint), j, last(wp(WaypointAction::Waypoint))]);
        m.set_active(1);
        assert_eq!(m.resolve_jump(), Some(2));
        assert_eq!(m.get(1).map(|w| w.p3), Some(1));
    }

    #[test]
    fn multi_mission_selection() {
        let mut m = Mission::default();
        upload_all(
            &mut m,
            &[
                wp(WaypointAction::Waypoint),
                last(wp(WaypointAction::Waypoint)),
                wp(WaypointAction::HoldTime),
                wp(WaypointAction::Waypoint),
                last(wp(WaypointAction::Land)),
            ],
        );
        m.select(2);
        assert_eq!(m.mission_count(), 2);
        assert_eq!(m.start_index(), 2);
        assert_eq!(m.count(), 3);
        assert_eq!(m.active_index(), 2);
        assert_eq!(m.waypoints()[0].action, WaypointAction::HoldTime);
        m.select(7);
        assert_eq!(m.start_index(), 0);
    }

    #[test]
    fn stored_list_round_trips() {
        let mut m = Mission::default();
        assert!(!m.save_stored());
        upload_all(&mut m, &[wp(WaypointAction::Waypoint), last(wp(WaypointAction::Land))]);
        assert!(m.save_stored());
        m.reset();
        assert_eq!(m.count(), 0);
        assert!(m.load_stored());
        assert_eq!(m.count(), 2);
        assert!(m.is_valid());
    }

    #[test]
    fn altitude_datum_bit_only_on_geo_actions() {
        let mut w = wp(WaypointAction::Waypoint);
        w.p3 = 1;
        assert!(w.absolute_altitude());
        let j = Waypoint { p3: 1, ..jump(1, 1) };
        assert!(!j.absolute_altitude());
    }
}
