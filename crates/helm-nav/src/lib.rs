//! Navigation core: flight-mode state machine, mission engine and the platform position and
//! altitude controllers that turn navigation targets into attitude and throttle commands.
//!
//! One [`NavigationContext`] is owned by the flight loop. Each tick the caller feeds estimates
//! (`update_position_and_velocity`, `update_altitude_and_climb_rate`, `update_heading`), pilot
//! input and the IMU sample, then calls [`NavigationContext::tick`] and hands the returned
//! [`NavCommand`] to the rate loop.

pub mod arming;
pub mod config;
pub mod context;
pub mod doctor;
mod driver;
mod entry;
pub mod fixedwing;
pub mod fsm;
pub mod geo;
pub mod gnss;
pub mod helicopter;
mod home;
pub mod landing;
pub mod launch;
pub mod mission;
pub mod modes;
pub mod multicopter;
pub mod rth;
mod sensors;
mod targets;
pub mod trackback;
mod waypoint;

pub use arming::{ArmingBlocker, ArmingClearance};
pub use config::{NavConfig, RcConfig};
pub use context::{DisarmReason, EstimateStatus, ImuSample, NavCommand, NavigationContext, PilotInput};
pub use fsm::{FlightModes, MwError, MwState, NavEvent, NavState, StateFlags};
pub use geo::{GeoOrigin, GeoPoint};
pub use gnss::{GnssThresholds, GpsSolution};
pub use mission::{Waypoint, WaypointAction};
pub use modes::BoxModes;
pub use rth::ForcedRthState;
