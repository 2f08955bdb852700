pub mod telemetry;
pub mod waypoint;

pub use telemetry::{FlightEvent, FlightEventKind, NavTelemetry, Record};
pub use waypoint::CodecError;
