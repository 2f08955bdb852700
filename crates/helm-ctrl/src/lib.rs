pub mod filter;
pub mod math;
pub mod pid;
pub mod profile;
pub mod rate;
pub mod ring;
pub mod rpm;
pub mod smith;
pub mod sqrt;

pub use math::Vec3;
pub use pid::{PidController, PidFlags};
pub use profile::{Airframe, PidBank, PidBanks, PidProfile, ThrottleConfig};
pub use rate::{RateController, RateControllerKind, RateInputs, RateModes};
pub use ring::RingBuffer;
