pub mod continuity;
pub mod engine;
pub mod heartbeat;
pub mod thresholds;

pub use engine::{AlertEngine, CautionDelivery, Channels, HeartbeatOutcome};
pub use thresholds::{Tier, classify};
