//! wanctl Steering - move latency-sensitive traffic off a congested WAN
//!
//! Reads the baseline RTT autorate publishes, classifies each cycle as
//! GREEN/YELLOW/RED from RTT and CAKE signals, and flips a routing rule
//! once the hysteresis streaks agree.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   SteeringDaemon                    │
//! │    interval tick ─► SteeringController::run_cycle   │
//! └───┬────────────┬─────────────┬───────────────┬──────┘
//!     │ loader     │ RttSource   │ CakeStats     │ RouterControl
//!     ▼            ▼             ▼               ▼
//!  autorate     delta/EWMA   CakeReadHealth   enable/disable rule
//!  state file        └──► assess ──► SteeringStateMachine
//!                                └──► ConfidenceController (optional)
//! ```

pub mod cake_health;
pub mod confidence;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod loader;
pub mod machine;
pub mod state;

pub use cake_health::CakeReadHealth;
pub use confidence::{ConfidenceConfig, ConfidenceController, SteeringAction};
pub use config::SteeringConfig;
pub use controller::{SteeringController, SteeringDeps, SteeringOutcome, SteeringSnapshot};
pub use daemon::SteeringDaemon;
pub use loader::BaselineRttLoader;
pub use machine::{SteeringState, SteeringStateMachine, TransitionRecord};
pub use state::SteeringRecord;
