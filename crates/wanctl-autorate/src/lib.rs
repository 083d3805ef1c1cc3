//! wanctl Autorate - CAKE bandwidth control
//!
//! Shrinks the router's CAKE limits the moment queueing delay appears and
//! grows them back slowly once the link has been quiet for a while.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │                AutorateDaemon              │
//! │  interval tick ─► WanController::run_cycle │
//! └──────┬───────────────┬──────────────┬──────┘
//!        │ RttSource     │ RouterControl│ StateFile
//!        ▼               ▼              ▼
//!   baseline / load   set_limits    ewma + queue state
//!   QueueController (download 4-state, upload 3-state)
//! ```

pub mod config;
pub mod controller;
pub mod daemon;
pub mod queue;
pub mod state;

pub use config::AutorateConfig;
pub use controller::{AutorateDeps, AutorateSnapshot, CycleOutcome, WanController};
pub use daemon::AutorateDaemon;
pub use queue::{QueueConfig, QueueController, QueueState, QueueThresholds, Zone};
pub use state::{AutorateState, EwmaState, LastApplied};
