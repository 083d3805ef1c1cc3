//! Anti-Corruption Layer (ACL)
//!
//! Translates between the controller's narrow interfaces and RouterOS:
//! - Domain side effects (steer, set limits) become CLI commands
//! - RouterOS print output is validated before entering the domain
//! - Cumulative counters become per-read deltas

pub mod routeros;

pub use routeros::{RouterOs, RouterOsSettings};
