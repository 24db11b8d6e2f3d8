//! Ambient runtime configuration for the gw workspace.
//!
//! Keeps the pieces every binary and test needs but no model code should own:
//! deterministic seeding driven by environment variables and global tracing
//! subscriber installation.

pub mod determinism;
pub mod tracing;
