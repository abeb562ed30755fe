//! Per-case and per-suite execution: requirement gating, the body/cleanup
//! state machine and the manifest-driven walk that ties them together.

pub mod executor;
pub mod requirements;
pub mod walker;

pub use executor::run_case;
pub use walker::run_suite;
