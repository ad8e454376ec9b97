//! Remediation of out-of-memory workloads
//!
//! This module provides:
//! - Memory limit computation (baseline × factor)
//! - Conflict-retried deployment updates
//! - Bounded, cancellable waiting for the rollout to become ready

mod applier;
mod retry;

pub use applier::{
    compute_memory_limit, effective_factor, set_memory_limit, RemediationApplier,
    RemediationSettings, DEFAULT_BASELINE_MEMORY_BYTES, DEFAULT_FACTOR,
};
pub use retry::{retry_on_conflict, RetryPolicy};
