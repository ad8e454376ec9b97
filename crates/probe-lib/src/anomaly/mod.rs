//! Anomaly detection for restart patterns
//!
//! This module decides whether a pod's restarts point at an out-of-memory
//! condition that a restart alone will not fix.

mod restart_classifier;

pub use restart_classifier::RestartClassifier;
