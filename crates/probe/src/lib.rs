//! Heal probe service: HTTP surface, configuration and shutdown handling

pub mod api;
pub mod config;
pub mod shutdown;
