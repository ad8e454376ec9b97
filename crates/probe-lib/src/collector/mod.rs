//! Observation of the watched workload
//!
//! This module provides the read-only side of the probe: discovery of the
//! addresses that should be reachable (service cluster IPs and pod IPs) and
//! pod memory usage reads from the metrics API.

mod addresses;
mod memory;
mod quantity;

pub use addresses::collect_addresses;
pub use memory::read_memory;
pub use quantity::{parse_bytes, QuantityError};
