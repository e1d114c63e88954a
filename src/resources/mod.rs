//! Resource generation module.
//!
//! Contains utilities for building the Kubernetes resources owned by a Memcached.
//!
//! ## Resources Managed
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | Database Service | Client access on the Memcached port (11211) |
//! | Stats Service | Prometheus exporter endpoint, only when monitoring is enabled |

pub mod common;
pub mod ports;
pub mod services;

// Re-export commonly used items from common
pub use common::{owner_reference, service_name, stats_service_name};
