//! Custom Resource Definitions (CRDs) for memcached-operator.
//!
//! - `Memcached`: a Memcached database whose Services the operator manages

mod memcached;

pub use memcached::*;
