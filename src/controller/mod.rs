//! Controller module for memcached-operator.
//!
//! Contains the reconciliation loop, the Service create-or-patch primitive,
//! error handling, status management, and validation logic.

pub mod apply;
pub mod context;
pub mod error;
pub mod reconciler;
pub mod services;
pub mod status;
pub mod validation;
