//! HTTP handlers for identity-service.

pub mod ids;
pub mod metrics;
pub mod permissions;
pub mod principals;
pub mod reservations;
