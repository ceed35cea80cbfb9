//! Services layer for identity-service.
//!
//! Storage traits with Postgres, Redis and in-memory implementations, and the
//! id allocation, name reservation and authorization logic built on them.

pub mod audit;
pub mod authorization;
mod database;
pub mod error;
pub mod id_allocator;
pub mod memory;
pub mod principal_graph;
pub mod redis;
pub mod reservations;
pub mod store;

pub use audit::{AuditSink, RecordingAuditSink, TracingAuditSink};
pub use authorization::{AuthorizationEngine, NewPrincipal};
pub use database::Database;
pub use error::{ServiceError, StoreError};
pub use id_allocator::{IdAllocator, IdReplenisher};
pub use memory::MemoryStore;
pub use principal_graph::PrincipalGraph;
pub use redis::{MemoryCoordinator, RedisCoordinator};
pub use reservations::{NameReservationService, SecurableObject};
pub use store::{
    ClusterLock, HealthCheck, IdQueue, MembershipStore, PermissionStore, PrincipalDirectory,
    RangeStore, ReservationStore,
};
