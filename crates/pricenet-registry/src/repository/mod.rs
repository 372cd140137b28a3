//! # Registry Repositories
//!
//! Repository pattern for registry access.
//!
//! ## Structure
//! - [`agent`] - Agent presence rows (one per canonical identifier)
//! - [`device`] - Legacy device rows keyed on (agent_id, device_id)
//! - [`store`] - Per-agent store links + networked device CRUD
//!
//! All identifiers are normalized at the repository boundary; a repository
//! never stores or matches an un-normalized identifier.

pub mod agent;
pub mod device;
pub mod store;

pub use agent::{AgentRepository, AgentStatusUpdate};
pub use device::DeviceRepository;
pub use store::{StoreEntry, StoreRepository};
