//! # pricenet-registry: Presence Registry for PriceNet
//!
//! This crate owns all database operations for the central registry: agent
//! presence, device inventory, store links, and the periodic identity
//! reconciliation pass that converges drifting agent identities.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Registry Architecture                             │
//! │                                                                         │
//! │  Admin API layer (out of core)        Field agents (heartbeats)        │
//! │        │                                     │                          │
//! │        └──────────────┬──────────────────────┘                          │
//! │                       ▼                                                 │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      Registry (facade)                           │  │
//! │  │                                                                  │  │
//! │  │  report_agent_status / report_device_batch                       │  │
//! │  │  list_agents / list_agent_devices (presence-annotated)           │  │
//! │  └──────┬──────────────────┬──────────────────┬─────────────────────┘  │
//! │         ▼                  ▼                  ▼                         │
//! │  ┌────────────┐  ┌──────────────────┐  ┌──────────────┐               │
//! │  │ AgentRepo  │  │   DeviceRepo     │  │  StoreRepo   │               │
//! │  │            │  │                  │  │              │               │
//! │  │ upsert per │  │ insert-or-replace│  │ replace      │               │
//! │  │ normalized │  │ on (agent,device)│  │ wholesale    │               │
//! │  │ id         │  │ field coalesce   │  │              │               │
//! │  └─────┬──────┘  └────────┬─────────┘  └──────┬───────┘               │
//! │        │                  │                   │                        │
//! │        └─────────┬────────┴───────────────────┘                        │
//! │                  ▼                                                     │
//! │  ┌──────────────────────────────────────────┐   ┌───────────────────┐ │
//! │  │          SQLite (WAL, pooled)            │◄──│IdentityReconciler │ │
//! │  │   agents / devices / agent_stores /      │   │ merge by id,      │ │
//! │  │   networked_devices                      │   │ merge by address, │ │
//! │  └──────────────────────────────────────────┘   │ orphan reattach   │ │
//! │                                                 └───────────────────┘ │
//! │                                                                         │
//! │  WRITE SERIALIZATION:                                                  │
//! │  ────────────────────                                                  │
//! │  KeyedLocks serializes writes per agent id / per (agent id, device    │
//! │  id); writes under different keys never contend.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`pool`] - `Registry` handle, pool construction, ingress facade
//! - [`repository`] - agent / device / store repositories
//! - [`reconciler`] - identity reconciliation batch pass
//! - [`keylock`] - per-key async write serialization
//! - [`migrations`] - embedded schema migrations
//! - [`error`] - registry error types

pub mod error;
pub mod keylock;
pub mod migrations;
pub mod pool;
pub mod reconciler;
pub mod repository;

pub use error::{RegistryError, RegistryResult};
pub use pool::{Registry, RegistryConfig};
pub use reconciler::{IdentityReconciler, ReconcileReport};
pub use repository::agent::AgentStatusUpdate;
