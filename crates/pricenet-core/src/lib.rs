//! # pricenet-core: Pure Domain Logic for PriceNet
//!
//! This crate is the **heart** of the price-distribution network. It contains
//! all domain logic as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       PriceNet Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    apps/agentd (daemon)                         │   │
//! │  │    config load ──► heartbeat loop ──► reconciler schedule      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 pricenet-pipeline (distribution)                │   │
//! │  │    catalog sources, terminal transports, delivery history       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 pricenet-registry (persistence)                 │   │
//! │  │    agents, devices, stores, identity reconciliation             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ pricenet-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  liveness │  │   render  │  │   ident   │  │   │
//! │  │   │   Agent   │  │  Presence │  │ PriceFile │  │ normalize │  │   │
//! │  │   │  Product  │  │ evaluator │  │  layout   │  │    ids    │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Agent, LegacyDevice, Product, DeliveryOutcome)
//! - [`ident`] - Identifier normalization applied at every boundary
//! - [`liveness`] - Pure online/offline evaluation from status + freshness
//! - [`render`] - Legacy delimited price file rendering and parsing
//! - [`error`] - Domain error types
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: the liveness evaluator takes `now` as a parameter,
//!    it never reads a clock
//! 2. **No I/O**: database, network, file system access is FORBIDDEN here
//! 3. **Integer Money**: prices are cents (i64); decimals exist only in the
//!    rendered text
//! 4. **Explicit Errors**: all errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod ident;
pub mod liveness;
pub mod render;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use pricenet_core::Product` instead of
// `use pricenet_core::types::Product`

pub use error::CoreError;
pub use ident::{normalize_id, NormalizedId};
pub use liveness::{evaluate, Presence, ReportedStatus, FRESHNESS_WINDOW};
pub use render::{render, render_price_cents, RenderLayout};
pub use types::*;
