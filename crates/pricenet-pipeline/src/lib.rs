//! # pricenet-pipeline: Price Catalog Distribution Pipeline
//!
//! This crate drives price distribution for one field agent: pull the
//! catalog from the configured source, render the legacy price file, push it
//! to every registered terminal, and report the cycle back to the registry.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Pipeline Architecture                             │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  HeartbeatLoop (driver)                          │  │
//! │  │                                                                  │  │
//! │  │  One timer per agent process; cycles never overlap; stop        │  │
//! │  │  signal honored between phases                                   │  │
//! │  └───────┬──────────────────┬──────────────────┬────────────────────┘  │
//! │          ▼                  ▼                  ▼                        │
//! │  ┌──────────────┐  ┌────────────────┐  ┌────────────────────────┐      │
//! │  │CatalogSource │  │ render (core)  │  │     Dispatcher         │      │
//! │  │              │  │                │  │                        │      │
//! │  │ file / api / │  │ delimited      │  │ probe + transfer per   │      │
//! │  │ database,    │  │ legacy format  │  │ terminal, isolated     │      │
//! │  │ failures     │  │                │  │ tasks, phase deadline  │      │
//! │  │ contained    │  │                │  │                        │      │
//! │  └──────────────┘  └────────────────┘  └───────────┬────────────┘      │
//! │                                                    ▼                    │
//! │                                        ┌────────────────────────┐      │
//! │                                        │   DeliveryHistory      │      │
//! │                                        │  bounded rolling ring  │      │
//! │                                        │  recent / export /     │      │
//! │                                        │  clear                 │      │
//! │                                        └────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - pipeline configuration (TOML + env + defaults)
//! - [`source`] - catalog source adapters (file / API / database)
//! - [`transport`] - terminal probes and transfer methods
//! - [`dispatch`] - per-terminal dispatch with delivery accounting
//! - [`history`] - bounded rolling outcome history
//! - [`heartbeat`] - the cycle state machine and timer loop
//! - [`error`] - pipeline error types

pub mod config;
pub mod dispatch;
pub mod error;
pub mod heartbeat;
pub mod history;
pub mod source;
pub mod transport;

pub use config::{PipelineConfig, SourceKind, TerminalConfig, TransferMethod};
pub use dispatch::{DispatchSummary, Dispatcher};
pub use error::{PipelineError, PipelineResult};
pub use heartbeat::{CycleOutcome, CyclePhase, HeartbeatLoop};
pub use history::DeliveryHistory;
pub use source::{CatalogFetch, CatalogSource};
