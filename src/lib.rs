//! # contract-forms
//!
//! Turn a photography/videography service-contract request into a signable
//! Google Form: the contract and its terms are rendered as PDF pages,
//! rasterised to JPEG, uploaded, and placed as image items in a new form
//! followed by a required signature field.
//!
//! ## Why this crate?
//!
//! The remote side of the pipeline spans two APIs (Drive and Forms) with no
//! transaction across them. A failure halfway leaves orphan images or
//! half-built forms behind. The [`Orchestrator`] bounds the damage: remote
//! steps are retried a fixed number of times, every object a run creates is
//! recorded, and whatever the outcome the run cleans up after itself.
//!
//! ## Pipeline Overview
//!
//! ```text
//! ContractRequest
//!  │
//!  ├─ 1. Validate   field rules, first failure wins
//!  ├─ 2. Render     contract + terms pages via lopdf (spawn_blocking)
//!  ├─ 3. Rasterise  one JPEG per page via pdfium (spawn_blocking)
//!  ├─ 4. Publish    upload → share → create form → insert items   ┐ bounded
//!  │                (fresh attempt each time)                      ┘ retry
//!  ├─ 5. Relocate   move the finished form to long-term storage
//!  └─ 6. Clean up   delete pending forms, sweep this run's staging
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use contract_forms::{ContractRequest, InMemoryGateway, Orchestrator, PublisherConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let request: ContractRequest = serde_json::from_str(&std::fs::read_to_string("contract.json")?)?;
//!     let contract = request.validate()?;
//!
//!     // Swap in GoogleDrive/GoogleForms for real publication.
//!     let gateway = Arc::new(InMemoryGateway::new());
//!     let orchestrator = Orchestrator::new(PublisherConfig::default(), gateway.clone(), gateway);
//!     let published = orchestrator.publish(&contract).await?;
//!     println!("form {} after {} attempt(s)", published.form_id, published.attempts);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | HTTP surface and the `contract-forms` binary (axum, clap, tracing-subscriber) |
//!
//! Disable `server` to embed only the pipeline:
//! ```toml
//! contract-forms = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod contract;
pub mod error;
pub mod gateway;
pub mod observer;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PublisherConfig, PublisherConfigBuilder, StudioProfile};
pub use contract::{ContractRequest, PaymentSchedule, ValidContract};
pub use error::{
    error_chain, AssetError, AuthError, ConfigError, FormError, PipelineError, RasterError,
    RemoteError, RenderError, RollbackError, Stage, ValidationError,
};
pub use gateway::google::{GoogleClient, GoogleDrive, GoogleForms};
pub use gateway::memory::InMemoryGateway;
pub use gateway::{AssetId, AssetStore, FormId, FormPublisher, LocationId};
pub use observer::{NoopObserver, PipelineObserver, SharedObserver};
pub use orchestrator::Orchestrator;
pub use output::{DocumentKind, PublishedForm};
