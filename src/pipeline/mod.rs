//! Local pipeline stages: everything a run does before touching the network.
//!
//! ## Data Flow
//!
//! ```text
//! workspace ──▶ document ──▶ rasterize ──▶ (orchestrator: upload, form)
//!  (tempdir)     (lopdf)      (pdfium)
//! ```
//!
//! 1. [`workspace`] — per-run scratch directory, removed on every exit path
//! 2. [`layout`]    — table/paragraph layout primitives on top of lopdf
//! 3. [`document`]  — the contract and terms pages; runs in `spawn_blocking`
//! 4. [`rasterize`] — one JPEG per page via pdfium, also on the blocking pool
//!
//! These stages are deterministic: a failure here ends the run at once and is
//! never retried.

pub mod document;
pub mod layout;
pub mod rasterize;
pub mod workspace;
