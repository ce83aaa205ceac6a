//! Error types for the contract-forms library.
//!
//! Errors are split by failure domain because each domain has a different
//! propagation policy:
//!
//! * [`ValidationError`] — client input is malformed. Returned before any
//!   pipeline work starts, never retried.
//! * [`RenderError`] / [`RasterError`] — local and deterministic. Terminal on
//!   first occurrence.
//! * [`AssetError`] / [`FormError`] — a remote call failed. Retried by the
//!   orchestrator's attempt loop until the budget is spent.
//! * [`RollbackError`] — compensating deletion failed. Logged and counted,
//!   never returned to the caller.
//! * [`PipelineError`] — the single terminal verdict of a run, tagged with the
//!   [`Stage`] that ended it.

use crate::gateway::{AssetId, FormId, LocationId};
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

// ── Validation ───────────────────────────────────────────────────────────

/// A contract request that failed validation. Only the first failing rule
/// is reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("client name is required")]
    ClientNameRequired,
    #[error("client email is required")]
    ClientEmailRequired,
    #[error("client email is not valid")]
    ClientEmailInvalid,
    #[error("event name is required")]
    EventNameRequired,
    #[error("event date is required")]
    EventDateRequired,
    #[error("event coverage time is required")]
    EventCoverageRequired,
    #[error("event venue is required")]
    EventVenueRequired,
    #[error("total amount should be greater than zero")]
    TotalAmountNotPositive,
    #[error("advance paid cannot be negative")]
    AdvancePaidNegative,
    #[error("per hour extra cannot be negative")]
    PerHourExtraNegative,
    #[error("at least one deliverable is required")]
    NoDeliverables,
    #[error("deliverable description is required")]
    DeliverableDescriptionRequired { index: usize },
    #[error("deliverable quantity is required")]
    DeliverableQuantityRequired { index: usize },
    #[error("deliverable mode is required")]
    DeliverableModeRequired { index: usize },
    #[error("deliverable delivery date is required")]
    DeliverableDateRequired { index: usize },
}

// ── Configuration ────────────────────────────────────────────────────────

/// Builder validation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid configuration: {0}")]
pub struct ConfigError(pub String);

// ── Local stages ─────────────────────────────────────────────────────────

/// Failure while laying out or writing a contract document.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The PDF content stream could not be encoded.
    #[error("Failed to encode content stream for {document}: {detail}")]
    Encode { document: String, detail: String },

    /// The finished PDF could not be written to disk.
    #[error("Could not save pdf file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Render task panicked or was cancelled.
    #[error("Render task failed: {0}")]
    Internal(String),
}

/// Failure while turning a rendered document into images.
#[derive(Debug, Error)]
pub enum RasterError {
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    Binding(String),

    /// pdfium could not open the rendered document.
    #[error("Failed to open '{path}' for rasterisation: {detail}")]
    Load { path: PathBuf, detail: String },

    /// pdfium failed on a specific page (1-based).
    #[error("Rasterisation failed for page {page} of '{path}': {detail}")]
    Page {
        path: PathBuf,
        page: usize,
        detail: String,
    },

    /// The rendered document contains no pages.
    #[error("Document '{path}' has no pages to rasterise")]
    Empty { path: PathBuf },

    /// JPEG encoding failed.
    #[error("Failed while jpeg encoding page {page}: {source}")]
    Encode {
        page: usize,
        #[source]
        source: image::ImageError,
    },

    /// The encoded image could not be written to disk.
    #[error("Failed to write image file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Raster task panicked or was cancelled.
    #[error("Raster task failed: {0}")]
    Internal(String),
}

// ── Remote gateway ───────────────────────────────────────────────────────

/// Failure of an asset-store call (upload, grant, resolve, delete, list).
#[derive(Debug, Error)]
pub enum AssetError {
    /// The remote API answered with a non-success status.
    #[error("asset API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request never produced a response (DNS, TLS, timeout, ...).
    #[error("asset API transport error: {0}")]
    Transport(String),

    /// The local image could not be read.
    #[error("failed while reading image file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No access token could be obtained.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The asset does not exist remotely.
    #[error("asset '{0}' not found")]
    NotFound(AssetId),

    /// The response did not carry the expected field.
    #[error("unexpected asset API response: {0}")]
    InvalidResponse(String),

    /// Failure injected by the in-memory gateway.
    #[error("injected asset failure: {0}")]
    Injected(String),
}

/// Failure of a form-publisher call (create, insert, relocate, delete).
#[derive(Debug, Error)]
pub enum FormError {
    /// The remote API answered with a non-success status.
    #[error("forms API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request never produced a response.
    #[error("forms API transport error: {0}")]
    Transport(String),

    /// No access token could be obtained.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The form does not exist remotely.
    #[error("form '{0}' not found")]
    NotFound(FormId),

    /// The response did not carry the expected field.
    #[error("unexpected forms API response: {0}")]
    InvalidResponse(String),

    /// Failure injected by the in-memory gateway.
    #[error("injected form failure: {0}")]
    Injected(String),
}

/// Failure to obtain an OAuth access token.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The credentials file is missing or unreadable.
    #[error("failed to read credentials file '{path}': {source}")]
    CredentialsUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The credentials file is not a service-account key.
    #[error("credentials file '{path}' is not a valid service-account key: {detail}")]
    CredentialsMalformed { path: PathBuf, detail: String },

    /// The JWT assertion could not be signed.
    #[error("failed to sign token assertion: {0}")]
    Signing(String),

    /// The token endpoint rejected the assertion or was unreachable.
    #[error("token exchange failed: {0}")]
    Exchange(String),
}

/// Either kind of remote failure, as recorded by one attempt.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Form(#[from] FormError),
}

/// Compensating deletion failed. Never escalated; the orchestrator logs it
/// and reports the count in [`crate::output::PublishedForm`].
#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("failed to delete form '{form_id}': {source}")]
    Form {
        form_id: FormId,
        #[source]
        source: FormError,
    },
    #[error("failed to delete staged asset '{asset_id}': {source}")]
    Asset {
        asset_id: AssetId,
        #[source]
        source: AssetError,
    },
    #[error("failed to sweep staging location '{location}': {source}")]
    Location {
        location: LocationId,
        #[source]
        source: AssetError,
    },
}

// ── Terminal verdict ─────────────────────────────────────────────────────

/// The pipeline stage a terminal error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Workspace,
    Render,
    Rasterize,
    AssetUpload,
    FormCreate,
    ItemInsert,
    Relocate,
    /// The run as a whole, for failures not tied to one step.
    Run,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Workspace => "workspace",
            Stage::Render => "document rendering",
            Stage::Rasterize => "rasterisation",
            Stage::AssetUpload => "asset upload",
            Stage::FormCreate => "form creation",
            Stage::ItemInsert => "item insertion",
            Stage::Relocate => "relocation",
            Stage::Run => "contract run",
        };
        f.write_str(label)
    }
}

/// The single terminal error of a pipeline run.
///
/// Intermediate per-attempt failures are only visible as log events and
/// observer callbacks; this type carries the stage that ended the run and
/// the last underlying cause.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The run's local workspace could not be created.
    #[error("workspace setup failed: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("document rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("rasterisation failed: {0}")]
    Raster(#[from] RasterError),

    /// Every attempt of the retry loop failed.
    #[error("{stage} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        stage: Stage,
        attempts: u32,
        #[source]
        source: RemoteError,
    },

    /// The populated form could not be moved to long-term storage. The form
    /// is left in place for manual recovery.
    #[error("relocation of form '{form_id}' failed: {source}")]
    Relocate {
        form_id: FormId,
        #[source]
        source: FormError,
    },
    /// The run's task was cancelled by the runtime before it finished,
    /// typically because the runtime is shutting down.
    #[error("contract run interrupted: {0}")]
    Interrupted(String),
}

impl PipelineError {
    /// The stage this error is attributed to.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Workspace(_) => Stage::Workspace,
            PipelineError::Render(_) => Stage::Render,
            PipelineError::Raster(_) => Stage::Rasterize,
            PipelineError::Exhausted { stage, .. } => *stage,
            PipelineError::Relocate { .. } => Stage::Relocate,
            PipelineError::Interrupted(_) => Stage::Run,
        }
    }
}

/// Render an error and its whole `source()` chain as one line.
///
/// `thiserror` messages above already embed their direct cause, so a source
/// whose text is already contained in the accumulated message is skipped.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        let text = cause.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        current = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_match_wire_contract() {
        assert_eq!(
            ValidationError::ClientEmailInvalid.to_string(),
            "client email is not valid"
        );
        assert_eq!(
            ValidationError::DeliverableDateRequired { index: 2 }.to_string(),
            "deliverable delivery date is required"
        );
    }

    #[test]
    fn exhausted_display_names_stage_and_attempts() {
        let e = PipelineError::Exhausted {
            stage: Stage::AssetUpload,
            attempts: 3,
            source: RemoteError::Asset(AssetError::Transport("connection reset".into())),
        };
        let msg = e.to_string();
        assert!(msg.starts_with("asset upload failed after 3 attempt(s)"), "got: {msg}");
        assert!(msg.contains("connection reset"), "got: {msg}");
        assert_eq!(e.stage(), Stage::AssetUpload);
    }

    #[test]
    fn relocate_error_is_tagged_relocation() {
        let e = PipelineError::Relocate {
            form_id: FormId::from("form-1"),
            source: FormError::Http {
                status: 403,
                body: "forbidden".into(),
            },
        };
        assert_eq!(e.stage(), Stage::Relocate);
        assert!(e.to_string().contains("form-1"));
    }

    #[test]
    fn interrupted_run_is_attributed_to_the_run() {
        let e = PipelineError::Interrupted("task was cancelled".into());
        assert_eq!(e.stage(), Stage::Run);
        assert_eq!(e.to_string(), "contract run interrupted: task was cancelled");
    }

    #[test]
    fn error_chain_skips_causes_already_in_message() {
        let e = PipelineError::Render(RenderError::Write {
            path: PathBuf::from("/tmp/x.pdf"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        });
        let chain = error_chain(&e);
        assert_eq!(chain.matches("disk full").count(), 1, "got: {chain}");
        assert!(chain.starts_with("document rendering failed"));
    }

    #[test]
    fn error_chain_appends_hidden_causes() {
        #[derive(Debug, Error)]
        #[error("outer")]
        struct Outer(#[source] std::io::Error);

        let e = Outer(std::io::Error::new(std::io::ErrorKind::Other, "inner"));
        assert_eq!(error_chain(&e), "outer: inner");
    }
}
