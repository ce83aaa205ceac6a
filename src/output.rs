//! Run-scoped artifacts and the outcome of a successful run.

use crate::gateway::{AssetId, FormId, FormState, LocationId, PlacedItem};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Which of the two contract documents a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DocumentKind {
    /// Event details, deliverables, and payment schedule.
    ContractPage,
    /// Numbered terms and conditions.
    TermsPage,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 2] = [DocumentKind::ContractPage, DocumentKind::TermsPage];

    /// Short tag used in file names.
    pub fn tag(self) -> &'static str {
        match self {
            DocumentKind::ContractPage => "contract",
            DocumentKind::TermsPage => "terms",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A finished PDF in the run's local workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub path: PathBuf,
    pub kind: DocumentKind,
}

/// One rasterised page of a [`RenderedDocument`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub path: PathBuf,
    pub kind: DocumentKind,
    /// 1-based page number within the source document.
    pub page: usize,
}

/// The result of a successful run: a populated form in long-term storage.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedForm {
    pub run_id: String,
    pub form_id: FormId,
    pub title: String,
    pub location: LocationId,
    pub state: FormState,
    pub items: Vec<PlacedItem>,
    /// Assets referenced by the form's image items; exempt from cleanup.
    pub assets: Vec<AssetId>,
    /// Attempts consumed by the retry loop (1 = first try succeeded).
    pub attempts: u32,
    /// Compensating deletions that failed and were only logged.
    pub rollback_failures: usize,
}
