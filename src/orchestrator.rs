//! Pipeline orchestrator: render → rasterise → upload/create/insert with
//! bounded retry → relocate, then compensate and clean up.
//!
//! ## Run ledger
//!
//! Every remote object a run creates is recorded in a `RunLedger` the
//! moment its id is known:
//!
//! * `staging`: the run's own `run-<id>` sub-location under the configured
//!   staging location. Every upload of every attempt goes there.
//! * `provisional`: uploaded asset ids, including ones whose grant or
//!   resolve step failed.
//! * `pending_forms`: forms whose item insertion failed.
//! * `durable`: assets referenced by the committed form.
//!
//! Cleanup works from the ledger and the run's own sub-location only,
//! never from a listing of the shared staging location, so concurrent runs
//! cannot remove each other's files.
//!
//! ## Exit paths
//!
//! A run executes on its own task. Dropping the future returned by
//! [`Orchestrator::publish`] (a client disconnect, a caller timeout) does not
//! cut it short. Whatever ends the run, it then:
//! 1. deletes every pending form (failures are logged and counted);
//! 2. sweeps the run's staging sub-location, keeping durable assets;
//! 3. removes the local [`RunWorkspace`].
//!
//! The committed form is never deleted, even when relocation fails.

use crate::config::PublisherConfig;
use crate::contract::ValidContract;
use crate::error::{
    AssetError, PipelineError, RasterError, RemoteError, RollbackError, Stage,
};
use crate::gateway::{
    AssetId, AssetStore, FormDraft, FormId, FormItem, FormPublisher, FormResource, FormState,
    LocationId, PlacedItem,
};
use crate::observer::{NoopObserver, SharedObserver};
use crate::output::{DocumentKind, PublishedForm, RasterImage};
use crate::pipeline::document::{DocumentRenderer, PdfDocumentRenderer};
use crate::pipeline::rasterize::{PdfiumRasterizer, Rasterizer};
use crate::pipeline::workspace::RunWorkspace;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

/// Remote objects created by one run.
#[derive(Debug, Default)]
struct RunLedger {
    staging: Option<LocationId>,
    provisional: BTreeSet<AssetId>,
    pending_forms: Vec<FormId>,
    durable: BTreeSet<AssetId>,
}

/// The outcome of a successful attempt.
#[derive(Debug)]
struct Committed {
    form: FormResource,
    assets: Vec<AssetId>,
    items: Vec<PlacedItem>,
    attempts: u32,
}

/// A published image, ready to be referenced by a form item.
#[derive(Debug)]
struct SharedImage {
    asset: AssetId,
    url: String,
}

type AttemptError = (Stage, RemoteError);

/// Drives one contract through the whole pipeline.
#[derive(Clone)]
pub struct Orchestrator {
    config: PublisherConfig,
    assets: Arc<dyn AssetStore>,
    forms: Arc<dyn FormPublisher>,
    renderer: Arc<dyn DocumentRenderer>,
    rasterizer: Arc<dyn Rasterizer>,
    observer: SharedObserver,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator with the lopdf renderer and the pdfium rasterizer.
    pub fn new(
        config: PublisherConfig,
        assets: Arc<dyn AssetStore>,
        forms: Arc<dyn FormPublisher>,
    ) -> Self {
        let renderer = Arc::new(PdfDocumentRenderer::new(config.studio.clone()));
        let rasterizer = Arc::new(PdfiumRasterizer::from_config(&config));
        let observer = config
            .observer
            .clone()
            .unwrap_or_else(|| Arc::new(NoopObserver));
        Self {
            config,
            assets,
            forms,
            renderer,
            rasterizer,
            observer,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Run the full pipeline for one validated contract.
    ///
    /// Returns the published form, or the single terminal error with the
    /// stage that ended the run. Local files are gone and provisional
    /// remote objects have been cleaned up (best effort) either way.
    ///
    /// The run is spawned onto the runtime, so it still reaches compensation
    /// and the staging sweep if this future is dropped before it resolves.
    pub async fn publish(&self, contract: &ValidContract) -> Result<PublishedForm, PipelineError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("contract_run", run_id = %run_id, client = %contract.client.name);

        let this = self.clone();
        let contract = contract.clone();
        let task = tokio::spawn(
            async move { this.run(&run_id, &contract).await }.instrument(span),
        );
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(PipelineError::Interrupted(e.to_string())),
        }
    }

    async fn run(&self, run_id: &str, contract: &ValidContract) -> Result<PublishedForm, PipelineError> {
        self.observer.on_run_start(run_id);
        info!(event = %contract.event.name, "Starting contract run");

        self.observer.on_stage_start(Stage::Workspace);
        let workspace = match RunWorkspace::create(&self.config.work_dir, run_id) {
            Ok(ws) => ws,
            Err(e) => {
                let err = PipelineError::Workspace(e);
                self.observer.on_run_complete(run_id, Some(&err.to_string()));
                return Err(err);
            }
        };

        let mut ledger = RunLedger::default();
        let result = self.drive(run_id, contract, &workspace, &mut ledger).await;
        let rollback_failures = self.settle(&mut ledger).await;

        if let Err(e) = workspace.close() {
            warn!(error = %e, "Failed to remove run workspace");
        }

        match result {
            Ok(mut published) => {
                published.rollback_failures = rollback_failures;
                info!(
                    form_id = %published.form_id,
                    attempts = published.attempts,
                    rollback_failures,
                    "Contract run complete"
                );
                self.observer.on_run_complete(run_id, None);
                Ok(published)
            }
            Err(err) => {
                warn!(stage = %err.stage(), error = %err, rollback_failures, "Contract run failed");
                self.observer.on_run_complete(run_id, Some(&err.to_string()));
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        run_id: &str,
        contract: &ValidContract,
        workspace: &RunWorkspace,
        ledger: &mut RunLedger,
    ) -> Result<PublishedForm, PipelineError> {
        // Local stages are deterministic: their errors are terminal at once.
        self.observer.on_stage_start(Stage::Render);
        let mut documents = Vec::with_capacity(DocumentKind::ALL.len());
        for kind in DocumentKind::ALL {
            documents.push(
                self.renderer
                    .render(contract, kind, workspace.documents_dir())
                    .await?,
            );
        }

        self.observer.on_stage_start(Stage::Rasterize);
        let mut images = Vec::new();
        for document in &documents {
            let pages = self
                .rasterizer
                .rasterize(document, workspace.images_dir())
                .await?;
            if pages.is_empty() {
                return Err(RasterError::Empty {
                    path: document.path.clone(),
                }
                .into());
            }
            images.extend(pages);
        }
        info!(documents = documents.len(), images = images.len(), "Documents ready");

        let committed = self.attempt_loop(run_id, contract, &images, ledger).await?;
        ledger.durable.extend(committed.assets.iter().cloned());

        self.observer.on_stage_start(Stage::Relocate);
        let form = &committed.form;
        self.forms
            .relocate(&form.id, &form.location, &self.config.forms_location)
            .await
            .map_err(|source| {
                warn!(form_id = %form.id, "Relocation failed; form left in place for recovery");
                PipelineError::Relocate {
                    form_id: form.id.clone(),
                    source,
                }
            })?;

        Ok(PublishedForm {
            run_id: run_id.to_string(),
            form_id: form.id.clone(),
            title: form.title.clone(),
            location: self.config.forms_location.clone(),
            state: FormState::Published,
            items: committed.items,
            assets: committed.assets,
            attempts: committed.attempts,
            rollback_failures: 0,
        })
    }

    async fn attempt_loop(
        &self,
        run_id: &str,
        contract: &ValidContract,
        images: &[RasterImage],
        ledger: &mut RunLedger,
    ) -> Result<Committed, PipelineError> {
        let max_attempts = self.config.max_attempts.max(1);
        let delay = Duration::from_millis(self.config.retry_delay_ms);

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.observer.on_attempt_start(attempt, max_attempts);
            debug!(attempt, max_attempts, "Starting attempt");

            match self.attempt(run_id, contract, images, ledger).await {
                Ok((form, assets, items)) => {
                    return Ok(Committed {
                        form,
                        assets,
                        items,
                        attempts: attempt,
                    });
                }
                Err((stage, source)) => {
                    self.observer
                        .on_attempt_failed(attempt, stage, &source.to_string());
                    if attempt >= max_attempts {
                        warn!(attempt, max_attempts, stage = %stage, error = %source, "Final attempt failed");
                        return Err(PipelineError::Exhausted {
                            stage,
                            attempts: attempt,
                            source,
                        });
                    }
                    warn!(
                        attempt,
                        max_attempts,
                        stage = %stage,
                        error = %source,
                        "Attempt failed, retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One pass of upload → create → insert. Every attempt starts fresh:
    /// nothing from a previous attempt is reused.
    async fn attempt(
        &self,
        run_id: &str,
        contract: &ValidContract,
        images: &[RasterImage],
        ledger: &mut RunLedger,
    ) -> Result<(FormResource, Vec<AssetId>, Vec<PlacedItem>), AttemptError> {
        self.observer.on_stage_start(Stage::AssetUpload);
        let upload_error = |e: AssetError| (Stage::AssetUpload, RemoteError::Asset(e));
        let staging = self.staging_location(run_id, ledger).await.map_err(upload_error)?;
        let shared = self
            .share_images(images, &staging, ledger)
            .await
            .map_err(upload_error)?;

        self.observer.on_stage_start(Stage::FormCreate);
        let studio = &self.config.studio;
        let draft = FormDraft {
            title: studio.form_title.clone(),
            document_title: studio.document_title(&contract.client.name, &contract.event.name),
            description: studio
                .form_description(chrono::Local::now().date_naive(), &contract.client.name),
        };
        let form = self
            .forms
            .create(&draft)
            .await
            .map_err(|e| (Stage::FormCreate, RemoteError::Form(e)))?;
        info!(form_id = %form.id, "Created draft form");

        self.observer.on_stage_start(Stage::ItemInsert);
        let items = self.form_items(images, &shared);
        let mut placed = Vec::with_capacity(items.len());
        for (position, item) in items.iter().enumerate() {
            let position = position as u32;
            if let Err(e) = self.forms.insert_item(&form.id, item, position).await {
                debug!(form_id = %form.id, position, "Marking form for deletion");
                ledger.pending_forms.push(form.id.clone());
                return Err((Stage::ItemInsert, RemoteError::Form(e)));
            }
            placed.push(PlacedItem {
                kind: item.kind(),
                position,
            });
        }

        let assets = shared.into_iter().map(|s| s.asset).collect();
        Ok((form, assets, placed))
    }

    /// The run's own staging sub-location, created on first use.
    async fn staging_location(
        &self,
        run_id: &str,
        ledger: &mut RunLedger,
    ) -> Result<LocationId, AssetError> {
        if let Some(location) = &ledger.staging {
            return Ok(location.clone());
        }
        let location = self
            .assets
            .create_location(&self.config.staging_location, &format!("run-{run_id}"))
            .await?;
        debug!(staging = %location, "Created run staging location");
        ledger.staging = Some(location.clone());
        Ok(location)
    }

    /// Upload, share, and resolve every image. Concurrent uploads still wait
    /// for all images before reporting, so every uploaded id is recorded.
    async fn share_images(
        &self,
        images: &[RasterImage],
        staging: &LocationId,
        ledger: &mut RunLedger,
    ) -> Result<Vec<SharedImage>, AssetError> {
        let mut outcomes = Vec::with_capacity(images.len());
        if self.config.concurrent_uploads {
            outcomes = futures::future::join_all(
                images.iter().map(|image| self.share_image(image, staging)),
            )
            .await;
        } else {
            for image in images {
                let outcome = self.share_image(image, staging).await;
                let failed = outcome.is_err();
                outcomes.push(outcome);
                if failed {
                    break;
                }
            }
        }

        let mut shared = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(image) => {
                    ledger.provisional.insert(image.asset.clone());
                    shared.push(image);
                }
                Err((uploaded, e)) => {
                    if let Some(id) = uploaded {
                        ledger.provisional.insert(id);
                    }
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(shared),
        }
    }

    /// The upload + grant + resolve unit. On failure, returns the asset id if
    /// the upload itself went through.
    async fn share_image(
        &self,
        image: &RasterImage,
        staging: &LocationId,
    ) -> Result<SharedImage, (Option<AssetId>, AssetError)> {
        let asset = self
            .assets
            .upload(&image.path, staging)
            .await
            .map_err(|e| (None, e))?;
        let id = asset.id;
        debug!(asset_id = %id, kind = %image.kind, page = image.page, "Uploaded image");

        if let Err(e) = self.assets.grant_public_read(&id).await {
            return Err((Some(id), e));
        }
        match self.assets.resolve_public_url(&id).await {
            Ok(url) => Ok(SharedImage { asset: id, url }),
            Err(e) => Err((Some(id), e)),
        }
    }

    /// Image items in document and page order, then the signature item.
    fn form_items(&self, images: &[RasterImage], shared: &[SharedImage]) -> Vec<FormItem> {
        let studio = &self.config.studio;
        let mut items: Vec<FormItem> = images
            .iter()
            .zip(shared)
            .map(|(image, shared)| {
                let base = match image.kind {
                    DocumentKind::ContractPage => &studio.contract_item_title,
                    DocumentKind::TermsPage => &studio.terms_item_title,
                };
                let title = if image.page > 1 {
                    format!("{base} (continued)")
                } else {
                    base.clone()
                };
                FormItem::Image {
                    title,
                    source_uri: shared.url.clone(),
                }
            })
            .collect();
        items.push(FormItem::Signature {
            title: studio.signature_item_title.clone(),
            required: true,
        });
        items
    }

    /// Compensating deletions and the staging sweep. Returns how many
    /// cleanup calls failed.
    async fn settle(&self, ledger: &mut RunLedger) -> usize {
        let mut failures = 0;

        for form_id in std::mem::take(&mut ledger.pending_forms) {
            match self.forms.delete(&form_id).await {
                Ok(()) => {
                    info!(form_id = %form_id, "Deleted pending form");
                    self.observer.on_rollback(&form_id, true);
                }
                Err(source) => {
                    self.observer.on_rollback(&form_id, false);
                    let err = RollbackError::Form { form_id, source };
                    warn!(error = %err, "Compensating deletion failed");
                    failures += 1;
                }
            }
        }

        failures + self.sweep_staging(ledger).await
    }

    /// Delete every non-durable asset in the run's staging location, then
    /// the location itself if nothing durable remains in it.
    async fn sweep_staging(&self, ledger: &mut RunLedger) -> usize {
        let Some(staging) = ledger.staging.take() else {
            return 0;
        };
        let mut failures = 0;

        let mut doomed: BTreeSet<AssetId> = ledger
            .provisional
            .difference(&ledger.durable)
            .cloned()
            .collect();
        match self.assets.list_children(&staging).await {
            Ok(children) => {
                let strays: Vec<_> = children
                    .into_iter()
                    .filter(|id| !ledger.durable.contains(id) && !doomed.contains(id))
                    .collect();
                if !strays.is_empty() {
                    debug!(count = strays.len(), "Found unrecorded uploads in staging");
                }
                doomed.extend(strays);
            }
            Err(source) => {
                let err = RollbackError::Location {
                    location: staging.clone(),
                    source,
                };
                warn!(error = %err, "Staging listing failed");
                failures += 1;
            }
        }

        for asset_id in doomed {
            match self.assets.delete(&asset_id).await {
                Ok(()) | Err(AssetError::NotFound(_)) => {
                    debug!(asset_id = %asset_id, "Removed staged asset");
                }
                Err(source) => {
                    let err = RollbackError::Asset { asset_id, source };
                    warn!(error = %err, "Staged asset cleanup failed");
                    failures += 1;
                }
            }
        }

        if ledger.durable.is_empty() {
            if let Err(source) = self.assets.remove_location(&staging).await {
                let err = RollbackError::Location {
                    location: staging,
                    source,
                };
                warn!(error = %err, "Staging location removal failed");
                failures += 1;
            }
        }
        failures
    }
}
