//! Orchestrator integration tests.
//!
//! The real lopdf renderer runs; pdfium is replaced by a stub rasterizer and
//! Google by the in-memory gateway, so these need neither native libraries
//! nor network access. Faults are injected per call site to drive the retry
//! loop, compensation, and the staging sweep.

use async_trait::async_trait;
use contract_forms::contract::{ClientDetails, Deliverable, EventDetails, PaymentDetails};
use contract_forms::gateway::memory::CREATION_LOCATION;
use contract_forms::gateway::{FormItem, FormState, ItemKind};
use contract_forms::output::{RasterImage, RenderedDocument};
use contract_forms::pipeline::rasterize::Rasterizer;
use contract_forms::{
    ContractRequest, DocumentKind, FormId, InMemoryGateway, LocationId, Orchestrator,
    PipelineError, PipelineObserver, PublisherConfig, RasterError, Stage, ValidContract,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

const STAGING: &str = "staging-root";
const FORMS: &str = "forms-root";

/// Writes a tiny JPEG per document and remembers what it was given.
#[derive(Default)]
struct StubRasterizer {
    seen: Mutex<Vec<(DocumentKind, PathBuf, bool)>>,
}

#[async_trait]
impl Rasterizer for StubRasterizer {
    async fn rasterize(
        &self,
        document: &RenderedDocument,
        out_dir: &Path,
    ) -> Result<Vec<RasterImage>, RasterError> {
        let is_pdf = std::fs::read(&document.path)
            .map(|bytes| bytes.starts_with(b"%PDF"))
            .unwrap_or(false);
        self.seen
            .lock()
            .unwrap()
            .push((document.kind, document.path.clone(), is_pdf));

        let path = out_dir.join(format!("image-{}.jpg", document.kind.tag()));
        std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xD9]).map_err(|source| RasterError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(vec![RasterImage {
            path,
            kind: document.kind,
            page: 1,
        }])
    }
}

#[derive(Default)]
struct Recorder {
    attempts: AtomicU32,
    failures: Mutex<Vec<(u32, Stage)>>,
    rollbacks: Mutex<Vec<(FormId, bool)>>,
    completions: Mutex<Vec<Option<String>>>,
}

impl PipelineObserver for Recorder {
    fn on_attempt_start(&self, _attempt: u32, _max_attempts: u32) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_attempt_failed(&self, attempt: u32, stage: Stage, _error: &str) {
        self.failures.lock().unwrap().push((attempt, stage));
    }

    fn on_rollback(&self, form_id: &FormId, deleted: bool) {
        self.rollbacks.lock().unwrap().push((form_id.clone(), deleted));
    }

    fn on_run_complete(&self, _run_id: &str, error: Option<&str>) {
        self.completions
            .lock()
            .unwrap()
            .push(error.map(str::to_string));
    }
}

struct Harness {
    gw: Arc<InMemoryGateway>,
    rasterizer: Arc<StubRasterizer>,
    recorder: Arc<Recorder>,
    orchestrator: Orchestrator,
    work_dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with(|b| b)
    }

    fn with(
        tune: impl FnOnce(
            contract_forms::PublisherConfigBuilder,
        ) -> contract_forms::PublisherConfigBuilder,
    ) -> Self {
        let work_dir = tempfile::tempdir().unwrap();
        let gw = Arc::new(InMemoryGateway::new());
        let rasterizer = Arc::new(StubRasterizer::default());
        let recorder = Arc::new(Recorder::default());

        let builder = PublisherConfig::builder()
            .retry_delay_ms(0)
            .staging_location(STAGING)
            .forms_location(FORMS)
            .work_dir(work_dir.path())
            .observer(recorder.clone());
        let config = tune(builder).build().unwrap();
        let orchestrator = Orchestrator::new(config, gw.clone(), gw.clone())
            .with_rasterizer(rasterizer.clone());

        Self {
            gw,
            rasterizer,
            recorder,
            orchestrator,
            work_dir,
        }
    }

    fn attempts(&self) -> u32 {
        self.recorder.attempts.load(Ordering::SeqCst)
    }

    /// Nothing is left behind locally.
    fn assert_work_dir_empty(&self) {
        let left: Vec<_> = std::fs::read_dir(self.work_dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert!(left.is_empty(), "leftover local files: {left:?}");
    }

    fn creation_forms(&self) -> usize {
        self.gw.forms_in(&LocationId::from(CREATION_LOCATION)).len()
    }

    fn staging_children(&self) -> Vec<LocationId> {
        self.gw.locations_under(&LocationId::from(STAGING))
    }
}

fn contract(client: &str) -> ValidContract {
    ContractRequest {
        client: ClientDetails {
            name: client.into(),
            email: "client@example.com".into(),
        },
        event: EventDetails {
            name: "Spring Gala".into(),
            date: "04/18/2026".into(),
            coverage_window: "6pm - 11pm".into(),
            venue: "Harbor Hall, Boston".into(),
        },
        payment: PaymentDetails {
            total_amount: 1000,
            advance_paid: 0,
            advance_mode: String::new(),
            per_hour_extra: 150,
        },
        deliverables: vec![Deliverable {
            description: "Edited photos".into(),
            quantity: "300".into(),
            mode: "Online gallery".into(),
            delivery_date: "05/18/2026".into(),
        }],
    }
    .validate()
    .unwrap()
}

fn image_asset_ids(items: &[FormItem]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            FormItem::Image { source_uri, .. } => source_uri.rsplit('/').next().map(str::to_string),
            FormItem::Signature { .. } => None,
        })
        .collect()
}

// ── Success path ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_publishes_three_items_in_order() {
    let h = Harness::new();
    let published = tokio_test::assert_ok!(h.orchestrator.publish(&contract("Jane Doe")).await);

    // Two PDFs rendered and handed over while they still existed.
    let seen = h.rasterizer.seen.lock().unwrap().clone();
    let kinds: Vec<_> = seen.iter().map(|(k, _, _)| *k).collect();
    assert_eq!(kinds, vec![DocumentKind::ContractPage, DocumentKind::TermsPage]);
    assert!(seen.iter().all(|(_, _, is_pdf)| *is_pdf));
    assert!(seen.iter().all(|(_, path, _)| !path.exists()));

    assert_eq!(published.attempts, 1);
    assert_eq!(published.state, FormState::Published);
    assert_eq!(published.location, LocationId::from(FORMS));
    assert_eq!(published.rollback_failures, 0);

    let form = h.gw.form(&published.form_id).unwrap();
    assert_eq!(form.location, LocationId::from(FORMS));
    assert_eq!(form.state, FormState::Published);
    let placed: Vec<_> = form.items.iter().map(|i| (i.kind, i.position)).collect();
    assert_eq!(
        placed,
        vec![(ItemKind::Image, 0), (ItemKind::Image, 1), (ItemKind::Signature, 2)]
    );

    let items = h.gw.form_items(&published.form_id).unwrap();
    match &items[0] {
        FormItem::Image { title, .. } => assert_eq!(title, "The Client hereby agree as follows:"),
        other => panic!("expected contract image first, got {other:?}"),
    }
    match &items[2] {
        FormItem::Signature { required, .. } => assert!(*required),
        other => panic!("expected signature last, got {other:?}"),
    }

    // Referenced images survive; nothing else does.
    let mut referenced = image_asset_ids(&items);
    referenced.sort();
    let mut remaining: Vec<_> = h.gw.asset_ids().iter().map(|a| a.to_string()).collect();
    remaining.sort();
    assert_eq!(referenced, remaining);
    assert_eq!(published.assets.len(), 2);

    assert_eq!(h.creation_forms(), 0);
    assert_eq!(h.gw.calls().form_deletes, 0);
    h.assert_work_dir_empty();
    assert_eq!(*h.recorder.completions.lock().unwrap(), vec![None]);
}

#[tokio::test]
async fn form_carries_studio_title_and_client_description() {
    let h = Harness::new();
    let published = h.orchestrator.publish(&contract("Ana Lima")).await.unwrap();
    let form = h.gw.form(&published.form_id).unwrap();
    assert_eq!(form.title, "RED DOT STUDIOS SERVICES AGREEMENT");
    assert!(form.description.ends_with("Ana Lima(\"Client\")."), "got: {}", form.description);
}

#[tokio::test]
async fn sequential_uploads_also_publish() {
    let h = Harness::with(|b| b.concurrent_uploads(false));
    let published = tokio_test::assert_ok!(h.orchestrator.publish(&contract("Jane Doe")).await);
    assert_eq!(published.items.len(), 3);
    assert_eq!(h.gw.calls().uploads, 2);
}

// ── Retry budget ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_failed_attempts_then_success() {
    let h = Harness::new();
    h.gw.fail_creates(2);

    let published = tokio_test::assert_ok!(h.orchestrator.publish(&contract("Jane Doe")).await);
    assert_eq!(published.attempts, 3);
    assert_eq!(h.attempts(), 3);
    assert_eq!(h.gw.calls().form_creates, 3);
    assert_eq!(h.gw.forms().len(), 1);
    // Images from the two failed attempts were swept.
    assert_eq!(h.gw.asset_ids().len(), 2);
}

#[tokio::test]
async fn three_failed_attempts_never_start_a_fourth() {
    let h = Harness::new();
    h.gw.fail_creates(3);

    let err = tokio_test::assert_err!(h.orchestrator.publish(&contract("Jane Doe")).await);
    match &err {
        PipelineError::Exhausted { stage, attempts, .. } => {
            assert_eq!(*stage, Stage::FormCreate);
            assert_eq!(*attempts, 3);
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
    assert_eq!(h.attempts(), 3);
    assert_eq!(h.gw.calls().form_creates, 3);
    assert!(h.gw.asset_ids().is_empty());
    assert!(h.staging_children().is_empty());
    h.assert_work_dir_empty();
}

#[tokio::test]
async fn attempt_budget_follows_config() {
    let h = Harness::with(|b| b.max_attempts(1));
    h.gw.fail_creates(1);

    let err = h.orchestrator.publish(&contract("Jane Doe")).await.unwrap_err();
    assert_eq!(err.stage(), Stage::FormCreate);
    assert_eq!(h.gw.calls().form_creates, 1);
}

// ── Failure scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn upload_failing_every_attempt_leaves_nothing_behind() {
    let h = Harness::new();
    h.gw.fail_uploads(u32::MAX);

    let err = tokio_test::assert_err!(h.orchestrator.publish(&contract("Jane Doe")).await);
    assert_eq!(err.stage(), Stage::AssetUpload);
    assert!(err.to_string().starts_with("asset upload failed after 3 attempt(s)"), "got: {err}");

    assert_eq!(h.creation_forms(), 0);
    assert_eq!(h.gw.calls().form_creates, 0);
    assert!(h.gw.asset_ids().is_empty());
    assert!(h.staging_children().is_empty());
    h.assert_work_dir_empty();

    let failures = h.recorder.failures.lock().unwrap().clone();
    assert_eq!(
        failures,
        vec![(1, Stage::AssetUpload), (2, Stage::AssetUpload), (3, Stage::AssetUpload)]
    );
}

#[tokio::test]
async fn insert_failing_twice_leaves_only_the_winning_form() {
    let h = Harness::new();
    h.gw.fail_inserts_at(1, 2);

    let published = tokio_test::assert_ok!(h.orchestrator.publish(&contract("Jane Doe")).await);
    assert_eq!(published.attempts, 3);

    let forms = h.gw.forms();
    assert_eq!(forms.len(), 1);
    assert_eq!(forms[0].id, published.form_id);
    assert_eq!(h.gw.calls().form_deletes, 2);

    let rollbacks = h.recorder.rollbacks.lock().unwrap().clone();
    assert_eq!(rollbacks.len(), 2);
    assert!(rollbacks.iter().all(|(id, deleted)| *deleted && *id != published.form_id));
    assert_eq!(h.gw.asset_ids().len(), 2);
}

#[tokio::test]
async fn insert_failing_every_attempt_rolls_back_all_forms() {
    let h = Harness::new();
    h.gw.fail_inserts_at(2, u32::MAX);

    let err = tokio_test::assert_err!(h.orchestrator.publish(&contract("Jane Doe")).await);
    assert_eq!(err.stage(), Stage::ItemInsert);
    assert!(h.gw.forms().is_empty());
    assert_eq!(h.gw.calls().form_deletes, 3);
    assert!(h.gw.asset_ids().is_empty());
    assert!(h.staging_children().is_empty());
    h.assert_work_dir_empty();
}

#[tokio::test]
async fn relocation_failure_keeps_the_populated_form() {
    let h = Harness::new();
    h.gw.fail_relocates(1);

    let err = tokio_test::assert_err!(h.orchestrator.publish(&contract("Jane Doe")).await);
    let form_id = match &err {
        PipelineError::Relocate { form_id, .. } => form_id.clone(),
        other => panic!("expected relocation error, got {other:?}"),
    };
    assert_eq!(err.stage(), Stage::Relocate);

    let form = h.gw.form(&form_id).expect("form must not be rolled back");
    assert_eq!(form.location, LocationId::from(CREATION_LOCATION));
    assert_eq!(form.items.len(), 3);
    assert_eq!(h.gw.calls().form_deletes, 0);

    // Its images are still readable for manual recovery.
    let items = h.gw.form_items(&form_id).unwrap();
    assert_eq!(image_asset_ids(&items).len(), 2);
    assert_eq!(h.gw.asset_ids().len(), 2);
    assert_eq!(h.staging_children().len(), 1);
    h.assert_work_dir_empty();
}

#[tokio::test]
async fn failed_compensation_is_counted_not_escalated() {
    let h = Harness::new();
    h.gw.fail_inserts_at(0, 1).fail_form_deletes(1);

    let published = tokio_test::assert_ok!(h.orchestrator.publish(&contract("Jane Doe")).await);
    assert_eq!(published.attempts, 2);
    assert_eq!(published.rollback_failures, 1);
    // The orphan stays; the published form is unaffected.
    assert_eq!(h.gw.forms().len(), 2);
    assert_eq!(h.creation_forms(), 1);
    let rollbacks = h.recorder.rollbacks.lock().unwrap().clone();
    assert_eq!(rollbacks.len(), 1);
    assert!(!rollbacks[0].1);
}

#[tokio::test]
async fn failed_asset_cleanup_is_counted() {
    let h = Harness::new();
    h.gw.fail_grants(1).fail_asset_deletes(1);

    let published = tokio_test::assert_ok!(h.orchestrator.publish(&contract("Jane Doe")).await);
    assert_eq!(published.attempts, 2);
    assert_eq!(published.rollback_failures, 1);
}

// ── Staging sweep and isolation ──────────────────────────────────────────────

#[tokio::test]
async fn uploads_with_lost_responses_are_swept() {
    let h = Harness::new();
    h.gw.lose_upload_responses(1);

    let published = tokio_test::assert_ok!(h.orchestrator.publish(&contract("Jane Doe")).await);
    assert_eq!(published.attempts, 2);
    assert_eq!(h.gw.calls().uploads, 4);

    let mut remaining: Vec<_> = h.gw.asset_ids().iter().map(|a| a.to_string()).collect();
    remaining.sort();
    let mut referenced = image_asset_ids(&h.gw.form_items(&published.form_id).unwrap());
    referenced.sort();
    assert_eq!(remaining, referenced);
}

#[tokio::test]
async fn each_run_stages_into_its_own_location() {
    let h = Harness::new();
    let a = h.orchestrator.publish(&contract("Jane Doe")).await.unwrap();
    let b = h.orchestrator.publish(&contract("John Roe")).await.unwrap();

    let staging = h.staging_children();
    assert_eq!(staging.len(), 2);
    assert!(staging.iter().any(|l| l.as_str().ends_with(&format!("run-{}", a.run_id))));
    assert!(staging.iter().any(|l| l.as_str().ends_with(&format!("run-{}", b.run_id))));
    for location in &staging {
        assert_eq!(h.gw.assets_in(location).len(), 2);
    }
}

#[tokio::test]
async fn concurrent_runs_do_not_remove_each_others_images() {
    let h = Harness::new();
    // One of the two runs loses its first attempt and sweeps afterwards.
    h.gw.fail_inserts_at(2, 1);

    let (contract_a, contract_b) = (contract("Jane Doe"), contract("John Roe"));
    let (a, b) = tokio::join!(
        h.orchestrator.publish(&contract_a),
        h.orchestrator.publish(&contract_b),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.attempts + b.attempts, 3);

    for published in [&a, &b] {
        let items = h.gw.form_items(&published.form_id).unwrap();
        for id in image_asset_ids(&items) {
            assert!(
                h.gw.asset_ids().iter().any(|a| a.as_str() == id),
                "image {id} of {} was removed",
                published.form_id
            );
        }
    }
    assert_eq!(h.gw.asset_ids().len(), 4);
    assert_eq!(h.gw.forms_in(&LocationId::from(FORMS)).len(), 2);
    h.assert_work_dir_empty();
}

#[tokio::test]
async fn shared_work_dir_contents_are_left_alone() {
    let h = Harness::new();
    let bystander = h.work_dir.path().join("other-service.lock");
    std::fs::write(&bystander, b"keep").unwrap();

    h.orchestrator.publish(&contract("Jane Doe")).await.unwrap();
    assert!(bystander.exists());
}

#[tokio::test]
async fn dropped_caller_does_not_skip_cleanup() {
    let h = Harness::with(|b| b.max_attempts(2).retry_delay_ms(300));
    // Attempt 1 leaves a pending form, then the caller gives up mid-delay.
    h.gw.fail_inserts_at(1, 1);

    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        h.orchestrator.publish(&contract("Jane Doe")),
    )
    .await;
    assert!(outcome.is_err(), "run should still be waiting to retry");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.recorder.completions.lock().unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "detached run never finished");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(*h.recorder.completions.lock().unwrap(), vec![None]);
    assert_eq!(h.creation_forms(), 0);
    assert_eq!(h.gw.forms_in(&LocationId::from(FORMS)).len(), 1);
    assert_eq!(h.gw.calls().form_deletes, 1);
    assert_eq!(h.gw.asset_ids().len(), 2);
    h.assert_work_dir_empty();
}

#[tokio::test]
async fn dropped_caller_of_failing_run_leaves_nothing_behind() {
    let h = Harness::with(|b| b.max_attempts(2).retry_delay_ms(300));
    h.gw.fail_inserts_at(1, u32::MAX);

    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        h.orchestrator.publish(&contract("Jane Doe")),
    )
    .await;
    assert!(outcome.is_err());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.recorder.completions.lock().unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "detached run never finished");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(h.gw.forms().is_empty());
    assert!(h.gw.asset_ids().is_empty());
    assert!(h.staging_children().is_empty());
    h.assert_work_dir_empty();
}
