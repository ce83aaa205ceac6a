//! Document Renderer: the contract page and the terms page.
//!
//! Both documents are static templates filled from a [`ValidContract`] and
//! the [`StudioProfile`]. Layout runs inside `spawn_blocking` because PDF
//! serialisation and the file write are synchronous.

use crate::config::StudioProfile;
use crate::contract::ValidContract;
use crate::error::RenderError;
use crate::output::{DocumentKind, RenderedDocument};
use crate::pipeline::layout::{Canvas, Cell, TextBlock, LETTER_WIDTH};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

const PAGE_MARGIN: f32 = 28.0;
const NOTE_SIZE: f32 = 8.0;

/// Renders one document of a contract into `out_dir`.
///
/// Implementations must be deterministic and write exactly one file.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(
        &self,
        contract: &ValidContract,
        kind: DocumentKind,
        out_dir: &Path,
    ) -> Result<RenderedDocument, RenderError>;
}

/// Renderer producing single-page PDFs with lopdf.
#[derive(Debug, Clone, Default)]
pub struct PdfDocumentRenderer {
    studio: StudioProfile,
}

impl PdfDocumentRenderer {
    pub fn new(studio: StudioProfile) -> Self {
        Self { studio }
    }
}

#[async_trait]
impl DocumentRenderer for PdfDocumentRenderer {
    async fn render(
        &self,
        contract: &ValidContract,
        kind: DocumentKind,
        out_dir: &Path,
    ) -> Result<RenderedDocument, RenderError> {
        let contract = contract.clone();
        let studio = self.studio.clone();
        let path = document_path(out_dir, &contract, kind);

        tokio::task::spawn_blocking(move || render_blocking(&contract, &studio, kind, path))
            .await
            .map_err(|e| RenderError::Internal(format!("Render task panicked: {e}")))?
    }
}

fn document_path(out_dir: &Path, contract: &ValidContract, kind: DocumentKind) -> PathBuf {
    let prefix = match kind {
        DocumentKind::ContractPage => "contract-specifics",
        DocumentKind::TermsPage => "contract-terms",
    };
    out_dir.join(format!("{prefix}-{}.pdf", contract.slug()))
}

fn render_blocking(
    contract: &ValidContract,
    studio: &StudioProfile,
    kind: DocumentKind,
    path: PathBuf,
) -> Result<RenderedDocument, RenderError> {
    let canvas = match kind {
        DocumentKind::ContractPage => contract_page(contract, studio),
        DocumentKind::TermsPage => terms_page(contract, studio),
    };
    let title = studio.document_title(&contract.client.name, &contract.event.name);
    let page = canvas.finish();
    let height = page.height;

    let mut doc = page
        .into_document(&title)
        .map_err(|e| RenderError::Encode {
            document: kind.to_string(),
            detail: e.to_string(),
        })?;
    doc.save(&path).map_err(|source| RenderError::Write {
        path: path.clone(),
        source,
    })?;

    debug!(kind = %kind, height, path = %path.display(), "Rendered document");
    Ok(RenderedDocument { path, kind })
}

fn heading(text: &str) -> Cell {
    Cell::full(TextBlock::new(text).bold().size(11.0).centered())
}

fn centered(span: u8, text: impl Into<String>) -> Cell {
    Cell::new(span, TextBlock::new(text).centered())
}

fn contract_page(contract: &ValidContract, studio: &StudioProfile) -> Canvas {
    let mut c = Canvas::new(LETTER_WIDTH, PAGE_MARGIN);
    c.set_border(true);

    let event = &contract.event;
    c.row(&[heading("Event Details")], 18.0);
    c.row(
        &[Cell::with_blocks(
            12,
            vec![
                TextBlock::new(format!("Event : {}", event.name)),
                TextBlock::new(format!("Event Date: {}", event.date)),
                TextBlock::new(format!("Event Coverage Time: {}", event.coverage_window)),
                TextBlock::new(format!("Event Venue: {}", event.venue)),
            ],
        )],
        56.0,
    );
    c.set_border(false);
    c.spacer(28.0);
    c.set_border(true);

    c.row(&[heading("Deliverables")], 18.0);
    c.row(
        &[
            centered(1, "S.No"),
            centered(3, "Deliverable"),
            centered(2, "Quantity"),
            centered(3, "Mode"),
            centered(3, "Delivered on or before**"),
        ],
        18.0,
    );
    for (i, d) in contract.deliverables.iter().enumerate() {
        let description = if i == 0 {
            format!("{}*", d.description)
        } else {
            d.description.clone()
        };
        c.row(
            &[
                centered(1, format!("{}.", i + 1)),
                centered(3, description),
                centered(2, d.quantity.as_str()),
                centered(3, d.mode.as_str()),
                centered(3, d.delivery_date.as_str()),
            ],
            28.0,
        );
    }

    c.set_border(false);
    c.note(
        "*",
        &format!(
            "{} does not provide RAW images/ video files unless specifically mentioned above \
             in the section 2. Acquiring RAW images/ video comes at an additional cost.",
            studio.name
        ),
        NOTE_SIZE,
    );
    c.note(
        "**",
        &format!(
            "{} timelines for the delivery of projects depends on various factors which include \
             the scale of the event, type of the service and number of deliverables, editing work \
             according to the clients needs etc. We strive to deliver the first digital copy for \
             the events by the date mentioned above. That being said, the delivery for event \
             projects could take up to 2 months and wedding projects could take up to 6 months \
             in special cases.",
            studio.name
        ),
        NOTE_SIZE,
    );
    c.spacer(28.0);
    c.set_border(true);

    let schedule = contract.schedule();
    c.row(&[heading("Payment Details")], 18.0);
    c.row(
        &[
            centered(1, "S.No"),
            centered(4, "Description"),
            centered(2, "Amount"),
            centered(3, "Mode"),
            centered(2, "Status"),
        ],
        18.0,
    );

    let mut serial = 0;
    if schedule.advance_paid != 0 {
        serial += 1;
        c.row(
            &[
                centered(1, format!("{serial}.")),
                centered(4, "Advance Paid"),
                centered(2, format!("${}", schedule.advance_paid)),
                centered(3, contract.payment.advance_mode.as_str()),
                centered(2, "Paid"),
            ],
            18.0,
        );
    }

    serial += 1;
    c.row(
        &[
            centered(1, format!("{serial}.")),
            centered(4, "Booking fee* - 25% (Non-refundable)"),
            centered(2, format!("${}", schedule.booking_fee)),
            Cell::with_blocks(
                3,
                studio
                    .payment_handles
                    .iter()
                    .map(|h| TextBlock::new(h.as_str()).centered())
                    .collect(),
            ),
            centered(2, "To be paid"),
        ],
        28.0,
    );

    serial += 1;
    c.row(
        &[
            centered(1, format!("{serial}.")),
            centered(4, "Remaining Project Payment** - 75%"),
            centered(2, format!("${}", schedule.remaining)),
            centered(3, studio.balance_mode.as_str()),
            centered(2, "To be paid"),
        ],
        18.0,
    );
    c.row(
        &[
            centered(1, ""),
            centered(4, "Total - 100%"),
            centered(2, format!("${}", schedule.total)),
            centered(3, ""),
            centered(2, ""),
        ],
        18.0,
    );

    c.set_border(false);
    c.note(
        "*",
        "Booking fee(25%) has to be paid during the time of signing this contract. We do not \
         guarantee the availability of our team for the event date until this payment is made in full.",
        NOTE_SIZE,
    );
    c.note(
        "**",
        &format!(
            "Remaining Project Payment(75%) has to be paid on the day of the event in {}. We do not \
             accept any other mode of payment; there is no exception to this policy. Editing work \
             only begins on the receipt of complete payment.",
            studio.balance_mode.to_lowercase()
        ),
        NOTE_SIZE,
    );
    c
}

/// Numbered clauses as `(heading, body)`.
fn terms(contract: &ValidContract, studio: &StudioProfile) -> Vec<(&'static str, String)> {
    let name = &studio.name;
    let extra = contract.payment.per_hour_extra;
    let additional = format!(
        "The Client may request additional services from the {name}, but such requests must be \
         made before the event date and such requests will only be entertained subject to \
         availability."
    );

    vec![
        (
            "Reschedule Policy:",
            format!(
                "We understand that event dates and times can change due to several factors. We \
                 accommodate up to 1 hour of delay/ prepone in the event time on the day of the \
                 event if informed 4 hours prior to the start of the event time. The {name} team \
                 will also try to accommodate requests to extend stay to cover the event if the \
                 event runs longer than anticipated. That being this request will come at an extra \
                 hourly prorated cost of ${extra}/hr which is non-negotiable and is subject to \
                 availability. Our schedules are packed during busy months and the team might have \
                 to cover an event before or after the client’s event. We always encourage our \
                 clients to book our time conservatively if they anticipate any delays. {name} \
                 allows one reschedule of the event if informed 24 hrs prior to the date of the \
                 event provided project payment is made in full while requesting the reschedule. \
                 There are no exceptions to this clause."
            ),
        ),
        (
            "Cancellation/ Termination:",
            format!(
                "Client may decide to terminate this agreement at any time upon a written \
                 notification(Email, whatsapp, instagram) to {name}. After a written notification, \
                 this agreement would be deemed void. {name} shall be entitled to retain the \
                 booking advance made by the client. {name} is entitled to take other bookings for \
                 the event date after the termination of the contract and any further requests \
                 will only be subject to availability and would require drafting a new contract."
            ),
        ),
        (
            "Modifications to video deliverables:",
            "Client agrees to our creative choices and artistic/style decisions that we make \
             during editing. Once we deliver the first digital copy we allow the client to request \
             up-to two revisions both of which need to be requested within one week of the \
             delivered digital copy. Final soft copy for the project will be delivered to the \
             client after the second revision, and the project will be termed Completed."
                .to_string(),
        ),
        (
            "Data Retention Policy:",
            "We erase all the client data after the completion of the project and do not take any \
             additional requests for changes."
                .to_string(),
        ),
        (
            "Copyright:",
            format!(
                "{name} shall retain the copyright to all the photographs and/or videography shot \
                 during the event. The Client shall not remove or alter any watermarks, logos, or \
                 other identification marks included on the photographs and/or videography without \
                 the prior written consent. {name} also holds the rights to use the edited videos \
                 and photos for the purpose of promoting our business in digital media, including \
                 but not limited to our website and social media."
            ),
        ),
        ("Additional Services:", additional.clone()),
        // Body repeats clause 6, as in the signed template.
        ("Limitation of Liability:", additional),
        (
            "Entire Agreement:",
            "This Agreement constitutes the entire agreement between the parties and supersedes \
             all prior negotiations, representations, understandings, and agreements between the \
             parties."
                .to_string(),
        ),
    ]
}

fn terms_page(contract: &ValidContract, studio: &StudioProfile) -> Canvas {
    let mut c = Canvas::new(LETTER_WIDTH, PAGE_MARGIN);
    for (i, (title, body)) in terms(contract, studio).into_iter().enumerate() {
        c.row(
            &[
                centered(1, format!("{}.", i + 1)),
                Cell::with_blocks(11, vec![TextBlock::new(title).bold(), TextBlock::new(body)]),
            ],
            20.0,
        );
    }
    c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{ClientDetails, ContractRequest, Deliverable, EventDetails, PaymentDetails};

    fn contract(advance: i64) -> ValidContract {
        ContractRequest {
            client: ClientDetails {
                name: "Jane Doe".into(),
                email: "jane@example.com".into(),
            },
            event: EventDetails {
                name: "Wedding Reception".into(),
                date: "06/14/2025".into(),
                coverage_window: "5pm - 10pm".into(),
                venue: "Harbor Hall".into(),
            },
            payment: PaymentDetails {
                total_amount: 1000,
                advance_paid: advance,
                advance_mode: "Zelle".into(),
                per_hour_extra: 150,
            },
            deliverables: vec![Deliverable {
                description: "Edited photos".into(),
                quantity: "300".into(),
                mode: "Online gallery".into(),
                delivery_date: "07/14/2025".into(),
            }],
        }
        .validate()
        .unwrap()
    }

    fn page_text(path: &Path) -> String {
        let doc = lopdf::Document::load(path).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1, "every document is a single page");
        let page_id = *pages.values().next().unwrap();
        String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).into_owned()
    }

    #[tokio::test]
    async fn contract_page_lists_event_and_payment() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = PdfDocumentRenderer::default();
        let doc = renderer
            .render(&contract(0), DocumentKind::ContractPage, dir.path())
            .await
            .unwrap();

        assert_eq!(
            doc.path.file_name().unwrap(),
            "contract-specifics-Wedding_Reception-Jane_Doe.pdf"
        );
        let text = page_text(&doc.path);
        assert!(text.contains("Event : Wedding Reception"));
        assert!(text.contains("Edited photos*"));
        assert!(text.contains("$250"), "booking fee");
        assert!(text.contains("$750"), "remaining");
        assert!(!text.contains("Advance Paid"), "no advance row when advance is zero");
    }

    #[tokio::test]
    async fn advance_row_appears_when_paid() {
        let dir = tempfile::tempdir().unwrap();
        let doc = PdfDocumentRenderer::default()
            .render(&contract(100), DocumentKind::ContractPage, dir.path())
            .await
            .unwrap();
        let text = page_text(&doc.path);
        assert!(text.contains("Advance Paid"));
        assert!(text.contains("$150"));
    }

    #[tokio::test]
    async fn terms_page_interpolates_hourly_rate() {
        let dir = tempfile::tempdir().unwrap();
        let doc = PdfDocumentRenderer::default()
            .render(&contract(0), DocumentKind::TermsPage, dir.path())
            .await
            .unwrap();
        assert_eq!(doc.kind, DocumentKind::TermsPage);
        let text = page_text(&doc.path);
        assert!(text.contains("$150/hr"));
        assert!(text.contains("Entire Agreement:"));
    }

    #[tokio::test]
    async fn missing_output_dir_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = PdfDocumentRenderer::default()
            .render(&contract(0), DocumentKind::TermsPage, &missing)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Write { .. }), "got {err:?}");
    }

    #[test]
    fn rendering_is_deterministic() {
        let c = contract(0);
        let studio = StudioProfile::default();
        let a = contract_page(&c, &studio).finish();
        let b = contract_page(&c, &studio).finish();
        assert_eq!(a.height, b.height);
        assert_eq!(a.operations.len(), b.operations.len());
    }
}
