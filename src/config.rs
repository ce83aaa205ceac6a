//! Configuration for the publication pipeline.
//!
//! All orchestration behaviour is controlled through [`PublisherConfig`],
//! built via [`PublisherConfigBuilder`]. Business constants that appear in the
//! rendered documents and on the published form (studio name, form title,
//! payment handles) live in [`StudioProfile`] so the layout code never
//! hard-codes them.

use crate::error::ConfigError;
use crate::gateway::LocationId;
use crate::observer::SharedObserver;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Remote folder that receives uploaded images before they are referenced
/// by a form.
pub const DEFAULT_STAGING_LOCATION: &str = "1UX-0xXQPRbV5aj1G_NNX06gyODgakvQP";

/// Remote folder where finished forms are kept.
pub const DEFAULT_FORMS_LOCATION: &str = "1aMZeE6MnjTmtsxwD4T2Xye4sSgbIVn12";

/// Configuration for a contract publication run.
///
/// # Example
/// ```rust
/// use contract_forms::PublisherConfig;
///
/// let config = PublisherConfig::builder()
///     .max_attempts(3)
///     .retry_delay_ms(2_000)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_attempts, 3);
/// ```
#[derive(Clone)]
pub struct PublisherConfig {
    /// Attempts of the upload → create → insert loop. Default: 3.
    pub max_attempts: u32,

    /// Fixed delay between attempts in milliseconds. Default: 5000.
    ///
    /// The delay does not grow: the remote APIs involved fail for reasons
    /// (quota blips, eventual consistency after an upload) that clear within
    /// seconds, and a run is bounded by `max_attempts × retry_delay_ms`.
    pub retry_delay_ms: u64,

    /// Parent location for uploaded images. Each run stages into its own
    /// `run-<id>` sub-location underneath.
    pub staging_location: LocationId,

    /// Long-term location that finished forms are relocated into.
    pub forms_location: LocationId,

    /// Parent directory for per-run local workspaces.
    pub work_dir: PathBuf,

    /// Upload the images of one attempt concurrently. Default: true.
    pub concurrent_uploads: bool,

    /// Longest-edge cap for rasterised pages, in pixels. Default: 1700.
    pub max_rendered_pixels: u32,

    /// JPEG quality (1–100) of the uploaded page images. Default: 10.
    ///
    /// Pages are mostly flat text on white, which survives heavy compression;
    /// small images keep uploads fast and well under form image limits.
    pub jpeg_quality: u8,

    /// Bind pdfium from this library path instead of the system library.
    pub pdfium_library_path: Option<PathBuf>,

    /// Timeout for every remote call, in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Studio branding and business constants.
    pub studio: StudioProfile,

    /// Optional observer receiving stage, attempt, and rollback events.
    pub observer: Option<SharedObserver>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 5_000,
            staging_location: LocationId::from(DEFAULT_STAGING_LOCATION),
            forms_location: LocationId::from(DEFAULT_FORMS_LOCATION),
            work_dir: std::env::temp_dir().join("contract-forms"),
            concurrent_uploads: true,
            max_rendered_pixels: 1700,
            jpeg_quality: 10,
            pdfium_library_path: None,
            api_timeout_secs: 60,
            studio: StudioProfile::default(),
            observer: None,
        }
    }
}

impl fmt::Debug for PublisherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublisherConfig")
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("staging_location", &self.staging_location)
            .field("forms_location", &self.forms_location)
            .field("work_dir", &self.work_dir)
            .field("concurrent_uploads", &self.concurrent_uploads)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("pdfium_library_path", &self.pdfium_library_path)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("studio", &self.studio.name)
            .field("observer", &self.observer.as_ref().map(|_| "<dyn PipelineObserver>"))
            .finish()
    }
}

impl PublisherConfig {
    pub fn builder() -> PublisherConfigBuilder {
        PublisherConfigBuilder {
            config: Self::default(),
        }
    }

    /// Per-request timeout for the remote gateway.
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Builder for [`PublisherConfig`].
#[derive(Debug)]
pub struct PublisherConfigBuilder {
    config: PublisherConfig,
}

impl PublisherConfigBuilder {
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn staging_location(mut self, location: impl Into<LocationId>) -> Self {
        self.config.staging_location = location.into();
        self
    }

    pub fn forms_location(mut self, location: impl Into<LocationId>) -> Self {
        self.config.forms_location = location.into();
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn concurrent_uploads(mut self, v: bool) -> Self {
        self.config.concurrent_uploads = v;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q;
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn studio(mut self, studio: StudioProfile) -> Self {
        self.config.studio = studio;
        self
    }

    pub fn observer(mut self, observer: SharedObserver) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PublisherConfig, ConfigError> {
        let c = &self.config;
        if c.max_attempts == 0 {
            return Err(ConfigError("max_attempts must be ≥ 1".into()));
        }
        if !(1..=100).contains(&c.jpeg_quality) {
            return Err(ConfigError(format!(
                "jpeg_quality must be 1–100, got {}",
                c.jpeg_quality
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(ConfigError("api_timeout_secs must be ≥ 1".into()));
        }
        if c.staging_location.as_str().is_empty() || c.forms_location.as_str().is_empty() {
            return Err(ConfigError("remote locations must not be empty".into()));
        }
        Ok(self.config)
    }
}

/// Branding and business constants printed on documents and forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudioProfile {
    /// Studio name used throughout the terms.
    pub name: String,
    /// Where the studio is based, as written in the form description.
    pub locality: String,
    /// Title of every published form.
    pub form_title: String,
    /// Title of the image item showing the contract page.
    pub contract_item_title: String,
    /// Title of the image item showing the terms page.
    pub terms_item_title: String,
    /// Title of the required free-text signature item.
    pub signature_item_title: String,
    /// Booking-fee payment channels, one per line in the payment table.
    pub payment_handles: Vec<String>,
    /// Mode printed for the balance due on the event day.
    pub balance_mode: String,
}

impl Default for StudioProfile {
    fn default() -> Self {
        Self {
            name: "Red Dot Studios".into(),
            locality: "a Massachusetts based photography and videography Service".into(),
            form_title: "RED DOT STUDIOS SERVICES AGREEMENT".into(),
            contract_item_title: "The Client hereby agree as follows:".into(),
            terms_item_title: "Terms and Conditions".into(),
            signature_item_title: "Digital Signature (Printed Name):".into(),
            payment_handles: vec!["Venmo - @svarikut".into(), "Zelle - 847-922-7653".into()],
            balance_mode: "Cash Only".into(),
        }
    }
}

impl StudioProfile {
    /// Form description, interpolated with the signing date (`MM/DD/YYYY`)
    /// and the client's name.
    pub fn form_description(&self, date: chrono::NaiveDate, client_name: &str) -> String {
        format!(
            "This Agreement was made and entered into on {} between {}, {} and {}(\"Client\").",
            date.format("%m/%d/%Y"),
            self.name,
            self.locality,
            client_name
        )
    }

    /// Drive-visible document title, `Contract-<client>-<event>`.
    pub fn document_title(&self, client_name: &str, event_name: &str) -> String {
        format!(
            "Contract-{}-{}",
            client_name.replace(' ', "_"),
            event_name.replace(' ', "_")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Arc;

    #[test]
    fn defaults_match_business_constants() {
        let c = PublisherConfig::default();
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.staging_location.as_str(), DEFAULT_STAGING_LOCATION);
        assert_eq!(c.forms_location.as_str(), DEFAULT_FORMS_LOCATION);
        assert!(c.concurrent_uploads);
    }

    #[test]
    fn builder_rejects_zero_attempts() {
        let err = PublisherConfig::builder().max_attempts(0).build().unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn api_timeout_is_validated_and_exposed() {
        let err = PublisherConfig::builder().api_timeout_secs(0).build().unwrap_err();
        assert!(err.to_string().contains("api_timeout_secs"));

        let c = PublisherConfig::builder().api_timeout_secs(15).build().unwrap();
        assert_eq!(c.api_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn builder_rejects_out_of_range_quality() {
        assert!(PublisherConfig::builder().jpeg_quality(0).build().is_err());
        assert!(PublisherConfig::builder().jpeg_quality(101).build().is_err());
        assert!(PublisherConfig::builder().jpeg_quality(85).build().is_ok());
    }

    #[test]
    fn debug_hides_observer() {
        let c = PublisherConfig::builder()
            .observer(Arc::new(crate::observer::NoopObserver))
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(dbg.contains("<dyn PipelineObserver>"));
    }

    #[test]
    fn description_interpolates_date_and_client() {
        let studio = StudioProfile::default();
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        let d = studio.form_description(date, "Jane Doe");
        assert!(d.contains("on 03/07/2025 between Red Dot Studios"), "got: {d}");
        assert!(d.ends_with("Jane Doe(\"Client\")."), "got: {d}");
    }

    #[test]
    fn document_title_replaces_spaces() {
        let studio = StudioProfile::default();
        assert_eq!(
            studio.document_title("Jane Doe", "Wedding Reception"),
            "Contract-Jane_Doe-Wedding_Reception"
        );
    }
}
