//! Rasterizer: rendered PDF → one JPEG per page, via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state; `pdfium-render` calls
//! are synchronous and CPU-heavy. Running them on the blocking pool keeps the
//! Tokio workers free while a page renders.
//!
//! ## Why cap pixels?
//!
//! Documents grow in height with their content. `max_rendered_pixels` caps
//! the longest edge so a long deliverables table cannot produce an image
//! larger than the form accepts.

use crate::error::RasterError;
use crate::output::{RasterImage, RenderedDocument};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Converts a rendered document into images, one per page, in page order.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(
        &self,
        document: &RenderedDocument,
        out_dir: &Path,
    ) -> Result<Vec<RasterImage>, RasterError>;
}

/// [`Rasterizer`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    library_path: Option<PathBuf>,
    max_pixels: u32,
    jpeg_quality: u8,
}

impl PdfiumRasterizer {
    pub fn new(library_path: Option<PathBuf>, max_pixels: u32, jpeg_quality: u8) -> Self {
        Self {
            library_path,
            max_pixels,
            jpeg_quality,
        }
    }

    /// Take library path, pixel cap, and JPEG quality from the config.
    pub fn from_config(config: &crate::config::PublisherConfig) -> Self {
        Self::new(
            config.pdfium_library_path.clone(),
            config.max_rendered_pixels,
            config.jpeg_quality,
        )
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(
        &self,
        document: &RenderedDocument,
        out_dir: &Path,
    ) -> Result<Vec<RasterImage>, RasterError> {
        let this = self.clone();
        let document = document.clone();
        let out_dir = out_dir.to_path_buf();

        tokio::task::spawn_blocking(move || this.rasterize_blocking(&document, &out_dir))
            .await
            .map_err(|e| RasterError::Internal(format!("Raster task panicked: {e}")))?
    }
}

impl PdfiumRasterizer {
    fn bind(&self) -> Result<Pdfium, RasterError> {
        let bindings = match &self.library_path {
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| RasterError::Binding(format!("{e:?}")))?;
        Ok(Pdfium::new(bindings))
    }

    fn rasterize_blocking(
        &self,
        document: &RenderedDocument,
        out_dir: &Path,
    ) -> Result<Vec<RasterImage>, RasterError> {
        let pdfium = self.bind()?;
        let path = &document.path;

        let pdf = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| RasterError::Load {
                path: path.clone(),
                detail: format!("{e:?}"),
            })?;

        let pages = pdf.pages();
        let total = pages.len() as usize;
        if total == 0 {
            return Err(RasterError::Empty { path: path.clone() });
        }
        info!(kind = %document.kind, pages = total, "Rasterising document");

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let mut images = Vec::with_capacity(total);
        for (idx, page) in pages.iter().enumerate() {
            let number = idx + 1;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| RasterError::Page {
                    path: path.clone(),
                    page: number,
                    detail: format!("{e:?}"),
                })?;
            let image = bitmap.as_image();
            debug!(page = number, width = image.width(), height = image.height(), "Rendered page");

            let bytes = encode_jpeg(&image, self.jpeg_quality)
                .map_err(|source| RasterError::Encode { page: number, source })?;
            let out = out_dir.join(image_file_name(document, number, total));
            std::fs::write(&out, bytes).map_err(|source| RasterError::Write {
                path: out.clone(),
                source,
            })?;

            images.push(RasterImage {
                path: out,
                kind: document.kind,
                page: number,
            });
        }
        Ok(images)
    }
}

/// `image-<kind>.jpg` for single-page documents, `image-<kind>-<n>.jpg`
/// otherwise.
pub fn image_file_name(document: &RenderedDocument, page: usize, total: usize) -> String {
    if total == 1 {
        format!("image-{}.jpg", document.kind.tag())
    } else {
        format!("image-{}-{page}.jpg", document.kind.tag())
    }
}

/// Encode a page as baseline JPEG at `quality`. Alpha is dropped.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
    debug!(bytes = buf.len(), quality, "Encoded JPEG");
    Ok(buf)
}
