//! PDF rasterisation: one `DynamicImage` per page, sized to the page box.
//!
//! Page images are resized to the page's logical width × height (rounded), so
//! one pixel equals one PDF unit and annotation rectangles map onto the
//! image without scaling. Rasterisation is all-or-nothing: any page failure
//! fails the request.
//!
//! pdfium is not async-safe; callers run [`PageRasterizer::rasterize`] inside
//! `tokio::task::spawn_blocking` (see [`rasterize_blocking`]).

use crate::error::AnnotError;
use crate::pipeline::walk::PageSize;
use image::imageops::FilterType;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Renders every page of a PDF to an image.
pub trait PageRasterizer: Send + Sync {
    /// Return one image per entry of `pages`, in the same order, each exactly
    /// `pages[i].pixel_dimensions()` in size.
    fn rasterize(&self, pdf: &[u8], pages: &[PageSize]) -> Result<Vec<DynamicImage>, AnnotError>;
}

/// Run a rasteriser on the blocking pool.
pub async fn rasterize_blocking(
    rasterizer: Arc<dyn PageRasterizer>,
    pdf: Arc<Vec<u8>>,
    pages: Vec<PageSize>,
) -> Result<Vec<DynamicImage>, AnnotError> {
    let expected = pages.len();
    let images = tokio::task::spawn_blocking(move || rasterizer.rasterize(&pdf, &pages))
        .await
        .map_err(|e| AnnotError::Internal(format!("Render task panicked: {}", e)))??;

    if images.len() != expected {
        return Err(AnnotError::PageCountMismatch {
            expected,
            rendered: images.len(),
        });
    }
    Ok(images)
}

/// The production rasteriser, backed by pdfium-render.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    library_path: Option<PathBuf>,
    password: Option<String>,
}

impl PdfiumRasterizer {
    pub fn new(library_path: Option<PathBuf>, password: Option<String>) -> Self {
        Self {
            library_path,
            password,
        }
    }

    /// Bind pdfium: explicit path, then `PDFIUM_LIB_PATH`, then the system library.
    fn bind(&self) -> Result<Pdfium, AnnotError> {
        let explicit = self
            .library_path
            .clone()
            .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

        let bindings = match explicit {
            Some(path) => Pdfium::bind_to_library(library_file(&path)),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| AnnotError::PdfiumBindingFailed(format!("{:?}", e)))?;

        Ok(Pdfium::new(bindings))
    }
}

/// Accept either the library file itself or the directory holding it.
fn library_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(path)
    } else {
        path.to_path_buf()
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize(&self, pdf: &[u8], pages: &[PageSize]) -> Result<Vec<DynamicImage>, AnnotError> {
        let pdfium = self.bind()?;
        let password = self.password.as_deref();

        let document = pdfium.load_pdf_from_byte_slice(pdf, password).map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                AnnotError::PasswordRequired {
                    source_name: "<bytes>".to_string(),
                }
            } else {
                AnnotError::RasterisationFailed {
                    page: 0,
                    detail: err_str,
                }
            }
        })?;

        let doc_pages = document.pages();
        info!("Rasterising {} pages", doc_pages.len());

        let mut images = Vec::with_capacity(pages.len());
        for size in pages {
            let idx = size.number - 1;
            let page = doc_pages
                .get(idx as u16)
                .map_err(|e| AnnotError::RasterisationFailed {
                    page: size.number,
                    detail: format!("{:?}", e),
                })?;

            let (width, height) = size.pixel_dimensions();
            let render_config = PdfRenderConfig::new()
                .set_target_width(width as i32)
                .set_maximum_height(height as i32);

            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                AnnotError::RasterisationFailed {
                    page: size.number,
                    detail: format!("{:?}", e),
                }
            })?;

            let image = bitmap.as_image();
            let image = if image.width() == width && image.height() == height {
                image
            } else {
                image.resize_exact(width, height, FilterType::Triangle)
            };
            debug!("Rendered page {} → {}x{} px", size.number, width, height);
            images.push(image);
        }

        Ok(images)
    }
}
