//! pdfium access: layout-aware page text and page rasterisation.
//!
//! pdfium wraps a C++ library with thread-local state, so every function
//! here is blocking and must be called from `tokio::task::spawn_blocking`.
//!
//! The library is bound explicitly instead of through `Pdfium::default()`
//! so that a missing libpdfium surfaces as a strategy error the extractor
//! can record, not a panic. Lookup order: `PDFIUM_LIB_PATH`, the working
//! directory, then the system library path.

use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// Outcome for one rasterised page.
pub type PageImage = Result<DynamicImage, String>;

/// Bind to a pdfium shared library.
pub fn bind_pdfium() -> Result<Pdfium, String> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path)
            .map_err(|e| format!("cannot load pdfium from PDFIUM_LIB_PATH={path}: {e:?}"))?,
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| {
                format!("pdfium library not found (set PDFIUM_LIB_PATH to libpdfium): {e:?}")
            })?,
    };
    Ok(Pdfium::new(bindings))
}

/// Open a document, translating password failures into readable messages.
fn load<'a>(
    pdfium: &'a Pdfium,
    bytes: &'a [u8],
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, String> {
    pdfium.load_pdf_from_byte_slice(bytes, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                "wrong password".to_string()
            } else {
                "document is encrypted; supply a password".to_string()
            }
        } else {
            format!("pdfium cannot open document: {err_str}")
        }
    })
}

/// Read every page's text layer through pdfium.
pub fn page_texts_blocking(
    bytes: &[u8],
    password: Option<&str>,
) -> Result<Vec<Result<String, String>>, String> {
    let pdfium = bind_pdfium()?;
    let document = load(&pdfium, bytes, password)?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    debug!("pdfium text: {} pages", total_pages);

    let mut results = Vec::with_capacity(total_pages);
    for idx in 0..total_pages {
        let text = match pages.get(idx as u16) {
            Ok(page) => match page.text() {
                Ok(text) => Ok(text.all()),
                Err(e) => Err(format!("{:?}", e)),
            },
            Err(e) => Err(format!("{:?}", e)),
        };
        results.push(text);
    }
    Ok(results)
}

/// Rasterise every page, capping the longest edge at `max_pixels`.
///
/// A page that fails to render is reported in place; the others still render.
pub fn render_pages_blocking(
    bytes: &[u8],
    password: Option<&str>,
    max_pixels: u32,
) -> Result<Vec<PageImage>, String> {
    let pdfium = bind_pdfium()?;
    let document = load(&pdfium, bytes, password)?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("Rasterising {} pages for OCR", total_pages);

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(total_pages);
    for idx in 0..total_pages {
        let image = pages
            .get(idx as u16)
            .map_err(|e| format!("{:?}", e))
            .and_then(|page| {
                page.render_with_config(&render_config)
                    .map(|bitmap| bitmap.as_image())
                    .map_err(|e| format!("{:?}", e))
            });

        if let Ok(ref img) = image {
            debug!("Rendered page {} → {}x{} px", idx + 1, img.width(), img.height());
        }
        results.push(image);
    }

    Ok(results)
}
