//! PDFium-backed [`PdfEngine`].
//!
//! PDFium is initialized once per process and never torn down: the binding
//! holds a process-wide init lock from `FPDF_InitLibrary` until
//! `FPDF_DestroyLibrary`, so a second binding would block forever. Pool
//! instances are cheap handles over that one binding. PDFium itself is not
//! thread-safe, so documents are opened and used one at a time; the engine
//! pool bounds how many operations queue for that turn.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::info;

use docket_core::{Error, Result};

use super::pdf::{PdfEngine, PdfHandle};

fn render_error(e: PdfiumError) -> Error {
    Error::Render(e.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A value bound at most once, with failed binds retried on the next call.
struct BindOnce<T> {
    value: OnceLock<T>,
    binding: Mutex<()>,
}

impl<T> BindOnce<T> {
    const fn new() -> Self {
        Self {
            value: OnceLock::new(),
            binding: Mutex::new(()),
        }
    }

    fn get_or_bind(&self, bind: impl FnOnce() -> Result<T>) -> Result<&T> {
        if let Some(value) = self.value.get() {
            return Ok(value);
        }
        let _binding = lock(&self.binding);
        if let Some(value) = self.value.get() {
            return Ok(value);
        }
        let bound = bind()?;
        Ok(self.value.get_or_init(|| bound))
    }
}

struct PdfiumLibrary {
    pdfium: Pdfium,
    /// Held for the life of every open document.
    in_use: Mutex<()>,
}

static LIBRARY: BindOnce<PdfiumLibrary> = BindOnce::new();

/// Handle to the process-wide PDFium binding.
pub struct PdfiumEngine {
    library: &'static PdfiumLibrary,
}

impl PdfiumEngine {
    /// Bind PDFium from `library_path`, or from the system library search
    /// path when `None`. Only the first successful call loads the library;
    /// later calls reuse it whatever path they pass. Call it from a blocking
    /// context.
    pub fn bind(library_path: Option<&Path>) -> Result<Self> {
        let library = LIBRARY.get_or_bind(|| {
            let bindings = match library_path {
                Some(path) => Pdfium::bind_to_library(path),
                None => Pdfium::bind_to_system_library(),
            }
            .map_err(|e| Error::Config(format!("failed to load PDFium: {}", e)))?;
            info!(library_path = ?library_path, "PDFium loaded");
            Ok(PdfiumLibrary {
                pdfium: Pdfium::new(bindings),
                in_use: Mutex::new(()),
            })
        })?;
        Ok(Self { library })
    }

    /// Factory for an engine pool.
    pub fn factory(library_path: Option<PathBuf>) -> impl Fn() -> Result<Self> + Send + Sync {
        move || Self::bind(library_path.as_deref())
    }
}

impl PdfEngine for PdfiumEngine {
    fn open<'a>(&'a self, data: &'a [u8]) -> Result<Box<dyn PdfHandle + 'a>> {
        let turn = lock(&self.library.in_use);
        let document = self
            .library
            .pdfium
            .load_pdf_from_byte_slice(data, None)
            .map_err(render_error)?;
        Ok(Box::new(PdfiumDocument {
            document,
            _turn: turn,
        }))
    }
}

struct PdfiumDocument<'a> {
    // Declared first so the document closes before the turn is released.
    document: PdfDocument<'a>,
    _turn: MutexGuard<'a, ()>,
}

impl<'a> PdfiumDocument<'a> {
    fn page(&self, index: usize) -> Result<PdfPage<'a>> {
        let index = u16::try_from(index)
            .map_err(|_| Error::Render(format!("page index {} out of range", index)))?;
        self.document.pages().get(index).map_err(render_error)
    }
}

impl PdfHandle for PdfiumDocument<'_> {
    fn page_count(&self) -> usize {
        usize::from(self.document.pages().len())
    }

    fn page_text(&self, index: usize) -> Result<String> {
        let page = self.page(index)?;
        let text = page.text().map_err(render_error)?;
        Ok(text.all())
    }

    fn render_page(&self, index: usize, dpi: u16) -> Result<DynamicImage> {
        let page = self.page(index)?;
        let config = PdfRenderConfig::new().scale_page_by_factor(f32::from(dpi) / 72.0);
        let bitmap = page.render_with_config(&config).map_err(render_error)?;
        Ok(bitmap.as_image())
    }
}
