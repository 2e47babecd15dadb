//! Analyzer and engine implementations.

pub mod pdf;
pub mod pdfium;

pub use pdf::{PdfAnalyzer, PdfEngine, PdfHandle, PreviewConfig};
pub use pdfium::PdfiumEngine;
