//! Filetype detection for uploaded documents.
//!
//! Only magic bytes are trusted; the client-supplied filename extension is
//! ignored so a renamed file cannot select the wrong analyzer.

use crate::defaults::FILETYPE_HEADER_LEN;
use crate::models::Filetype;

/// Detect the filetype of `data` from its leading bytes.
pub fn detect_filetype(data: &[u8]) -> Filetype {
    let header = &data[..data.len().min(FILETYPE_HEADER_LEN)];
    match infer::get(header) {
        Some(kind) if kind.mime_type() == "application/pdf" => Filetype::Pdf,
        _ => Filetype::Unknown,
    }
}
