//! PDF analyzer built on a pooled native rendering engine.
//!
//! Every operation leases one engine instance for the whole document and
//! does all engine work on the blocking thread pool. The native document is
//! closed when its handle drops and the instance goes back to the pool when
//! the lease drops, on success and error paths alike.

use std::sync::Arc;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use docket_core::defaults;
use docket_core::{Document, Error, Filetype, Result, StorageBackend};

use crate::analyzer::DocumentAnalyzer;
use crate::pool::EnginePool;

/// A native PDF engine instance.
pub trait PdfEngine: Send + 'static {
    /// Open a document from its bytes.
    fn open<'a>(&'a self, data: &'a [u8]) -> Result<Box<dyn PdfHandle + 'a>>;
}

/// An open native document. Dropping it closes the document.
pub trait PdfHandle {
    fn page_count(&self) -> usize;

    /// Text of zero-based page `index`.
    fn page_text(&self, index: usize) -> Result<String>;

    /// Rasterize zero-based page `index` at `dpi`.
    fn render_page(&self, index: usize, dpi: u16) -> Result<DynamicImage>;
}

/// Preview rendering settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewConfig {
    pub dpi: u16,
    pub jpeg_quality: u8,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            dpi: defaults::PREVIEW_DPI,
            jpeg_quality: defaults::PREVIEW_JPEG_QUALITY,
        }
    }
}

impl PreviewConfig {
    /// Read `PREVIEW_DPI` and `PREVIEW_JPEG_QUALITY` (1-100), falling back to defaults.
    pub fn from_env() -> Self {
        let dpi = std::env::var("PREVIEW_DPI")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .filter(|dpi| *dpi > 0)
            .unwrap_or(defaults::PREVIEW_DPI);
        let jpeg_quality = std::env::var("PREVIEW_JPEG_QUALITY")
            .ok()
            .and_then(|v| v.parse::<u8>().ok())
            .filter(|q| (1..=100).contains(q))
            .unwrap_or(defaults::PREVIEW_JPEG_QUALITY);
        Self { dpi, jpeg_quality }
    }
}

/// Encode one rendered page as JPEG.
fn render_jpeg(handle: &dyn PdfHandle, page: usize, config: PreviewConfig) -> Result<Vec<u8>> {
    let image = handle.render_page(page, config.dpi)?;
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, config.jpeg_quality)
        .encode_image(&image.to_rgb8())
        .map_err(|e| Error::Render(format!("JPEG encoding failed: {}", e)))?;
    Ok(buf)
}

/// Analyzer for PDF documents.
pub struct PdfAnalyzer<E: PdfEngine> {
    pool: EnginePool<E>,
    storage: Arc<dyn StorageBackend>,
    preview: PreviewConfig,
}

impl<E: PdfEngine> PdfAnalyzer<E> {
    pub fn new(pool: EnginePool<E>, storage: Arc<dyn StorageBackend>, preview: PreviewConfig) -> Self {
        Self {
            pool,
            storage,
            preview,
        }
    }

    /// Stream the original bytes out of blob storage.
    async fn load(&self, document: &Document) -> Result<Vec<u8>> {
        let mut reader = self.storage.open(&document.storage_path()).await?;
        let mut data = Vec::with_capacity(document.filesize.max(0) as usize);
        reader.read_to_end(&mut data).await?;
        Ok(data)
    }
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Internal(format!("PDF engine task failed: {}", e))
}

#[async_trait]
impl<E: PdfEngine> DocumentAnalyzer for PdfAnalyzer<E> {
    fn filetype(&self) -> Filetype {
        Filetype::Pdf
    }

    async fn extract_text(&self, document: &Document) -> Result<String> {
        let data = self.load(document).await?;
        let lease = self.pool.acquire().await?;
        let document_id = document.id;

        tokio::task::spawn_blocking(move || -> Result<String> {
            let handle = lease.open(&data)?;
            let mut text = String::new();
            for page in 0..handle.page_count() {
                match handle.page_text(page) {
                    Ok(page_text) if !page_text.is_empty() => {
                        text.push_str(&page_text);
                        text.push_str("\n\n");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(%document_id, page, error = %e, "Failed to extract text from page");
                    }
                }
            }
            Ok(text.trim().to_string())
        })
        .await
        .map_err(join_error)?
    }

    async fn generate_previews(&self, document: &Document) -> Result<Vec<String>> {
        let data = self.load(document).await?;
        let lease = self.pool.acquire().await?;
        let document_id = document.id;
        let config = self.preview;

        // Pages stream out of the blocking renderer one at a time so only a
        // couple of encoded previews are in memory at once.
        let (tx, mut rx) = mpsc::channel::<(usize, Vec<u8>)>(2);
        let render = tokio::task::spawn_blocking(move || -> Result<usize> {
            let handle = lease.open(&data)?;
            let pages = handle.page_count();
            for page in 0..pages {
                match render_jpeg(&*handle, page, config) {
                    Ok(jpeg) => {
                        if tx.blocking_send((page, jpeg)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(%document_id, page, error = %e, "Failed to render page preview");
                    }
                }
            }
            Ok(pages)
        });

        let mut paths = Vec::new();
        while let Some((page, jpeg)) = rx.recv().await {
            let path = document.preview_path(page);
            match self.storage.write(&path, &jpeg).await {
                Ok(()) => paths.push(path),
                Err(e) => {
                    warn!(%document_id, page, error = %e, "Failed to store page preview");
                }
            }
        }

        let pages = render.await.map_err(join_error)??;
        debug!(%document_id, pages, stored = paths.len(), "Page previews generated");
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::EnginePoolConfig;
    use docket_db::MemoryBackend;
    use std::time::Duration;

    /// Engine whose documents are `|`-separated page texts. A page containing
    /// `!` fails both text extraction and rendering.
    struct FakeEngine;

    struct FakeDocument {
        pages: Vec<String>,
    }

    impl PdfEngine for FakeEngine {
        fn open<'a>(&'a self, data: &'a [u8]) -> Result<Box<dyn PdfHandle + 'a>> {
            let text = std::str::from_utf8(data)
                .map_err(|_| Error::Render("not a document".into()))?;
            let body = text
                .strip_prefix("%PDF")
                .ok_or_else(|| Error::Render("missing header".into()))?;
            Ok(Box::new(FakeDocument {
                pages: body.split('|').map(str::to_string).collect(),
            }))
        }
    }

    impl PdfHandle for FakeDocument {
        fn page_count(&self) -> usize {
            self.pages.len()
        }

        fn page_text(&self, index: usize) -> Result<String> {
            let page = &self.pages[index];
            if page.contains('!') {
                return Err(Error::Render(format!("page {} is damaged", index)));
            }
            Ok(page.clone())
        }

        fn render_page(&self, index: usize, dpi: u16) -> Result<DynamicImage> {
            self.page_text(index)?;
            let side = u32::from(dpi) / 10;
            Ok(DynamicImage::new_rgb8(side, side))
        }
    }

    async fn analyzer(
        max_total: usize,
        bytes: &[u8],
    ) -> (PdfAnalyzer<FakeEngine>, Arc<MemoryBackend>, Document) {
        let config = EnginePoolConfig::default()
            .with_min_idle(0)
            .with_max_idle(1)
            .with_max_total(max_total)
            .with_acquire_timeout(Duration::from_millis(100));
        let pool = EnginePool::new(config, || Ok(FakeEngine)).await.unwrap();
        let storage = Arc::new(MemoryBackend::new());
        let document = Document::new("scan.pdf", Filetype::Pdf, bytes.len() as i64, "alice");
        storage.write(&document.storage_path(), bytes).await.unwrap();
        let analyzer = PdfAnalyzer::new(pool, storage.clone(), PreviewConfig::default());
        (analyzer, storage, document)
    }

    #[tokio::test]
    async fn test_extract_text_joins_pages_with_blank_lines() {
        let (analyzer, _storage, document) =
            analyzer(1, b"%PDF  first page|second page|| last page \n").await;

        let text = analyzer.extract_text(&document).await.unwrap();
        assert_eq!(text, "first page|second page| last page".replace('|', "\n\n"));
        assert_eq!(analyzer.pool.stats().in_use, 0);
    }

    #[tokio::test]
    async fn test_extract_text_skips_failing_page() {
        let (analyzer, _storage, document) = analyzer(1, b"%PDFone|bro!ken|three").await;
        let text = analyzer.extract_text(&document).await.unwrap();
        assert_eq!(text, "one\n\nthree");
    }

    #[tokio::test]
    async fn test_generate_previews_stores_jpeg_per_page() {
        let (analyzer, storage, document) = analyzer(1, b"%PDFa|b|c").await;

        let paths = analyzer.generate_previews(&document).await.unwrap();
        assert_eq!(
            paths,
            vec![
                document.preview_path(0),
                document.preview_path(1),
                document.preview_path(2)
            ]
        );
        let jpeg = storage.read(&paths[0]).await.unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(analyzer.pool.stats().in_use, 0);
    }

    #[tokio::test]
    async fn test_generate_previews_skips_failing_page() {
        let (analyzer, _storage, document) = analyzer(1, b"%PDFa|!|c").await;
        let paths = analyzer.generate_previews(&document).await.unwrap();
        assert_eq!(paths, vec![document.preview_path(0), document.preview_path(2)]);
    }

    #[tokio::test]
    async fn test_open_failure_releases_lease() {
        let (analyzer, _storage, document) = analyzer(1, b"not a pdf at all").await;
        assert!(matches!(
            analyzer.extract_text(&document).await,
            Err(Error::Render(_))
        ));
        assert_eq!(analyzer.pool.stats().in_use, 0);
        // Capacity is back: the next call acquires without timing out
        assert!(matches!(
            analyzer.generate_previews(&document).await,
            Err(Error::Render(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_blob_is_storage_error() {
        let (analyzer, storage, document) = analyzer(1, b"%PDFa").await;
        storage.delete(&document.storage_path()).await.unwrap();
        assert!(matches!(
            analyzer.extract_text(&document).await,
            Err(Error::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_exhausted_pool_fails_with_timeout() {
        let (analyzer, _storage, document) = analyzer(1, b"%PDFa|b").await;
        let held = analyzer.pool.acquire().await.unwrap();

        let result = analyzer.generate_previews(&document).await;
        assert!(matches!(result, Err(Error::PoolTimeout(_))));

        drop(held);
        assert_eq!(analyzer.generate_previews(&document).await.unwrap().len(), 2);
    }

    #[test]
    fn test_preview_config_defaults() {
        let config = PreviewConfig::default();
        assert_eq!(config.dpi, 80);
        assert_eq!(config.jpeg_quality, 90);
    }
}
