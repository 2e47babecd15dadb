//! Analyzer registry for dispatching document operations by filetype.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use docket_core::{Document, Error, Filetype, Result};

/// Filetype-specific implementation of the document content operations.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    /// The filetype this analyzer handles.
    fn filetype(&self) -> Filetype;

    /// Extract the full text of `document`.
    async fn extract_text(&self, document: &Document) -> Result<String>;

    /// Render previews for `document` and return their storage paths,
    /// ordered by page index.
    async fn generate_previews(&self, document: &Document) -> Result<Vec<String>>;
}

/// Registry mapping filetypes to their analyzer implementations.
pub struct AnalyzerRegistry {
    analyzers: HashMap<Filetype, Arc<dyn DocumentAnalyzer>>,
}

impl AnalyzerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            analyzers: HashMap::new(),
        }
    }

    /// Register an analyzer. Replaces any existing analyzer for the same filetype.
    pub fn register(&mut self, analyzer: Arc<dyn DocumentAnalyzer>) {
        self.analyzers.insert(analyzer.filetype(), analyzer);
    }

    /// Analyzer for `filetype`, or `UnsupportedFiletype`.
    pub fn get(&self, filetype: Filetype) -> Result<Arc<dyn DocumentAnalyzer>> {
        self.analyzers
            .get(&filetype)
            .cloned()
            .ok_or_else(|| Error::UnsupportedFiletype(filetype.to_string()))
    }

    pub fn supports(&self, filetype: Filetype) -> bool {
        self.analyzers.contains_key(&filetype)
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
