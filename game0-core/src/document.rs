use std::sync::Arc;

use crate::extract::{Extraction, ExtractionKind};

const DOCUMENT_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1, maximum-scale=1, user-scalable=no">
<style>
html, body { margin: 0; padding: 0; width: 100%; height: 100%; overflow: hidden; }
#game-container { position: relative; width: 100%; height: 100%; }
canvas, img, video { max-width: 100%; max-height: 100%; }
</style>
</head>
<body>
<div id="game-container">"#;

const DOCUMENT_TAIL: &str = "</div>\n</body>\n</html>\n";

/// Embed extracted markup in a minimal standalone document.
///
/// Output depends only on `inner`; the markup is inserted verbatim.
pub fn wrap(inner: &str) -> String {
    let mut doc = String::with_capacity(DOCUMENT_HEAD.len() + inner.len() + DOCUMENT_TAIL.len());
    doc.push_str(DOCUMENT_HEAD);
    doc.push_str(inner);
    doc.push_str(DOCUMENT_TAIL);
    doc
}

/// Final game document produced by one successful generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedGame {
    html: Arc<str>,
    kind: ExtractionKind,
}

impl ExtractedGame {
    /// Fenced markup is wrapped; a raw document is used as-is.
    pub fn from_extraction(extraction: Extraction) -> Self {
        let html = match extraction.kind {
            ExtractionKind::Fenced => wrap(&extraction.content),
            ExtractionKind::Document => extraction.content,
        };
        Self {
            html: Arc::from(html),
            kind: extraction.kind,
        }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn shared_html(&self) -> Arc<str> {
        self.html.clone()
    }

    pub fn kind(&self) -> ExtractionKind {
        self.kind
    }
}
