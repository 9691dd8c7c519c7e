//! Pluggable collaborators of the indexing pipeline.
//!
//! The engine only depends on the [`Extractor`] and [`Chunker`] traits.
//! [`FileExtractor`] and [`FixedSizeChunker`] are the reference
//! implementations used by the CLI: local plain-text files cut into
//! overlapping character windows.

use crate::error::{Result, RetrieverError};
use crate::hashing::{fingerprint_bytes, fingerprint_file};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Obtains raw bytes for a source and turns them into plain text.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Raw content of `source_uri`; these bytes are what gets fingerprinted.
    async fn fetch(&self, source_uri: &str) -> Result<Vec<u8>>;

    /// Content fingerprint of `source_uri`, equal to
    /// [`fingerprint_bytes`] over what [`Extractor::fetch`] returns.
    /// Implementations should stream rather than buffer the whole source.
    async fn fingerprint(&self, source_uri: &str) -> Result<String> {
        Ok(fingerprint_bytes(&self.fetch(source_uri).await?))
    }

    /// Plain text extracted from previously fetched bytes.
    async fn extract_text(&self, source_uri: &str, bytes: &[u8]) -> Result<String>;
}

/// Splits text into ordered, overlapping chunks.
pub trait Chunker: Send + Sync {
    fn chunk(&self, text: &str) -> Vec<String>;
}

/// Extensions read as UTF-8 text.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "text", "md", "markdown", "rst", "org", "adoc", "log", "csv", "tsv", "json", "jsonl",
    "toml", "yaml", "yml", "ini", "cfg", "conf", "xml", "rs", "py", "js", "ts", "jsx", "tsx",
    "go", "java", "c", "cpp", "h", "hpp", "sh", "sql",
];

/// Extension-less file names accepted as text.
const TEXT_FILE_NAMES: &[&str] = &["README", "CHANGELOG", "LICENSE", "Makefile", "Dockerfile"];

/// Reads plain-text documents from the local filesystem.
///
/// Source URIs are paths, optionally prefixed with `file://`.
#[derive(Debug, Clone, Default)]
pub struct FileExtractor;

impl FileExtractor {
    pub fn new() -> Self {
        Self
    }

    fn local_path(source_uri: &str) -> PathBuf {
        let trimmed = source_uri.trim();
        PathBuf::from(trimmed.strip_prefix("file://").unwrap_or(trimmed))
    }

    /// Lowercased extension, if any.
    pub fn extension(source_uri: &str) -> Option<String> {
        Self::local_path(source_uri)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
    }

    /// Whether `path` looks like something this extractor can read.
    pub fn should_index(path: &Path) -> bool {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.starts_with('.') {
                return false;
            }
        }
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => TEXT_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
            None => path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| TEXT_FILE_NAMES.contains(&name)),
        }
    }
}

/// Absolute, symlink-free form of `path` as a source URI.
fn canonical_source(path: &Path) -> Result<String> {
    let canonical = std::fs::canonicalize(path).map_err(|e| {
        RetrieverError::processing(format!("Cannot resolve {}: {e}", path.display()))
    })?;
    Ok(canonical.to_string_lossy().to_string())
}

/// Expand files and directories into indexable source URIs.
///
/// Directories are walked honoring `.gitignore`; files given explicitly are
/// kept even when [`FileExtractor::should_index`] would skip them, so the
/// caller sees their extraction error. Every URI is canonical, so one file
/// always maps to one document id however it was named. Output is sorted
/// and deduplicated.
pub fn discover_sources(paths: &[PathBuf]) -> Result<Vec<String>> {
    let mut sources = Vec::new();
    for path in paths {
        if path.is_file() {
            sources.push(canonical_source(path)?);
            continue;
        }
        if !path.exists() {
            return Err(RetrieverError::validation(format!(
                "{} does not exist",
                path.display()
            )));
        }
        for entry in ignore::Walk::new(path) {
            let entry = entry.map_err(|e| RetrieverError::processing(e.to_string()))?;
            let entry_path = entry.path();
            if entry_path.is_file() && FileExtractor::should_index(entry_path) {
                sources.push(canonical_source(entry_path)?);
            }
        }
    }
    sources.sort();
    sources.dedup();
    Ok(sources)
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[async_trait]
impl Extractor for FileExtractor {
    async fn fetch(&self, source_uri: &str) -> Result<Vec<u8>> {
        let path = Self::local_path(source_uri);
        tokio::fs::read(&path).await.map_err(|e| {
            RetrieverError::processing(format!("Cannot read {}: {e}", path.display()))
        })
    }

    async fn fingerprint(&self, source_uri: &str) -> Result<String> {
        let path = Self::local_path(source_uri);
        fingerprint_file(&path).await.map_err(|e| {
            RetrieverError::processing(format!("Cannot read {}: {e}", path.display()))
        })
    }

    async fn extract_text(&self, source_uri: &str, bytes: &[u8]) -> Result<String> {
        let path = Self::local_path(source_uri);
        match Self::extension(source_uri).as_deref() {
            Some("pdf") => {
                if contains_subslice(bytes, b"/Encrypt") {
                    return Err(RetrieverError::EncryptedSource {
                        source_uri: source_uri.to_string(),
                    });
                }
                Err(RetrieverError::UnsupportedFormat {
                    source_uri: source_uri.to_string(),
                    format: "pdf".to_string(),
                })
            }
            Some(ext) if !TEXT_EXTENSIONS.contains(&ext) => {
                Err(RetrieverError::UnsupportedFormat {
                    source_uri: source_uri.to_string(),
                    format: ext.to_string(),
                })
            }
            _ => {
                let text = std::str::from_utf8(bytes).map_err(|e| {
                    RetrieverError::processing(format!(
                        "{} is not valid UTF-8: {e}",
                        path.display()
                    ))
                })?;
                debug!("Extracted {} characters from {}", text.len(), path.display());
                Ok(text.to_string())
            }
        }
    }
}

/// Fixed-size character windows with overlap.
///
/// A window that would end mid-word is pulled back to the last whitespace in
/// its second half, and the overlap is moved forward to the next word start.
/// Windows containing only whitespace are dropped.
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// `chunk_overlap` is capped below `chunk_size`; a zero size becomes 1.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let mut end = (start + self.chunk_size).min(chars.len());
            if end < chars.len() {
                let floor = start + self.chunk_size / 2;
                if let Some(split) = (floor.max(start + 1)..end)
                    .rev()
                    .find(|&i| chars[i].is_whitespace())
                {
                    end = split + 1;
                }
            }

            let window: String = chars[start..end].iter().collect();
            let window = window.trim();
            if !window.is_empty() {
                chunks.push(window.to_string());
            }

            if end == chars.len() {
                break;
            }
            let mut next = end.saturating_sub(self.chunk_overlap).max(start + 1);
            // start the overlap on a word boundary when there is one
            if !chars[next - 1].is_whitespace() {
                if let Some(space) = (next..end).find(|&i| chars[i].is_whitespace()) {
                    next = space + 1;
                }
            }
            start = next;
        }

        chunks
    }
}
