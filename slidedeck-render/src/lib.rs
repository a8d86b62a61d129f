use std::convert::TryFrom;
use std::io::Read;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use slidedeck_core::{
    DocumentBackend, DocumentInfo, DocumentProvider, PageSize, RenderImage, RenderRequest,
};
use tracing::{debug, instrument, warn};
use url::Url;

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Where a deck's document comes from: a local file or an http(s) URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    File(PathBuf),
    Remote(Url),
}

impl DocumentSource {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            bail!("empty document source");
        }
        match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Self::Remote(url)),
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(Self::File)
                .map_err(|_| anyhow!("invalid file URL {raw}")),
            Ok(url) if url.scheme().len() > 1 => {
                bail!("unsupported document scheme {}", url.scheme())
            }
            _ => Ok(Self::File(PathBuf::from(raw))),
        }
    }
}

pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_build_hint() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    #[instrument(skip(self))]
    async fn open(&self, source: &str) -> Result<Arc<dyn DocumentBackend>> {
        let document = match DocumentSource::parse(source)? {
            DocumentSource::File(path) => {
                let absolute = path
                    .canonicalize()
                    .with_context(|| format!("failed to resolve path for {:?}", path))?;
                PdfiumDocument::from_file(Arc::clone(&self.pdfium), source, &absolute)?
            }
            DocumentSource::Remote(url) => {
                let bytes = fetch_remote(url).await?;
                PdfiumDocument::from_bytes(Arc::clone(&self.pdfium), source, bytes)?
            }
        };
        Ok(Arc::new(document))
    }
}

async fn fetch_remote(url: Url) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || {
        let agent = ureq::AgentBuilder::new().timeout(FETCH_TIMEOUT).build();
        let response = match agent.get(url.as_str()).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                bail!("GET {} failed with HTTP status {}", url, code);
            }
            Err(err) => bail!("GET {} failed: {}", url, err),
        };
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read document body from {}", url))?;
        debug!(%url, len = bytes.len(), "document fetched");
        Ok(bytes)
    })
    .await
    .context("document fetch task panicked")?
}

struct PdfiumDocument {
    info: DocumentInfo,
    // Declared before `_pdfium` so it is dropped first.
    document: Mutex<PdfDocument<'static>>,
    _pdfium: Arc<Pdfium>,
}

impl PdfiumDocument {
    fn from_file(pdfium: Arc<Pdfium>, source: &str, path: &Path) -> Result<Self> {
        let document = pdfium
            .load_pdf_from_file(path, None)
            .with_context(|| format!("failed to open {:?}", path))?;
        // SAFETY: the document borrows the bindings owned by `pdfium`. Both live in the
        // returned struct and `document` is declared before `_pdfium`, so it is dropped
        // while the bindings are still alive.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(Self::assemble(pdfium, source, document))
    }

    fn from_bytes(pdfium: Arc<Pdfium>, source: &str, bytes: Vec<u8>) -> Result<Self> {
        let document = pdfium
            .load_pdf_from_byte_vec(bytes, None)
            .with_context(|| format!("failed to parse document from {source}"))?;
        // SAFETY: see `from_file`.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(Self::assemble(pdfium, source, document))
    }

    fn assemble(pdfium: Arc<Pdfium>, source: &str, document: PdfDocument<'static>) -> Self {
        let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
        Self {
            info: DocumentInfo {
                source: source.to_owned(),
                page_count,
            },
            document: Mutex::new(document),
            _pdfium: pdfium,
        }
    }

    fn with_page<R, F>(&self, page: usize, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        let index = page
            .checked_sub(1)
            .ok_or_else(|| anyhow!("pages are numbered from 1"))?;
        let index: PdfPageIndex = index
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", page))?;
        let document = self.document.lock();
        let pdf_page = document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range", page))?;
        f(&pdf_page)
    }
}

#[async_trait]
impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    async fn page_size(&self, page: usize) -> Result<PageSize> {
        self.with_page(page, |pdf_page| {
            Ok(PageSize::new(pdf_page.width().value, pdf_page.height().value))
        })
    }

    #[instrument(skip(self), fields(page = request.page))]
    async fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
        let viewport = request.viewport;
        let target_width = i32::try_from(viewport.width).unwrap_or(i32::MAX);
        let target_height = i32::try_from(viewport.height).unwrap_or(i32::MAX);

        self.with_page(request.page, |pdf_page| {
            let config = PdfRenderConfig::new().set_target_size(target_width, target_height);
            let bitmap = pdf_page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", request.page))?;
            let image = bitmap.as_image().to_rgba8();
            let (width, height) = image.dimensions();
            if (width, height) != (viewport.width, viewport.height) {
                warn!(
                    width,
                    height,
                    expected_width = viewport.width,
                    expected_height = viewport.height,
                    "rasterised size differs from viewport"
                );
            }
            Ok(RenderImage {
                width,
                height,
                pixels: image.into_raw(),
            })
        })
    }
}

fn bind_pdfium_from_build_hint() -> Option<Pdfium> {
    match option_env!("SLIDEDECK_PDFIUM_LIBRARY_PATH") {
        Some(path) if !path.is_empty() => match Pdfium::bind_to_library(path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!(
                    "failed to load Pdfium from build-provided path {}: {}",
                    path, err
                );
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    let local_err = match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => format!("{}: {}", cwd_path.display(), err),
    };

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|err| {
            anyhow!(
                "failed to bind to a pdfium library; ensure it is installed ({}, system: {})",
                local_err,
                err
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_paths_are_files() {
        assert_eq!(
            DocumentSource::parse("decks/pitch.pdf").unwrap(),
            DocumentSource::File(PathBuf::from("decks/pitch.pdf"))
        );
    }

    #[test]
    fn http_sources_are_remote() {
        match DocumentSource::parse("https://cdn.example.com/pitch.pdf").unwrap() {
            DocumentSource::Remote(url) => assert_eq!(url.host_str(), Some("cdn.example.com")),
            other => panic!("unexpected source: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn file_urls_become_paths() {
        assert_eq!(
            DocumentSource::parse("file:///srv/decks/pitch.pdf").unwrap(),
            DocumentSource::File(PathBuf::from("/srv/decks/pitch.pdf"))
        );
    }

    #[test]
    fn unknown_schemes_and_empty_sources_are_rejected() {
        assert!(DocumentSource::parse("ftp://example.com/pitch.pdf").is_err());
        assert!(DocumentSource::parse("   ").is_err());
    }
}
