use std::error::Error as _;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    CacheKey, ControlVisibility, DeckConfig, DeckError, DeckSurface, DocumentBackend,
    DocumentProvider, RenderCache, RenderImage, RenderRequest, Viewport,
};

pub const LOAD_ERROR_STATUS: &str = "Error loading PDF";

/// Lifecycle of a deck. `Rendering` doubles as the busy flag of the primary render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckPhase {
    Loading,
    Ready,
    Rendering,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavDirection {
    Previous,
    Next,
}

impl NavDirection {
    /// Page reached from `page` in this direction, if it stays inside `1..=total`.
    pub fn step(self, page: usize, total: usize) -> Option<usize> {
        let target = match self {
            Self::Previous => page.checked_sub(1)?,
            Self::Next => page.checked_add(1)?,
        };
        (1..=total).contains(&target).then_some(target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckKey {
    Left,
    Right,
}

impl DeckKey {
    pub fn direction(self) -> NavDirection {
        match self {
            Self::Left => NavDirection::Previous,
            Self::Right => NavDirection::Next,
        }
    }
}

/// The last primary render that failed. The frame drawn before it stays on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderFailure {
    pub page: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Drawn { cache_hit: bool },
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrerenderOutcome {
    OutOfRange,
    AlreadyCached,
    Rendered,
    Failed,
}

#[derive(Debug)]
pub enum NavigateOutcome {
    Ignored,
    Moved {
        page: usize,
        /// Neighbour pre-render. Dropping the handle detaches it.
        prerender: JoinHandle<PrerenderOutcome>,
    },
}

impl NavigateOutcome {
    pub fn page(&self) -> Option<usize> {
        match self {
            Self::Ignored => None,
            Self::Moved { page, .. } => Some(*page),
        }
    }
}

struct DeckState {
    phase: DeckPhase,
    page: usize,
    document: Option<Arc<dyn DocumentBackend>>,
    load_error: Option<Arc<DeckError>>,
    last_failure: Option<RenderFailure>,
    resize_generation: u64,
}

struct DeckShared {
    config: DeckConfig,
    surface: Arc<dyn DeckSurface>,
    cache: RenderCache,
    state: Mutex<DeckState>,
}

struct Rasterised {
    viewport: Viewport,
    image: Arc<RenderImage>,
    cache_hit: bool,
}

/// One slide viewer bound to one document and one container.
///
/// Cloning is cheap and yields another handle to the same deck.
#[derive(Clone)]
pub struct Deck {
    shared: Arc<DeckShared>,
}

impl Deck {
    pub fn new(config: DeckConfig, surface: Arc<dyn DeckSurface>) -> Self {
        Self {
            shared: Arc::new(DeckShared {
                config,
                surface,
                cache: RenderCache::new(),
                state: Mutex::new(DeckState {
                    phase: DeckPhase::Loading,
                    page: 1,
                    document: None,
                    load_error: None,
                    last_failure: None,
                    resize_generation: 0,
                }),
            }),
        }
    }

    /// Creates a deck, loads its document and renders the initial page.
    pub async fn open<P>(provider: &P, config: DeckConfig, surface: Arc<dyn DeckSurface>) -> Self
    where
        P: DocumentProvider + ?Sized,
    {
        let deck = Self::new(config, surface);
        if deck.load(provider).await == DeckPhase::Ready {
            deck.render_current().await;
        }
        deck
    }

    /// Opens the configured document. Only acts while the deck is still loading;
    /// a failure is terminal and is reported through the status line.
    #[instrument(skip(self, provider), fields(source = %self.shared.config.source))]
    pub async fn load<P>(&self, provider: &P) -> DeckPhase
    where
        P: DocumentProvider + ?Sized,
    {
        let phase = self.phase();
        if phase != DeckPhase::Loading {
            return phase;
        }

        let surface = &self.shared.surface;
        let source = self.shared.config.source.clone();
        surface.set_loading(true);
        let opened = provider.open(&source).await;
        surface.set_loading(false);

        let document = match opened {
            Ok(document) if document.info().page_count > 0 => document,
            Ok(_) => return self.fail_load(anyhow::anyhow!("document has no pages")),
            Err(cause) => return self.fail_load(cause),
        };

        let total = document.info().page_count;
        let page = self.shared.config.initial_page(total);
        {
            let mut state = self.shared.state.lock();
            state.document = Some(document);
            state.page = page;
            state.phase = DeckPhase::Ready;
        }
        info!(page, total, "document opened");
        self.publish_position(page, total);
        DeckPhase::Ready
    }

    fn fail_load(&self, cause: anyhow::Error) -> DeckPhase {
        let err = DeckError::Open {
            source_id: self.shared.config.source.clone(),
            cause,
        };
        error!(error = %describe(&err), "failed to load document");
        {
            let mut state = self.shared.state.lock();
            state.phase = DeckPhase::Error;
            state.load_error = Some(Arc::new(err));
        }
        self.shared.surface.set_status(LOAD_ERROR_STATUS);
        self.shared.surface.set_controls(ControlVisibility::hidden());
        DeckPhase::Error
    }

    pub fn config(&self) -> &DeckConfig {
        &self.shared.config
    }

    pub fn phase(&self) -> DeckPhase {
        self.shared.state.lock().phase
    }

    pub fn page(&self) -> usize {
        self.shared.state.lock().page
    }

    pub fn total(&self) -> Option<usize> {
        self.shared
            .state
            .lock()
            .document
            .as_ref()
            .map(|document| document.info().page_count)
    }

    pub fn status(&self) -> String {
        let state = self.shared.state.lock();
        match (&state.document, state.phase) {
            (_, DeckPhase::Error) => LOAD_ERROR_STATUS.to_owned(),
            (Some(document), _) => format_status(state.page, document.info().page_count),
            (None, _) => String::new(),
        }
    }

    pub fn load_error(&self) -> Option<Arc<DeckError>> {
        self.shared.state.lock().load_error.clone()
    }

    pub fn last_render_failure(&self) -> Option<RenderFailure> {
        self.shared.state.lock().last_failure.clone()
    }

    pub fn cached_key(&self) -> Option<CacheKey> {
        self.shared.cache.key()
    }

    /// Draws the current page scaled to fit the container.
    ///
    /// Skipped while another primary render of this deck is in flight. On
    /// failure the previously drawn frame is left untouched.
    #[instrument(skip(self), fields(source = %self.shared.config.source))]
    pub async fn render_current(&self) -> RenderOutcome {
        let (document, page) = {
            let mut state = self.shared.state.lock();
            if state.phase != DeckPhase::Ready {
                debug!(phase = ?state.phase, "render skipped");
                return RenderOutcome::Skipped;
            }
            let Some(document) = state.document.clone() else {
                return RenderOutcome::Skipped;
            };
            state.phase = DeckPhase::Rendering;
            (document, state.page)
        };

        let _busy = RenderingGuard::engage(&self.shared);
        let result = self.draw_page(document.as_ref(), page).await;

        let mut state = self.shared.state.lock();
        match result {
            Ok(cache_hit) => {
                state.last_failure = None;
                RenderOutcome::Drawn { cache_hit }
            }
            Err(err) => {
                let message = describe(&err);
                warn!(page, error = %message, "render failed; keeping previous frame");
                state.last_failure = Some(RenderFailure { page, message });
                RenderOutcome::Failed
            }
        }
    }

    async fn draw_page(
        &self,
        document: &dyn DocumentBackend,
        page: usize,
    ) -> Result<bool, DeckError> {
        let rasterised = self.rasterise(document, page).await?;
        let surface = &self.shared.surface;
        surface.resize_display(rasterised.viewport.width, rasterised.viewport.height);
        surface
            .draw(&rasterised.image)
            .map_err(|cause| DeckError::Surface { page, cause })?;
        debug!(
            page,
            width = rasterised.viewport.width,
            height = rasterised.viewport.height,
            cache_hit = rasterised.cache_hit,
            "page drawn"
        );
        Ok(rasterised.cache_hit)
    }

    /// Measures the container, then returns the cached bitmap for the fitted
    /// viewport or rasterises it off-screen and stores it in the cache.
    async fn rasterise(
        &self,
        document: &dyn DocumentBackend,
        page: usize,
    ) -> Result<Rasterised, DeckError> {
        let (container_width, container_height) = self.shared.surface.container_size();
        let page_size = document
            .page_size(page)
            .await
            .map_err(|cause| DeckError::Render { page, cause })?;
        let viewport = Viewport::fit(page_size, container_width, container_height);
        let key = CacheKey::new(page, &viewport);

        if let Some(image) = self.shared.cache.get(&key) {
            return Ok(Rasterised {
                viewport,
                image,
                cache_hit: true,
            });
        }

        let image = document
            .render_page(RenderRequest { page, viewport })
            .await
            .map_err(|cause| DeckError::Render { page, cause })?;
        let image = Arc::new(image);
        self.shared.cache.insert(key, Arc::clone(&image));

        Ok(Rasterised {
            viewport,
            image,
            cache_hit: false,
        })
    }

    /// Rasterises the page next to the current one into the cache without drawing it.
    ///
    /// Not guarded against a concurrent primary render: whichever insert lands
    /// last owns the cache slot.
    #[instrument(skip(self), fields(source = %self.shared.config.source))]
    pub async fn prerender(&self, direction: NavDirection) -> PrerenderOutcome {
        let (document, target) = {
            let state = self.shared.state.lock();
            let Some(document) = state.document.clone() else {
                return PrerenderOutcome::OutOfRange;
            };
            match direction.step(state.page, document.info().page_count) {
                Some(target) => (document, target),
                None => return PrerenderOutcome::OutOfRange,
            }
        };

        match self.rasterise(document.as_ref(), target).await {
            Ok(rasterised) if rasterised.cache_hit => PrerenderOutcome::AlreadyCached,
            Ok(_) => {
                debug!(page = target, "neighbour pre-rendered");
                PrerenderOutcome::Rendered
            }
            Err(err) => {
                debug!(page = target, error = %describe(&err), "pre-render failed");
                PrerenderOutcome::Failed
            }
        }
    }

    /// Moves one page, redraws, then pre-renders the next page in the same
    /// direction in the background.
    pub async fn navigate(&self, direction: NavDirection) -> NavigateOutcome {
        let (page, total) = {
            let mut state = self.shared.state.lock();
            if state.phase == DeckPhase::Error {
                return NavigateOutcome::Ignored;
            }
            let Some(total) = state.document.as_ref().map(|d| d.info().page_count) else {
                return NavigateOutcome::Ignored;
            };
            let Some(page) = direction.step(state.page, total) else {
                return NavigateOutcome::Ignored;
            };
            state.page = page;
            (page, total)
        };

        self.publish_position(page, total);
        self.render_current().await;

        let deck = self.clone();
        let prerender = tokio::spawn(async move { deck.prerender(direction).await });
        NavigateOutcome::Moved { page, prerender }
    }

    /// Arrow keys navigate while the deck container has focus.
    pub async fn handle_key(&self, key: DeckKey, focused: bool) -> NavigateOutcome {
        if !focused {
            return NavigateOutcome::Ignored;
        }
        self.navigate(key.direction()).await
    }

    /// Schedules a redraw once resizes have been quiet for the configured interval.
    ///
    /// Each call supersedes the previous one; a redraw that already started is
    /// left to finish.
    pub fn handle_resize(&self) -> JoinHandle<Option<RenderOutcome>> {
        let generation = {
            let mut state = self.shared.state.lock();
            state.resize_generation = state.resize_generation.wrapping_add(1);
            state.resize_generation
        };
        let quiet = self.shared.config.resize_quiet;
        let deck = self.clone();

        tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            let latest = deck.shared.state.lock().resize_generation;
            if latest != generation {
                return None;
            }
            Some(deck.render_current().await)
        })
    }

    fn publish_position(&self, page: usize, total: usize) {
        let surface = &self.shared.surface;
        surface.set_status(&format_status(page, total));
        surface.set_controls(ControlVisibility::for_page(page, total));
    }
}

/// Clears the busy flag and loading indicator however the render ends,
/// including when its future is dropped.
struct RenderingGuard<'a> {
    shared: &'a DeckShared,
}

impl<'a> RenderingGuard<'a> {
    fn engage(shared: &'a DeckShared) -> Self {
        shared.surface.set_loading(true);
        Self { shared }
    }
}

impl Drop for RenderingGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            if state.phase == DeckPhase::Rendering {
                state.phase = DeckPhase::Ready;
            }
        }
        self.shared.surface.set_loading(false);
    }
}

fn format_status(page: usize, total: usize) -> String {
    format!("{page} / {total}")
}

fn describe(err: &DeckError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use tokio::sync::Semaphore;

    use crate::{DocumentInfo, PageSize};

    struct FakeBackend {
        info: DocumentInfo,
        page_size: PageSize,
        rasters: AtomicUsize,
        failing: Mutex<HashSet<usize>>,
        gate: Mutex<Option<Arc<Semaphore>>>,
        held_page: Mutex<Option<(usize, Arc<Semaphore>)>>,
    }

    impl FakeBackend {
        fn new(page_count: usize) -> Arc<Self> {
            Arc::new(Self {
                info: DocumentInfo {
                    source: "deck.pdf".into(),
                    page_count,
                },
                page_size: PageSize::new(400.0, 300.0),
                rasters: AtomicUsize::new(0),
                failing: Mutex::new(HashSet::new()),
                gate: Mutex::new(None),
                held_page: Mutex::new(None),
            })
        }

        fn rasters(&self) -> usize {
            self.rasters.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl DocumentBackend for FakeBackend {
        fn info(&self) -> &DocumentInfo {
            &self.info
        }

        async fn page_size(&self, _page: usize) -> Result<PageSize> {
            Ok(self.page_size)
        }

        async fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
            let gate = self.gate.lock().clone();
            if let Some(gate) = gate {
                gate.acquire().await?.forget();
            }
            let held = self.held_page.lock().clone();
            if let Some((page, gate)) = held {
                if page == request.page {
                    gate.acquire().await?.forget();
                }
            }
            if self.failing.lock().contains(&request.page) {
                return Err(anyhow!("corrupt page stream"));
            }
            self.rasters.fetch_add(1, Ordering::SeqCst);
            let mut image = RenderImage::blank(request.viewport.width, request.viewport.height);
            image.pixels[0] = request.page as u8;
            Ok(image)
        }
    }

    enum FakeProvider {
        Opens(Arc<FakeBackend>),
        Fails,
    }

    #[async_trait::async_trait]
    impl DocumentProvider for FakeProvider {
        async fn open(&self, _source: &str) -> Result<Arc<dyn DocumentBackend>> {
            match self {
                FakeProvider::Opens(backend) => Ok(Arc::clone(backend) as Arc<dyn DocumentBackend>),
                FakeProvider::Fails => Err(anyhow!("connection reset")),
            }
        }
    }

    struct RecordingSurface {
        container: Mutex<(u32, u32)>,
        status: Mutex<String>,
        loading: Mutex<bool>,
        controls: Mutex<ControlVisibility>,
        display: Mutex<(u32, u32)>,
        drawn_pages: Mutex<Vec<u8>>,
    }

    impl RecordingSurface {
        fn new(width: u32, height: u32) -> Arc<Self> {
            Arc::new(Self {
                container: Mutex::new((width, height)),
                status: Mutex::new(String::new()),
                loading: Mutex::new(false),
                controls: Mutex::new(ControlVisibility::default()),
                display: Mutex::new((0, 0)),
                drawn_pages: Mutex::new(Vec::new()),
            })
        }

        fn status(&self) -> String {
            self.status.lock().clone()
        }

        fn draws(&self) -> usize {
            self.drawn_pages.lock().len()
        }

        fn last_drawn(&self) -> Option<u8> {
            self.drawn_pages.lock().last().copied()
        }
    }

    impl DeckSurface for RecordingSurface {
        fn container_size(&self) -> (u32, u32) {
            *self.container.lock()
        }

        fn resize_display(&self, width: u32, height: u32) {
            *self.display.lock() = (width, height);
        }

        fn draw(&self, image: &RenderImage) -> Result<()> {
            self.drawn_pages.lock().push(image.pixels[0]);
            Ok(())
        }

        fn set_status(&self, text: &str) {
            *self.status.lock() = text.to_owned();
        }

        fn set_loading(&self, visible: bool) {
            *self.loading.lock() = visible;
        }

        fn set_controls(&self, controls: ControlVisibility) {
            *self.controls.lock() = controls;
        }
    }

    async fn open_deck(
        total: usize,
        page: usize,
    ) -> (Deck, Arc<FakeBackend>, Arc<RecordingSurface>) {
        let backend = FakeBackend::new(total);
        let surface = RecordingSurface::new(800, 600);
        let provider = FakeProvider::Opens(Arc::clone(&backend));
        let config = DeckConfig::new("deck.pdf").with_page(page);
        let deck = Deck::open(&provider, config, surface.clone()).await;
        (deck, backend, surface)
    }

    #[tokio::test]
    async fn opens_on_clamped_initial_page() {
        for (requested, expected) in [(1, 1), (3, 3), (5, 5), (9, 5)] {
            let (deck, _, surface) = open_deck(5, requested).await;
            assert_eq!(deck.phase(), DeckPhase::Ready);
            assert_eq!(deck.page(), expected);
            assert_eq!(surface.status(), format!("{expected} / 5"));
            assert_eq!(surface.last_drawn(), Some(expected as u8));
        }
    }

    #[tokio::test]
    async fn navigation_scenario_clamps_at_last_page() {
        let (deck, _, surface) = open_deck(5, 3).await;
        assert_eq!(surface.status(), "3 / 5");
        assert_eq!(
            *surface.controls.lock(),
            ControlVisibility {
                previous: true,
                next: true
            }
        );

        assert_eq!(deck.navigate(NavDirection::Next).await.page(), Some(4));
        assert_eq!(surface.status(), "4 / 5");

        assert_eq!(deck.navigate(NavDirection::Next).await.page(), Some(5));
        assert!(matches!(
            deck.navigate(NavDirection::Next).await,
            NavigateOutcome::Ignored
        ));
        assert_eq!(deck.page(), 5);
        assert_eq!(surface.status(), "5 / 5");
        assert!(!surface.controls.lock().next);
        assert!(surface.controls.lock().previous);
    }

    #[tokio::test]
    async fn previous_on_first_page_is_a_noop() {
        let (deck, backend, surface) = open_deck(5, 1).await;
        let rasters = backend.rasters();
        let draws = surface.draws();

        assert!(matches!(
            deck.navigate(NavDirection::Previous).await,
            NavigateOutcome::Ignored
        ));
        assert_eq!(deck.page(), 1);
        assert_eq!(backend.rasters(), rasters);
        assert_eq!(surface.draws(), draws);
        assert!(!surface.controls.lock().previous);
    }

    #[tokio::test]
    async fn next_on_last_page_is_a_noop() {
        let (deck, backend, surface) = open_deck(2, 2).await;
        let rasters = backend.rasters();

        assert!(matches!(
            deck.navigate(NavDirection::Next).await,
            NavigateOutcome::Ignored
        ));
        assert_eq!(backend.rasters(), rasters);
        assert_eq!(surface.status(), "2 / 2");
    }

    #[tokio::test]
    async fn load_failure_is_terminal() {
        let surface = RecordingSurface::new(800, 600);
        let deck = Deck::open(
            &FakeProvider::Fails,
            DeckConfig::new("https://example.invalid/deck.pdf"),
            surface.clone(),
        )
        .await;

        assert_eq!(deck.phase(), DeckPhase::Error);
        assert_eq!(surface.status(), LOAD_ERROR_STATUS);
        assert_eq!(deck.status(), LOAD_ERROR_STATUS);
        assert_eq!(surface.draws(), 0);
        assert!(!*surface.loading.lock());
        assert_eq!(*surface.controls.lock(), ControlVisibility::hidden());
        assert!(matches!(
            deck.load_error().as_deref(),
            Some(DeckError::Open { .. })
        ));

        assert!(matches!(
            deck.navigate(NavDirection::Next).await,
            NavigateOutcome::Ignored
        ));
        assert_eq!(deck.render_current().await, RenderOutcome::Skipped);
        assert_eq!(deck.load(&FakeProvider::Fails).await, DeckPhase::Error);
    }

    #[tokio::test]
    async fn empty_document_counts_as_load_failure() {
        let surface = RecordingSurface::new(800, 600);
        let provider = FakeProvider::Opens(FakeBackend::new(0));
        let deck = Deck::open(&provider, DeckConfig::new("empty.pdf"), surface.clone()).await;
        assert_eq!(deck.phase(), DeckPhase::Error);
        assert_eq!(surface.status(), LOAD_ERROR_STATUS);
    }

    #[tokio::test]
    async fn rendering_same_key_twice_hits_the_cache() {
        let (deck, backend, surface) = open_deck(5, 2).await;
        assert_eq!(backend.rasters(), 1);

        assert_eq!(
            deck.render_current().await,
            RenderOutcome::Drawn { cache_hit: true }
        );
        assert_eq!(backend.rasters(), 1);
        assert_eq!(surface.draws(), 2);
    }

    #[tokio::test]
    async fn prerendered_neighbour_serves_the_next_navigation() {
        let (deck, backend, surface) = open_deck(5, 1).await;

        let NavigateOutcome::Moved { page, prerender } = deck.navigate(NavDirection::Next).await
        else {
            panic!("expected navigation to move");
        };
        assert_eq!(page, 2);
        assert_eq!(prerender.await.unwrap(), PrerenderOutcome::Rendered);
        assert_eq!(backend.rasters(), 3);
        assert_eq!(deck.cached_key().map(|key| key.page), Some(3));
        assert_eq!(surface.last_drawn(), Some(2));

        let NavigateOutcome::Moved { prerender, .. } = deck.navigate(NavDirection::Next).await
        else {
            panic!("expected navigation to move");
        };
        assert_eq!(backend.rasters(), 3);
        assert_eq!(surface.last_drawn(), Some(3));
        assert_eq!(prerender.await.unwrap(), PrerenderOutcome::Rendered);
        assert_eq!(deck.cached_key().map(|key| key.page), Some(4));
    }

    #[tokio::test]
    async fn prerender_past_the_end_is_a_noop() {
        let (deck, backend, _) = open_deck(3, 3).await;
        assert_eq!(
            deck.prerender(NavDirection::Next).await,
            PrerenderOutcome::OutOfRange
        );
        assert_eq!(
            deck.prerender(NavDirection::Previous).await,
            PrerenderOutcome::Rendered
        );
        assert_eq!(backend.rasters(), 2);
    }

    #[tokio::test]
    async fn late_prerender_evicts_without_touching_the_visible_frame() {
        let (deck, backend, surface) = open_deck(5, 1).await;
        let gate = Arc::new(Semaphore::new(0));
        *backend.held_page.lock() = Some((3, Arc::clone(&gate)));

        let NavigateOutcome::Moved { page, prerender } = deck.navigate(NavDirection::Next).await
        else {
            panic!("expected navigation to move");
        };
        assert_eq!(page, 2);
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(!prerender.is_finished());

        *surface.container.lock() = (400, 300);
        assert_eq!(
            deck.render_current().await,
            RenderOutcome::Drawn { cache_hit: false }
        );
        assert_eq!(
            deck.cached_key(),
            Some(CacheKey {
                page: 2,
                width: 400,
                height: 300
            })
        );
        let draws = surface.draws();

        gate.add_permits(1);
        assert_eq!(prerender.await.unwrap(), PrerenderOutcome::Rendered);
        assert_eq!(deck.cached_key().map(|key| key.page), Some(3));
        assert_eq!(surface.last_drawn(), Some(2));
        assert_eq!(surface.draws(), draws);
        assert_eq!(deck.phase(), DeckPhase::Ready);

        assert_eq!(
            deck.render_current().await,
            RenderOutcome::Drawn { cache_hit: false }
        );
        assert_eq!(surface.last_drawn(), Some(2));
    }

    #[tokio::test]
    async fn failed_prerender_leaves_deck_state_alone() {
        let (deck, backend, surface) = open_deck(5, 2).await;
        backend.failing.lock().insert(3);
        let draws = surface.draws();

        assert_eq!(
            deck.prerender(NavDirection::Next).await,
            PrerenderOutcome::Failed
        );
        assert_eq!(deck.phase(), DeckPhase::Ready);
        assert_eq!(deck.page(), 2);
        assert_eq!(deck.last_render_failure(), None);
        assert_eq!(deck.cached_key().map(|key| key.page), Some(2));
        assert_eq!(surface.draws(), draws);
        assert!(!*surface.loading.lock());
    }

    #[tokio::test]
    async fn render_failure_keeps_previous_frame() {
        let (deck, backend, surface) = open_deck(5, 1).await;
        backend.failing.lock().insert(2);

        let outcome = deck.navigate(NavDirection::Next).await;
        assert_eq!(outcome.page(), Some(2));
        assert_eq!(surface.status(), "2 / 5");
        assert_eq!(surface.last_drawn(), Some(1));
        assert_eq!(deck.phase(), DeckPhase::Ready);
        assert!(!*surface.loading.lock());

        let failure = deck.last_render_failure().expect("failure recorded");
        assert_eq!(failure.page, 2);
        assert!(failure.message.contains("corrupt page stream"));

        backend.failing.lock().clear();
        assert_eq!(
            deck.render_current().await,
            RenderOutcome::Drawn { cache_hit: false }
        );
        assert_eq!(deck.last_render_failure(), None);
        assert_eq!(surface.last_drawn(), Some(2));
    }

    #[tokio::test]
    async fn overlapping_primary_render_is_skipped() {
        let (deck, backend, surface) = open_deck(5, 1).await;
        let gate = Arc::new(Semaphore::new(0));
        *backend.gate.lock() = Some(Arc::clone(&gate));
        *surface.container.lock() = (400, 300);

        let background = deck.clone();
        let task = tokio::spawn(async move { background.render_current().await });
        for _ in 0..16 {
            if deck.phase() == DeckPhase::Rendering {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(deck.phase(), DeckPhase::Rendering);
        assert!(*surface.loading.lock());

        assert_eq!(deck.render_current().await, RenderOutcome::Skipped);

        gate.add_permits(1);
        assert_eq!(
            task.await.unwrap(),
            RenderOutcome::Drawn { cache_hit: false }
        );
        assert_eq!(deck.phase(), DeckPhase::Ready);
        assert!(!*surface.loading.lock());
    }

    #[tokio::test]
    async fn keys_only_navigate_with_focus() {
        let (deck, _, _) = open_deck(5, 2).await;
        assert!(matches!(
            deck.handle_key(DeckKey::Right, false).await,
            NavigateOutcome::Ignored
        ));
        assert_eq!(deck.page(), 2);

        assert_eq!(deck.handle_key(DeckKey::Right, true).await.page(), Some(3));
        assert_eq!(deck.handle_key(DeckKey::Left, true).await.page(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn resize_burst_renders_once() {
        let (deck, _, surface) = open_deck(5, 2).await;
        let draws = surface.draws();

        let mut timers = Vec::new();
        for _ in 0..5 {
            timers.push(deck.handle_resize());
            tokio::time::advance(Duration::from_millis(20)).await;
        }

        let mut fired = 0;
        for timer in timers {
            if let Some(outcome) = timer.await.unwrap() {
                assert_eq!(outcome, RenderOutcome::Drawn { cache_hit: true });
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        assert_eq!(surface.draws(), draws + 1);
        assert_eq!(deck.page(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn resize_rekeys_the_cache_for_new_dimensions() {
        let (deck, backend, surface) = open_deck(5, 2).await;
        let before = deck.cached_key().unwrap();
        assert_eq!((before.page, before.width, before.height), (2, 800, 600));

        *surface.container.lock() = (400, 300);
        let outcome = deck.handle_resize().await.unwrap();
        assert_eq!(outcome, Some(RenderOutcome::Drawn { cache_hit: false }));

        let after = deck.cached_key().unwrap();
        assert_eq!((after.page, after.width, after.height), (2, 400, 300));
        assert_ne!(before, after);
        assert_eq!(backend.rasters(), 2);
        assert_eq!(*surface.display.lock(), (400, 300));
    }

    #[test]
    fn direction_steps_stay_in_range() {
        assert_eq!(NavDirection::Previous.step(1, 5), None);
        assert_eq!(NavDirection::Next.step(5, 5), None);
        assert_eq!(NavDirection::Next.step(4, 5), Some(5));
    }
}
