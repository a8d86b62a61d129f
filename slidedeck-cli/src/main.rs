use std::fs;
use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, DisableFocusChange, EnableFocusChange};
use directories::ProjectDirs;
use slidedeck_core::{Deck, DeckConfig, DeckSurface, NavigateOutcome};
use slidedeck_render::PdfiumProvider;
use slidedeck_tty::{EventMapper, TerminalSurface, UiEvent, WindowGeometry};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "slidedeck",
    version,
    about = "Present a PDF slide deck in a kitty-compatible terminal"
)]
struct Args {
    /// PDF file path or http(s) URL
    #[arg(required_unless_present = "config")]
    source: Option<String>,

    /// Page to open on (1-based)
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,

    /// TOML or JSON deck config (`source`, `page`, `resize_quiet_ms`)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

impl Args {
    fn deck_config(&self) -> Result<DeckConfig> {
        let mut config = match (&self.config, &self.source) {
            (Some(path), source) => {
                let mut config = DeckConfig::load(path)?;
                if let Some(source) = source {
                    config.source = source.clone();
                }
                config
            }
            (None, Some(source)) => DeckConfig::new(source.clone()),
            (None, None) => return Err(anyhow!("no deck source provided")),
        };
        if let Some(page) = self.page {
            config = config.with_page(page);
        }
        Ok(config)
    }
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, cursor::Hide, EnableFocusChange)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableFocusChange, cursor::Show);
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.deck_config()?;

    let project_dirs = ProjectDirs::from("net", "slidedeck", "slidedeck")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs.data_local_dir().join("logs"))?;

    let provider = PdfiumProvider::new().context("failed to initialise pdfium")?;

    let _raw = RawModeGuard::new()?;
    let geometry = WindowGeometry::query().context("failed to query terminal size")?;
    let surface = Arc::new(TerminalSurface::new(io::stdout(), geometry));

    let deck = Deck::open(&provider, config, Arc::clone(&surface) as Arc<dyn DeckSurface>).await;
    info!(
        source = %deck.config().source,
        phase = ?deck.phase(),
        ?geometry,
        "deck opened"
    );
    run(&deck, &surface).await?;

    surface.clear()?;
    Ok(())
}

async fn run(deck: &Deck, surface: &TerminalSurface<Stdout>) -> Result<()> {
    let mut mapper = EventMapper::new();

    loop {
        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        match mapper.map_event(event::read()?) {
            UiEvent::Quit => return Ok(()),
            UiEvent::Navigate(key) => {
                if let NavigateOutcome::Moved { page, .. } =
                    deck.handle_key(key, mapper.has_focus()).await
                {
                    debug!(page, "navigated");
                }
            }
            UiEvent::Resize { columns, rows } => {
                let geometry = WindowGeometry::query().unwrap_or_else(|err| {
                    warn!(?err, "window size query failed; keeping cell size");
                    surface.geometry().resized(columns, rows)
                });
                surface.set_geometry(geometry);
                // The debounced render runs on its own; later resizes supersede it.
                drop(deck.handle_resize());
            }
            UiEvent::None => {}
        }
    }
}

fn init_logging(log_dir: &Path) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "slidedeck.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // stdout and stderr belong to the raw-mode terminal.
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
