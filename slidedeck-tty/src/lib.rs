use std::io::Write;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    style::{Attribute, Print, SetAttribute},
    terminal::{self, Clear, ClearType},
};
use parking_lot::Mutex;
use png::{BitDepth, ColorType, Encoder};
use slidedeck_core::{ControlVisibility, DeckKey, DeckSurface, RenderImage};
use tracing::warn;

const FALLBACK_CELL_WIDTH: f32 = 8.0;
const FALLBACK_CELL_HEIGHT: f32 = 16.0;

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    /// Transmits `image` as PNG and places it at the cursor, replacing the previous placement.
    pub fn draw(&mut self, image: &RenderImage, params: DrawParams) -> Result<()> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&image.pixels)?;
        writer.finish()?;

        let encoded = BASE64.encode(&buffer);
        let mut chunks = encoded.as_bytes().chunks(4096).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = u8::from(chunks.peek().is_some());
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    image.width,
                    image.height,
                    more
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", more)?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Removes every placement of this renderer's image.
    pub fn delete_image(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=I,i={},q=2\u{1b}\\", self.image_id)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Ends a synchronized update; the terminal paints the buffered frame at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Terminal size in cells and, when the terminal reports it, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    pub columns: u16,
    pub rows: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl WindowGeometry {
    pub fn query() -> Result<Self> {
        let window = terminal::window_size()?;
        Ok(Self {
            columns: window.columns,
            rows: window.rows,
            pixel_width: window.width,
            pixel_height: window.height,
        })
    }

    /// Same window with a new cell grid, keeping the measured cell size.
    pub fn resized(&self, columns: u16, rows: u16) -> Self {
        let (cell_width, cell_height) = self.cell_size();
        Self {
            columns,
            rows,
            pixel_width: (cell_width * f32::from(columns)).round().min(f32::from(u16::MAX)) as u16,
            pixel_height: (cell_height * f32::from(rows)).round().min(f32::from(u16::MAX)) as u16,
        }
    }

    fn cell_size(&self) -> (f32, f32) {
        if self.columns == 0 || self.rows == 0 || self.pixel_width == 0 || self.pixel_height == 0 {
            return (FALLBACK_CELL_WIDTH, FALLBACK_CELL_HEIGHT);
        }
        (
            f32::from(self.pixel_width) / f32::from(self.columns),
            f32::from(self.pixel_height) / f32::from(self.rows),
        )
    }

    fn image_rows(&self) -> u32 {
        u32::from(self.rows).saturating_sub(1).max(1)
    }

    /// Pixel size of the area above the status row.
    pub fn container_pixels(&self) -> (u32, u32) {
        let (cell_width, cell_height) = self.cell_size();
        let width = (cell_width * f32::from(self.columns.max(1))).floor() as u32;
        let height = (cell_height * self.image_rows() as f32).floor() as u32;
        (width.max(1), height.max(1))
    }

    /// Cells covered by an image of the given pixel size, clamped to the image area.
    pub fn cells_for(&self, width: u32, height: u32) -> (u32, u32) {
        let (cell_width, cell_height) = self.cell_size();
        let columns = (width as f32 / cell_width).ceil() as u32;
        let rows = (height as f32 / cell_height).ceil() as u32;
        (
            columns.clamp(1, u32::from(self.columns.max(1))),
            rows.clamp(1, self.image_rows()),
        )
    }
}

struct SurfaceState<W: Write> {
    renderer: KittyRenderer<W>,
    geometry: WindowGeometry,
    display: (u32, u32),
    status: String,
    loading: bool,
    controls: ControlVisibility,
}

impl<W: Write> SurfaceState<W> {
    fn status_line(&self) -> String {
        format_status_line(
            &self.status,
            self.controls,
            self.loading,
            usize::from(self.geometry.columns),
        )
    }

    fn paint_status(&mut self) -> Result<()> {
        let row = self.geometry.rows.saturating_sub(1);
        let line = self.status_line();
        let writer = self.renderer.writer();
        crossterm::queue!(
            writer,
            cursor::MoveTo(0, row),
            Clear(ClearType::CurrentLine),
            SetAttribute(Attribute::Reverse),
            Print(line),
            SetAttribute(Attribute::Reset)
        )?;
        writer.flush()?;
        Ok(())
    }

    fn paint_image(&mut self, image: &RenderImage) -> Result<()> {
        let (display_width, display_height) = self.display;
        let (columns, rows) = self.geometry.cells_for(display_width, display_height);
        let start_col = u32::from(self.geometry.columns).saturating_sub(columns) / 2;
        let start_row = self.geometry.image_rows().saturating_sub(rows) / 2;

        self.renderer.begin_sync_update()?;
        crossterm::queue!(
            self.renderer.writer(),
            Clear(ClearType::All),
            cursor::MoveTo(start_col as u16, start_row as u16)
        )?;
        self.renderer.draw(image, DrawParams::clamped(columns, rows))?;
        self.paint_status()?;
        self.renderer.end_sync_update()
    }
}

/// The terminal as a deck container: the window above the last row is the
/// display surface, the last row holds status, control markers and the
/// loading indicator.
pub struct TerminalSurface<W: Write + Send> {
    state: Mutex<SurfaceState<W>>,
}

impl<W: Write + Send> TerminalSurface<W> {
    pub fn new(writer: W, geometry: WindowGeometry) -> Self {
        Self {
            state: Mutex::new(SurfaceState {
                renderer: KittyRenderer::new(writer),
                geometry,
                display: (0, 0),
                status: String::new(),
                loading: false,
                controls: ControlVisibility::hidden(),
            }),
        }
    }

    pub fn set_geometry(&self, geometry: WindowGeometry) {
        self.state.lock().geometry = geometry;
    }

    pub fn geometry(&self) -> WindowGeometry {
        self.state.lock().geometry
    }

    /// Clears the screen and drops the kitty image, for shutdown.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.renderer.delete_image()?;
        crossterm::execute!(
            state.renderer.writer(),
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }

    pub fn into_writer(self) -> W {
        self.state.into_inner().renderer.into_writer()
    }

    fn repaint_status(&self) {
        if let Err(err) = self.state.lock().paint_status() {
            warn!(?err, "failed to paint status line");
        }
    }
}

impl<W: Write + Send> DeckSurface for TerminalSurface<W> {
    fn container_size(&self) -> (u32, u32) {
        self.state.lock().geometry.container_pixels()
    }

    fn resize_display(&self, width: u32, height: u32) {
        self.state.lock().display = (width, height);
    }

    fn draw(&self, image: &RenderImage) -> Result<()> {
        self.state.lock().paint_image(image)
    }

    fn set_status(&self, text: &str) {
        self.state.lock().status = text.to_owned();
        self.repaint_status();
    }

    fn set_loading(&self, visible: bool) {
        self.state.lock().loading = visible;
        self.repaint_status();
    }

    fn set_controls(&self, controls: ControlVisibility) {
        self.state.lock().controls = controls;
        self.repaint_status();
    }
}

/// `< 3 / 5 >`, with a marker blanked when that control is hidden, padded or
/// truncated to `width` characters.
pub fn format_status_line(
    status: &str,
    controls: ControlVisibility,
    loading: bool,
    width: usize,
) -> String {
    let previous = if controls.previous { '<' } else { ' ' };
    let next = if controls.next { '>' } else { ' ' };
    let mut line = format!("{previous} {status} {next}");
    if loading {
        line.push_str("  rendering...");
    }

    let len = line.chars().count();
    if len > width {
        line = line.chars().take(width).collect();
    } else {
        line.push_str(&" ".repeat(width - len));
    }
    line
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiEvent {
    Navigate(DeckKey),
    Resize { columns: u16, rows: u16 },
    Quit,
    None,
}

/// Maps terminal input to deck actions and tracks whether the terminal has focus.
#[derive(Debug)]
pub struct EventMapper {
    focused: bool,
}

impl Default for EventMapper {
    fn default() -> Self {
        // Terminals without focus reporting never send FocusGained.
        Self { focused: true }
    }
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_focus(&self) -> bool {
        self.focused
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::FocusGained => {
                self.focused = true;
                UiEvent::None
            }
            Event::FocusLost => {
                self.focused = false;
                UiEvent::None
            }
            Event::Resize(columns, rows) => UiEvent::Resize { columns, rows },
            Event::Key(KeyEvent {
                kind: KeyEventKind::Release,
                ..
            }) => UiEvent::None,
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Char('c'), KeyModifiers::CONTROL) => UiEvent::Quit,
                (KeyCode::Char('q'), _) | (KeyCode::Esc, _) => UiEvent::Quit,
                (KeyCode::Left, _) | (KeyCode::Char('h'), KeyModifiers::NONE) => {
                    UiEvent::Navigate(DeckKey::Left)
                }
                (KeyCode::Right, _) | (KeyCode::Char('l'), KeyModifiers::NONE) => {
                    UiEvent::Navigate(DeckKey::Right)
                }
                _ => UiEvent::None,
            },
            _ => UiEvent::None,
        }
    }
}
