//! Terminal Surface
//!
//! A size-bounded, color-aware view of raw shell output plus the geometry
//! hook that turns surface resizes into PTY resize requests.
//!
//! Only foreground/background colors are interpreted; there is no cursor
//! addressing or alternate screen.

mod ansi;
mod buffer;
mod geometry;
pub mod input;

pub use ansi::{render, strip_control_sequences, styled_runs, Color, Style, StyledRun};
pub use buffer::{TerminalBuffer, TerminalLimits};
pub use geometry::{compute_geometry, CellGeometry, GlyphMetrics, Padding};
pub use input::{delete_before, normalize_committed, KeyInput};

use tracing::debug;

use crate::session::StreamUnit;

/// Invoked with every non-empty geometry the surface resizes to
pub type GeometryCallback = Box<dyn Fn(CellGeometry) + Send + Sync>;

/// Buffer plus layout state for one on-screen terminal
pub struct TerminalSurface {
    buffer: TerminalBuffer,
    metrics: GlyphMetrics,
    padding: Padding,
    on_resize: Option<GeometryCallback>,
    geometry: Option<CellGeometry>,
}

impl TerminalSurface {
    pub fn new(limits: TerminalLimits, metrics: GlyphMetrics, padding: Padding) -> Self {
        Self {
            buffer: TerminalBuffer::new(limits),
            metrics,
            padding,
            on_resize: None,
            geometry: None,
        }
    }

    pub fn set_resize_callback<F>(&mut self, callback: F)
    where
        F: Fn(CellGeometry) + Send + Sync + 'static,
    {
        self.on_resize = Some(Box::new(callback));
    }

    /// The surface changed pixel size; notifies the callback when the cell
    /// geometry is non-empty
    pub fn size_changed(&mut self, pixel_width: u32, pixel_height: u32) -> Option<CellGeometry> {
        let geometry = compute_geometry(pixel_width, pixel_height, self.padding, self.metrics);
        match geometry {
            Some(g) => {
                debug!("Terminal surface is {}x{} cells", g.cols, g.rows);
                self.geometry = Some(g);
                if let Some(callback) = &self.on_resize {
                    callback(g);
                }
            }
            None => debug!(
                "Ignoring empty terminal geometry for {}x{} px",
                pixel_width, pixel_height
            ),
        }
        geometry
    }

    /// Last non-empty geometry
    pub fn geometry(&self) -> Option<CellGeometry> {
        self.geometry
    }

    pub fn append(&mut self, text: &str) -> &[StyledRun] {
        self.buffer.append(text)
    }

    /// Append one unit from the stream framer
    pub fn append_unit(&mut self, unit: &StreamUnit) -> &[StyledRun] {
        match unit {
            StreamUnit::Line(line) => self.buffer.append(&format!("{}\n", line)),
            StreamUnit::Partial(text) | StreamUnit::Chunk(text) => self.buffer.append(text),
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn buffer(&self) -> &TerminalBuffer {
        &self.buffer
    }
}
