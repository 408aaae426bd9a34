//! Pixel size to PTY cell geometry

use serde::{Deserialize, Serialize};

/// Metrics of one monospace glyph
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlyphMetrics {
    /// Horizontal advance of a reference glyph
    pub advance_width: f32,
    pub line_height: f32,
}

impl GlyphMetrics {
    pub fn new(advance_width: f32, line_height: f32) -> Self {
        Self {
            advance_width,
            line_height,
        }
    }

    /// Line height from font ascent (negative, above baseline) and descent
    pub fn from_font(advance_width: f32, ascent: f32, descent: f32) -> Self {
        Self::new(advance_width, descent - ascent)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Padding {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Padding {
    pub fn uniform(px: u32) -> Self {
        Self {
            left: px,
            top: px,
            right: px,
            bottom: px,
        }
    }
}

/// Arguments of a PTY resize request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CellGeometry {
    pub cols: u32,
    pub rows: u32,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

/// Cells that fit in `pixel_width` x `pixel_height` after padding.
///
/// `None` when either dimension comes out as zero, so no empty PTY size is
/// ever requested.
pub fn compute_geometry(
    pixel_width: u32,
    pixel_height: u32,
    padding: Padding,
    metrics: GlyphMetrics,
) -> Option<CellGeometry> {
    let available_width = i64::from(pixel_width) - i64::from(padding.left) - i64::from(padding.right);
    let available_height =
        i64::from(pixel_height) - i64::from(padding.top) - i64::from(padding.bottom);

    let cols = cells(available_width, metrics.advance_width);
    let rows = cells(available_height, metrics.line_height);

    if cols == 0 || rows == 0 {
        return None;
    }

    Some(CellGeometry {
        cols,
        rows,
        pixel_width,
        pixel_height,
    })
}

fn cells(available: i64, cell_size: f32) -> u32 {
    if available <= 0 || cell_size.is_nan() || cell_size <= 0.0 {
        return 0;
    }
    (available as f64 / f64::from(cell_size)).floor() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_geometry() {
        let geometry = compute_geometry(
            820,
            500,
            Padding::uniform(10),
            GlyphMetrics::new(10.0, 20.0),
        )
        .unwrap();

        assert_eq!(geometry.cols, 80);
        assert_eq!(geometry.rows, 24);
        assert_eq!(geometry.pixel_width, 820);
        assert_eq!(geometry.pixel_height, 500);
    }

    #[test]
    fn test_partial_cells_round_down() {
        let geometry =
            compute_geometry(99, 39, Padding::default(), GlyphMetrics::new(10.0, 20.0)).unwrap();
        assert_eq!((geometry.cols, geometry.rows), (9, 1));
    }

    #[test]
    fn test_zero_dimension_suppressed() {
        let metrics = GlyphMetrics::new(10.0, 20.0);

        assert!(compute_geometry(0, 500, Padding::default(), metrics).is_none());
        assert!(compute_geometry(500, 19, Padding::default(), metrics).is_none());
        // padding larger than the surface
        assert!(compute_geometry(15, 500, Padding::uniform(10), metrics).is_none());
    }

    #[test]
    fn test_degenerate_metrics_suppressed() {
        assert!(compute_geometry(800, 600, Padding::default(), GlyphMetrics::new(0.0, 20.0)).is_none());
        assert!(
            compute_geometry(800, 600, Padding::default(), GlyphMetrics::new(f32::NAN, 20.0))
                .is_none()
        );
    }

    #[test]
    fn test_line_height_from_font() {
        let metrics = GlyphMetrics::from_font(8.0, -12.0, 4.0);
        assert_eq!(metrics.line_height, 16.0);
    }
}
