use crate::error::SyncError;
use anyhow::{anyhow, Result};
use opencv::core::Rect;

/// Geometry of a grid of `rows x cols` cells separated (and framed) by
/// one-pixel lines. Cells are filled row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub rows: usize,
    pub cols: usize,
    /// Full canvas size, borders included.
    pub width: i32,
    pub height: i32,
    pub cell_width: i32,
    pub cell_height: i32,
}

impl GridLayout {
    /// Smallest square-ish grid holding `sources` cells: `(rows, cols)`.
    pub fn dimensions(sources: usize) -> (usize, usize) {
        let mut cols = 1;
        while cols * cols < sources {
            cols += 1;
        }
        let rows = sources.div_ceil(cols).max(1);
        (rows, cols)
    }

    /// Lays out `sources` cells over a `width x height` canvas.
    pub fn new(sources: usize, width: i32, height: i32) -> Result<Self> {
        if sources == 0 {
            return Err(SyncError::NoSources.into());
        }
        let (rows, cols) = Self::dimensions(sources);

        let cell_width = (width - cols as i32 - 1) / cols as i32;
        let cell_height = (height - rows as i32 - 1) / rows as i32;
        if cell_width <= 0 || cell_height <= 0 {
            return Err(anyhow!(
                "Canvas {}x{} is too small for a {}x{} grid",
                width,
                height,
                rows,
                cols
            ));
        }

        Ok(Self {
            rows,
            cols,
            width,
            height,
            cell_width,
            cell_height,
        })
    }

    pub fn cells(&self) -> usize {
        self.rows * self.cols
    }

    /// Top-left pixel of cell `k`, as `(x, y)`.
    pub fn cell_origin(&self, k: usize) -> (i32, i32) {
        let i = (k / self.cols) as i32;
        let j = (k % self.cols) as i32;
        (
            1 + j * (1 + self.cell_width),
            1 + i * (1 + self.cell_height),
        )
    }

    pub fn cell_rect(&self, k: usize) -> Rect {
        let (x, y) = self.cell_origin(k);
        Rect::new(x, y, self.cell_width, self.cell_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_for_common_counts() {
        assert_eq!(GridLayout::dimensions(1), (1, 1));
        assert_eq!(GridLayout::dimensions(2), (1, 2));
        assert_eq!(GridLayout::dimensions(3), (2, 2));
        assert_eq!(GridLayout::dimensions(4), (2, 2));
        assert_eq!(GridLayout::dimensions(5), (2, 3));
        assert_eq!(GridLayout::dimensions(7), (3, 3));
        assert_eq!(GridLayout::dimensions(10), (3, 4));
    }

    #[test]
    fn two_sources_side_by_side() {
        let layout = GridLayout::new(2, 1920, 1080).unwrap();
        assert_eq!((layout.rows, layout.cols), (1, 2));
        assert_eq!((layout.cell_width, layout.cell_height), (958, 1078));
        assert_eq!(layout.cell_origin(0), (1, 1));
        assert_eq!(layout.cell_origin(1), (960, 1));
    }

    #[test]
    fn cells_stay_inside_the_canvas() {
        for n in 1..=12 {
            let layout = GridLayout::new(n, 641, 479).unwrap();
            for k in 0..layout.cells() {
                let rect = layout.cell_rect(k);
                assert!(rect.x >= 1 && rect.y >= 1);
                assert!(rect.x + rect.width < layout.width);
                assert!(rect.y + rect.height < layout.height);
            }
        }
    }

    #[test]
    fn rejects_empty_and_tiny_grids() {
        let err = GridLayout::new(0, 640, 480).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::NoSources)
        ));
        assert!(GridLayout::new(4, 3, 3).is_err());
    }
}
