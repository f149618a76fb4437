//! Fixed-width slicing of the coded spectral envelope along time.

use std::iter::FusedIterator;

use ndarray::{s, ArrayView2, Axis};

/// One `D x width` window of a coded envelope.
#[derive(Debug, Clone)]
pub struct Segment<'a> {
    /// First column of the window in the source envelope.
    pub start: usize,
    pub data: ArrayView2<'a, f64>,
}

/// Non-overlapping windows at offsets `0, width, 2 * width, ...`.
///
/// A trailing remainder narrower than `width` is dropped, never padded, so a
/// `T`-column input yields exactly `T / width` windows.
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    coded: ArrayView2<'a, f64>,
    width: usize,
    next_start: usize,
}

impl<'a> Segments<'a> {
    /// # Panics
    ///
    /// Panics if `width` is zero.
    pub fn new(coded: ArrayView2<'a, f64>, width: usize) -> Self {
        assert!(width > 0, "segment width must be positive");
        Self {
            coded,
            width,
            next_start: 0,
        }
    }

    fn columns(&self) -> usize {
        self.coded.len_of(Axis(1))
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start;
        let end = start.checked_add(self.width)?;
        if end > self.columns() {
            return None;
        }
        self.next_start = end;
        Some(Segment {
            start,
            data: self.coded.slice_move(s![.., start..end]),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.columns().saturating_sub(self.next_start) / self.width;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Segments<'_> {}
impl FusedIterator for Segments<'_> {}
