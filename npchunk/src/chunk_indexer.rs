//! Covering ranges of index sets.
//!
//! A worker that owns an arbitrary set of indices of the outer dimension of a shared array maps the minimal contiguous window covering them.
//! [`covering_range`] computes that window and, unless told otherwise, checks that the indices fill it exactly.
//!
//! The elements of a mapped window are in ascending index order, not in the order the indices were given.
//! Use [`CoveringRange::local_index`] to find the position of an original index in the window.

use std::ops::Range;
use std::path::Path;

use itertools::Itertools;
use npchunk_mmap::{MapError, MapMode, MappedArrayView};
use thiserror::Error;

/// A contiguous range of indices.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CoveringRange {
    offset: u64,
    length: u64,
}

impl CoveringRange {
    /// Create a new covering range of `length` indices starting at `offset`.
    #[must_use]
    pub const fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// The first index.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// The number of indices.
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// The index after the last index.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    /// Convert to a [`Range`].
    #[must_use]
    pub const fn to_range(&self) -> Range<u64> {
        self.offset..self.end()
    }

    /// Returns true if `index` is in the range.
    #[must_use]
    pub const fn contains(&self, index: u64) -> bool {
        index >= self.offset && index < self.end()
    }

    /// The position of `index` relative to the start of the range, or [`None`] if it is outside the range.
    #[must_use]
    pub fn local_index(&self, index: u64) -> Option<usize> {
        if self.contains(index) {
            usize::try_from(index - self.offset).ok()
        } else {
            None
        }
    }
}

/// A covering range error.
#[derive(Clone, Debug, Error)]
pub enum ChunkIndexError {
    /// An empty index set has no covering range.
    #[error("an empty index set has no covering range")]
    EmptyIndices,
    /// The indices do not fill their covering range exactly.
    #[error("{count} indices do not exactly fill the covering range of {length} indices starting at {offset}")]
    NonContiguousIndices {
        /// The first index.
        offset: u64,
        /// The length of the covering range.
        length: u64,
        /// The number of indices.
        count: usize,
    },
    /// The covering range is longer than [`u64::MAX`].
    #[error("the covering range of indices from {first} to {last} overflows")]
    RangeOverflow {
        /// The smallest index.
        first: u64,
        /// The largest index.
        last: u64,
    },
}

/// Compute the minimal contiguous range covering `indices`.
///
/// If `check_contiguous` is true, the indices must fill the range exactly: no gaps and no duplicates.
/// The order of `indices` does not matter.
///
/// # Errors
/// Returns
///  - [`ChunkIndexError::EmptyIndices`] if `indices` is empty,
///  - [`ChunkIndexError::NonContiguousIndices`] if `check_contiguous` is true and the indices have gaps or duplicates, or
///  - [`ChunkIndexError::RangeOverflow`] if the range covers every [`u64`].
pub fn covering_range<I>(indices: I, check_contiguous: bool) -> Result<CoveringRange, ChunkIndexError>
where
    I: IntoIterator<Item = u64>,
{
    let indices = indices.into_iter().sorted_unstable().collect_vec();
    let (Some(&first), Some(&last)) = (indices.first(), indices.last()) else {
        return Err(ChunkIndexError::EmptyIndices);
    };
    let length = (last - first)
        .checked_add(1)
        .ok_or(ChunkIndexError::RangeOverflow { first, last })?;

    if check_contiguous {
        let contiguous = indices.len() as u64 == length
            && indices
                .iter()
                .tuple_windows()
                .all(|(previous, next)| next - previous == 1);
        if !contiguous {
            return Err(ChunkIndexError::NonContiguousIndices {
                offset: first,
                length,
                count: indices.len(),
            });
        }
    }
    Ok(CoveringRange::new(first, length))
}

/// An error opening the chunk of an array covering a set of indices.
#[derive(Clone, Debug, Error)]
pub enum ChunkError {
    /// The indices are invalid.
    #[error(transparent)]
    Index(#[from] ChunkIndexError),
    /// The covering window cannot be mapped.
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Map the window of the array file at `path` covering `indices` of its outer dimension.
///
/// Returns the view and its covering range. See [`covering_range`] for the meaning of `check_contiguous`.
///
/// # Errors
/// Returns [`ChunkError::Index`] if the indices are invalid or [`ChunkError::Map`] if the window cannot be mapped.
pub fn open_chunk<P, I>(
    path: P,
    indices: I,
    mode: MapMode,
    check_contiguous: bool,
) -> Result<(MappedArrayView, CoveringRange), ChunkError>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = u64>,
{
    let range = covering_range(indices, check_contiguous)?;
    let view = MappedArrayView::open_existing(path, mode, range.offset(), Some(range.length()))?;
    Ok((view, range))
}
