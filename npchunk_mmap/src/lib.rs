//! Memory-mapped array files for the [`npchunk`](https://docs.rs/npchunk/latest/npchunk/index.html) crate.
//!
//! A [`MappedArrayView`] binds a contiguous window of the element data of an array file into memory.
//! Windows are addressed along the outer dimension, so independent workers can each map a disjoint window of one shared file and read or write it in place.
//!
//! There is no locking. Views over overlapping windows of the same file must be avoided or synchronised by the caller.
//!
//! ## Licence
//! `npchunk_mmap` is licensed under either of
//! - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//! - the MIT license <http://opensource.org/licenses/MIT>, at your option.
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod view;

use std::sync::Arc;

use npchunk_format::{ElementError, FormatError};
use thiserror::Error;

pub use view::MappedArrayView;

/// The access mode of a mapping.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum MapMode {
    /// Read only access.
    #[display("r")]
    ReadOnly,
    /// Read and write access. Writes reach the file on [`MappedArrayView::flush`] or when the view is dropped.
    #[display("r+")]
    ReadWrite,
    /// Read and write access. Writes are private to the view and never reach the file.
    #[display("c")]
    CopyOnWrite,
}

/// A mapping error.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum MapError {
    /// The array file is invalid.
    #[error(transparent)]
    Format(#[from] FormatError),
    /// The requested window exceeds the outer dimension of the array.
    #[error("window of length {length} at element offset {offset} exceeds the outer dimension {outer}")]
    Bounds {
        /// The element offset along the outer dimension.
        offset: u64,
        /// The length of the window along the outer dimension.
        length: u64,
        /// The outer dimension of the stored array.
        outer: u64,
    },
    /// An invalid argument.
    #[error("{0}")]
    InvalidInput(String),
    /// The file is shorter than its header requires.
    #[error("file is {got} bytes, expected at least {expected} bytes")]
    FileTooShort {
        /// The required length in bytes.
        expected: u64,
        /// The file length in bytes.
        got: u64,
    },
    /// A write access was attempted on a read only view.
    #[error("a write access was attempted on a read only view")]
    ReadOnly,
    /// The element type is incompatible with the view.
    #[error(transparent)]
    Element(#[from] ElementError),
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] Arc<std::io::Error>),
}

impl From<std::io::Error> for MapError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(Arc::new(err))
    }
}
