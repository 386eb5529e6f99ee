//! The array file format of the [`npchunk`](https://docs.rs/npchunk/latest/npchunk/index.html) crate.
//!
//! An array file is a small self-describing header followed by the raw element data:
//! - [`header`]: reading and writing the versioned, padded header record,
//! - [`descriptor`]: element descriptors such as `<f8` or structured records,
//! - [`element`]: Rust element types that can be viewed over raw element bytes, and
//! - [`NpyArray`]: an owned header and its element data.
//!
//! Only format version 1.0 is supported.
//!
//! ## Licence
//! `npchunk_format` is licensed under either of
//! - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//! - the MIT license <http://opensource.org/licenses/MIT>, at your option.
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod array;
pub mod descriptor;
pub mod element;
pub mod header;
pub mod py_literal;

use std::sync::Arc;

use thiserror::Error;

pub use array::NpyArray;
#[cfg(feature = "ndarray")]
pub use array::{elements_to_ndarray, ndarray_shape};
pub use descriptor::{ByteOrder, DescriptorError, ElementDescriptor, ScalarType, StructField, TypeKind};
pub use element::{Element, ElementError};
pub use header::{
    ArrayHeader, FormatVersion, LayoutOrder, MAGIC, encode_header, read_header, write_header,
};

/// An array file format error.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum FormatError {
    /// The stream does not start with the array file magic.
    #[error("not an array file")]
    FormatMismatch,
    /// The format version is not supported.
    #[error("unsupported format version {0}, only (1, 0) is supported")]
    UnsupportedVersion(FormatVersion),
    /// The element type contains object references, which cannot be stored or mapped.
    #[error("element type {0} contains object references and cannot be stored or mapped")]
    MappingUnsafeType(ElementDescriptor),
    /// A malformed header record.
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    /// A malformed element descriptor.
    #[error("invalid element descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),
    /// The header record does not fit the 16-bit record length.
    #[error("header record of {0} bytes exceeds the maximum of 65535 bytes")]
    HeaderTooLong(usize),
    /// The element data length does not match the header.
    #[error("element data is {got} bytes, expected {expected} bytes")]
    DataLength {
        /// The expected length in bytes.
        expected: u64,
        /// The actual length in bytes.
        got: u64,
    },
    /// Element data is not compatible with the requested element type.
    #[error(transparent)]
    Element(#[from] ElementError),
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] Arc<std::io::Error>),
}

impl From<std::io::Error> for FormatError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(Arc::new(err))
    }
}
