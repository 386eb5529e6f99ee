//! `npchunk` is a Rust library for chunked, memory-mapped storage of arrays in the `.npy` array file format.
//!
//! Many independent workers, such as the tasks of a cluster array job, can each map a disjoint window of one shared array file and read or write it in place, without copying the whole file into memory.
//!
//! The library is split into crates by concern, re-exported here:
//! - [`format`] (`npchunk_format`): the array header codec, element descriptors and owned arrays,
//! - [`mmap`] (`npchunk_mmap`): memory-mapped windows of array files, and
//! - [`archive`] (`npchunk_zip`): multi-array zip archives.
//!
//! This crate adds
//! - [`chunk_indexer`]: the contiguous window covering a set of indices, and
//! - [`loader`]: format detection and dispatch for streams of unknown format.
//!
//! ## Example
//! A coordinator creates the shared file, then each worker maps the chunk covering its indices.
#![cfg_attr(feature = "ndarray", doc = "```rust")]
#![cfg_attr(not(feature = "ndarray"), doc = "```rust,ignore")]
//! use npchunk::{open_chunk, Element, LayoutOrder, MapMode, MappedArrayView};
//!
//! # let dir = tempfile::tempdir()?;
//! let path = dir.path().join("voltage.npy");
//! drop(MappedArrayView::open_for_create(&path, f64::descriptor(), vec![100, 3], LayoutOrder::RowMajor)?);
//!
//! // one worker owns indices 20 to 29 of the outer dimension
//! let (mut chunk, range) = open_chunk(&path, 20..30, MapMode::ReadWrite, true)?;
//! assert_eq!(range.offset(), 20);
//! assert_eq!(chunk.shape(), &[10, 3]);
//! let mut view = chunk.as_ndarray_mut::<f64>()?;
//! view[[0, 1]] = -84.0;
//! drop(chunk);
//!
//! let array = npchunk::load(&path, &npchunk::LoadOptions::default())?.into_array().unwrap();
//! assert_eq!(array.to_ndarray::<f64>()?[[20, 1]], -84.0);
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Concurrency
//! There is no locking and no coordination between views.
//! Views over disjoint windows of one file may be used concurrently, including for writing.
//! Writers to overlapping windows must be avoided or synchronised by the caller.
//!
//! ## Crate Features
//! #### Default
//! - `ndarray`: adds [`ndarray`](https://docs.rs/ndarray/latest/ndarray/) conversions to owned arrays and mapped views.
//!
//! ## Licence
//! `npchunk` is licensed under either of
//! - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//! - the MIT license <http://opensource.org/licenses/MIT>, at your option.
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod chunk_indexer;
pub mod loader;

pub use npchunk_format as format;
pub use npchunk_mmap as mmap;
pub use npchunk_zip as archive;

pub use chunk_indexer::{ChunkError, ChunkIndexError, CoveringRange, covering_range, open_chunk};
pub use loader::{DetectedFormat, LoadError, LoadOptions, Loaded, detect_format, load, load_reader};
pub use npchunk_format::{
    ArrayHeader, Element, ElementDescriptor, FormatError, FormatVersion, LayoutOrder, NpyArray,
    read_header, write_header,
};
pub use npchunk_mmap::{MapError, MapMode, MappedArrayView};
pub use npchunk_zip::{NpzArchive, NpzError, NpzWriter};
