//! Multi-array zip archives for the [`npchunk`](https://docs.rs/npchunk/latest/npchunk/index.html) crate.
//!
//! An archive is a zip file where each entry `<name>.npy` is an array file.
//! [`NpzArchive`] reads entries lazily by name, [`NpzWriter`] writes them stored or deflate compressed.
//!
//! ```
//! use std::io::Cursor;
//! use npchunk_format::{LayoutOrder, NpyArray};
//! use npchunk_zip::{NpzArchive, NpzWriter};
//!
//! let mut writer = NpzWriter::new(Cursor::new(Vec::new()));
//! let array = NpyArray::from_elements(vec![3], LayoutOrder::RowMajor, &[1.0f64, 2.0, 3.0])?;
//! writer.add_array("voltage", &array)?;
//! let bytes = writer.finish()?.into_inner();
//!
//! let mut archive = NpzArchive::new(Cursor::new(bytes))?;
//! assert_eq!(archive.names(), vec!["voltage"]);
//! assert_eq!(archive.get("voltage")?, Some(array));
//! assert_eq!(archive.get("current")?, None);
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Licence
//! `npchunk_zip` is licensed under either of
//! - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//! - the MIT license <http://opensource.org/licenses/MIT>, at your option.

use std::io::{Read, Seek, Write};
use std::sync::Arc;

use npchunk_format::{FormatError, NpyArray};
use thiserror::Error;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// The signature at the start of a zip archive with at least one entry.
pub const ZIP_SIGNATURE: [u8; 4] = *b"PK\x03\x04";

/// The extension of array entries.
const ENTRY_EXTENSION: &str = ".npy";

/// An archive error.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum NpzError {
    /// The zip container is invalid.
    #[error("invalid zip archive: {0}")]
    Zip(String),
    /// An entry is not a valid array file.
    #[error("invalid array {name:?}: {source}")]
    Entry {
        /// The name of the array.
        name: String,
        /// The array error.
        source: FormatError,
    },
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] Arc<std::io::Error>),
}

impl From<std::io::Error> for NpzError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(Arc::new(err))
    }
}

impl From<ZipError> for NpzError {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(err) => err.into(),
            _ => Self::Zip(err.to_string()),
        }
    }
}

/// A multi-array archive reader.
///
/// Entries are only read and parsed when requested with [`NpzArchive::get`].
pub struct NpzArchive<R> {
    archive: ZipArchive<R>,
    entries: usize,
}

impl<R> std::fmt::Debug for NpzArchive<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NpzArchive")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl<R: Read + Seek> NpzArchive<R> {
    /// Open an archive from `reader`.
    ///
    /// Only the central directory is read.
    ///
    /// # Errors
    /// Returns [`NpzError::Zip`] if `reader` is not a valid zip archive.
    pub fn new(reader: R) -> Result<Self, NpzError> {
        let archive = ZipArchive::new(reader)?;
        let entries = archive.len();
        Ok(Self { archive, entries })
    }

    /// The names of the entries, without the array file extension, in archive order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.archive
            .file_names()
            .map(|name| name.strip_suffix(ENTRY_EXTENSION).unwrap_or(name))
            .collect()
    }

    /// The number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries
    }

    /// Returns true if the archive has no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Returns true if the archive has an entry named `name`.
    ///
    /// `name` may be given with or without the array file extension, as for [`NpzArchive::get`].
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entry_name(name).is_some()
    }

    /// The name of the entry holding the array `name`, preferring `<name>.npy` over `name`.
    fn entry_name(&self, name: &str) -> Option<String> {
        let with_extension = if name.ends_with(ENTRY_EXTENSION) {
            name.to_string()
        } else {
            format!("{name}{ENTRY_EXTENSION}")
        };
        [with_extension, name.to_string()]
            .into_iter()
            .find(|entry_name| self.archive.index_for_name(entry_name).is_some())
    }

    /// Read the array named `name`.
    ///
    /// `name` may be given with or without the array file extension.
    /// Returns [`None`] if there is no such entry.
    ///
    /// # Errors
    /// Returns [`NpzError::Entry`] if the entry is not a valid array file,
    /// or [`NpzError::Zip`] if the entry cannot be decompressed.
    pub fn get(&mut self, name: &str) -> Result<Option<NpyArray>, NpzError> {
        let Some(entry_name) = self.entry_name(name) else {
            return Ok(None);
        };
        let mut entry = match self.archive.by_name(&entry_name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        NpyArray::read(&mut entry)
            .map(Some)
            .map_err(|source| NpzError::Entry {
                name: name.to_string(),
                source,
            })
    }

    /// Return the underlying reader.
    #[must_use]
    pub fn into_inner(self) -> R {
        self.archive.into_inner()
    }
}

/// A multi-array archive writer.
pub struct NpzWriter<W: Write + Seek> {
    writer: ZipWriter<W>,
    options: SimpleFileOptions,
}

impl<W: Write + Seek> std::fmt::Debug for NpzWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NpzWriter").finish_non_exhaustive()
    }
}

impl<W: Write + Seek> NpzWriter<W> {
    /// Create a writer which stores entries uncompressed.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: ZipWriter::new(writer),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        }
    }

    /// Create a writer which compresses entries with deflate.
    #[must_use]
    pub fn new_compressed(writer: W) -> Self {
        Self {
            writer: ZipWriter::new(writer),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        }
    }

    /// Add `array` as the entry `<name>.npy`.
    ///
    /// # Errors
    /// Returns [`NpzError::Entry`] if the array header cannot be encoded or an [`NpzError`] if writing fails.
    pub fn add_array(&mut self, name: &str, array: &NpyArray) -> Result<(), NpzError> {
        let large_file = array.bytes().len() as u64 >= u64::from(u32::MAX) - (1 << 16);
        self.writer.start_file(
            format!("{name}{ENTRY_EXTENSION}"),
            self.options.large_file(large_file),
        )?;
        array
            .write(&mut self.writer)
            .map_err(|source| match source {
                FormatError::IOError(err) => NpzError::IOError(err),
                source => NpzError::Entry {
                    name: name.to_string(),
                    source,
                },
            })
    }

    /// Write the central directory and return the underlying writer.
    ///
    /// # Errors
    /// Returns an [`NpzError`] if writing fails.
    pub fn finish(self) -> Result<W, NpzError> {
        Ok(self.writer.finish()?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use npchunk_format::LayoutOrder;

    use super::*;

    fn archive(compressed: bool) -> Vec<u8> {
        let cursor = Cursor::new(Vec::new());
        let mut writer = if compressed {
            NpzWriter::new_compressed(cursor)
        } else {
            NpzWriter::new(cursor)
        };
        let a = NpyArray::from_elements(vec![2, 2], LayoutOrder::RowMajor, &[1u8, 2, 3, 4]).unwrap();
        let b = NpyArray::from_elements(vec![3], LayoutOrder::RowMajor, &[0.5f32; 3]).unwrap();
        writer.add_array("a", &a).unwrap();
        writer.add_array("b", &b).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn npz_signature() {
        assert!(archive(false).starts_with(&ZIP_SIGNATURE));
        assert!(archive(true).starts_with(&ZIP_SIGNATURE));
    }

    #[test]
    fn npz_read() {
        for compressed in [false, true] {
            let mut archive = NpzArchive::new(Cursor::new(archive(compressed))).unwrap();
            assert_eq!(archive.len(), 2);
            assert_eq!(archive.names(), vec!["a", "b"]);
            assert!(archive.contains("b"));
            assert!(archive.contains("b.npy"));
            assert!(!archive.contains("c"));

            let a = archive.get("a").unwrap().unwrap();
            assert_eq!(a.header().shape(), &[2, 2]);
            assert_eq!(a.to_vec::<u8>().unwrap(), vec![1, 2, 3, 4]);
            let b = archive.get("b.npy").unwrap().unwrap();
            assert_eq!(b.to_vec::<f32>().unwrap(), vec![0.5; 3]);
            assert!(archive.get("c").unwrap().is_none());
        }
    }

    #[test]
    fn npz_debug() {
        let archive = NpzArchive::new(Cursor::new(archive(false))).unwrap();
        assert_eq!(format!("{archive:?}"), "NpzArchive { entries: 2, .. }");
    }

    #[test]
    fn npz_invalid_entry() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("notes.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"not an array").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let mut archive = NpzArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.names(), vec!["notes.txt"]);
        assert!(matches!(
            archive.get("notes.txt"),
            Err(NpzError::Entry {
                source: FormatError::FormatMismatch,
                ..
            })
        ));
    }

    #[test]
    fn npz_not_a_zip() {
        assert!(matches!(
            NpzArchive::new(Cursor::new(b"PK\x03\x04 truncated".to_vec())),
            Err(NpzError::Zip(_) | NpzError::IOError(_))
        ));
    }
}
