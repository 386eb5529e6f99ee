//! Format detection and loading.
//!
//! [`load`] and [`load_reader`] sniff the leading bytes of a stream and dispatch on the first matching signature:
//!
//! | Leading bytes                | Format                        | Result                                        |
//! |------------------------------|-------------------------------|-----------------------------------------------|
//! | `\x93NUMPY`                  | [`DetectedFormat::Array`]     | [`Loaded::Array`] or [`Loaded::Mapped`]       |
//! | `PK\x03\x04`                 | [`DetectedFormat::Archive`]   | [`Loaded::Archive`]                           |
//! | `\x80` and a protocol 2 to 5 | [`DetectedFormat::Pickle`]    | [`LoadError::UnsupportedLegacyFormat`]        |
//! | anything else                | [`DetectedFormat::Generic`]   | [`Loaded::Generic`] if the stream is JSON     |

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use npchunk_format::{FormatError, MAGIC, NpyArray};
use npchunk_mmap::{MapError, MapMode, MappedArrayView};
use npchunk_zip::{NpzArchive, NpzError, ZIP_SIGNATURE};
use thiserror::Error;

/// The format of a stream, detected from its leading bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum DetectedFormat {
    /// An array file.
    #[display("array")]
    Array,
    /// A multi-array zip archive.
    #[display("archive")]
    Archive,
    /// A pickle stream.
    #[display("pickle")]
    Pickle,
    /// No known signature.
    #[display("generic")]
    Generic,
}

/// The number of leading bytes inspected by [`detect_format`].
const SIGNATURE_LENGTH: usize = MAGIC.len();

fn is_array(bytes: &[u8]) -> bool {
    bytes.starts_with(&MAGIC)
}

fn is_archive(bytes: &[u8]) -> bool {
    bytes.starts_with(&ZIP_SIGNATURE)
}

fn is_pickle(bytes: &[u8]) -> bool {
    matches!(bytes, [0x80, 2..=5, ..])
}

/// Signatures in dispatch order. A stream matching none is [`DetectedFormat::Generic`].
const DISPATCH_TABLE: &[(fn(&[u8]) -> bool, DetectedFormat)] = &[
    (is_array, DetectedFormat::Array),
    (is_archive, DetectedFormat::Archive),
    (is_pickle, DetectedFormat::Pickle),
];

/// A loading error.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    /// The stream matches no signature and is not a generic document.
    #[error("the stream is not an array file, an archive or a generic document")]
    FormatMismatch,
    /// The stream is a pickle, which is tied to one language runtime.
    #[error("pickle streams are not supported")]
    UnsupportedLegacyFormat,
    /// Invalid load options for the stream.
    #[error("{0}")]
    InvalidInput(String),
    /// The array file is invalid.
    #[error(transparent)]
    Format(#[from] FormatError),
    /// The array file cannot be mapped.
    #[error(transparent)]
    Map(#[from] MapError),
    /// The archive is invalid.
    #[error(transparent)]
    Archive(#[from] NpzError),
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] Arc<std::io::Error>),
}

impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(Arc::new(err))
    }
}

/// Options for use with [`load`] and [`load_reader`].
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    map_mode: Option<MapMode>,
    element_offset: u64,
    length: Option<u64>,
}

impl LoadOptions {
    /// Map array files with `map_mode` instead of reading them into memory.
    ///
    /// Has no effect for archives.
    pub fn map_mode(&mut self, map_mode: MapMode) -> &mut Self {
        self.map_mode = Some(map_mode);
        self
    }

    /// Map the window of a mapped array file starting at `element_offset` of its outer dimension.
    ///
    /// Requires a map mode.
    pub fn element_offset(&mut self, element_offset: u64) -> &mut Self {
        self.element_offset = element_offset;
        self
    }

    /// Map `length` indices of the outer dimension of a mapped array file.
    ///
    /// Requires a map mode.
    pub fn length(&mut self, length: u64) -> &mut Self {
        self.length = Some(length);
        self
    }

    fn has_window(&self) -> bool {
        self.element_offset != 0 || self.length.is_some()
    }

    fn validate(&self) -> Result<(), LoadError> {
        if self.map_mode.is_none() && self.has_window() {
            Err(LoadError::InvalidInput(
                "an element offset or length requires a map mode".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

/// The result of loading a stream.
#[derive(Debug)]
pub enum Loaded<R> {
    /// An array file read into memory.
    Array(NpyArray),
    /// A memory-mapped array file.
    Mapped(MappedArrayView),
    /// A multi-array archive. Entries are read on access.
    Archive(NpzArchive<R>),
    /// A generic document.
    Generic(serde_json::Value),
}

impl<R> Loaded<R> {
    /// The detected format of the loaded stream.
    #[must_use]
    pub const fn format(&self) -> DetectedFormat {
        match self {
            Self::Array(_) | Self::Mapped(_) => DetectedFormat::Array,
            Self::Archive(_) => DetectedFormat::Archive,
            Self::Generic(_) => DetectedFormat::Generic,
        }
    }

    /// Return the array read into memory, if any.
    #[must_use]
    pub fn into_array(self) -> Option<NpyArray> {
        match self {
            Self::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Return the mapped array, if any.
    #[must_use]
    pub fn into_mapped(self) -> Option<MappedArrayView> {
        match self {
            Self::Mapped(view) => Some(view),
            _ => None,
        }
    }

    /// Return the archive, if any.
    #[must_use]
    pub fn into_archive(self) -> Option<NpzArchive<R>> {
        match self {
            Self::Archive(archive) => Some(archive),
            _ => None,
        }
    }

    /// Return the generic document, if any.
    #[must_use]
    pub fn into_generic(self) -> Option<serde_json::Value> {
        match self {
            Self::Generic(value) => Some(value),
            _ => None,
        }
    }
}

/// Detect the format of `reader` from its leading bytes.
///
/// The position of `reader` is restored.
///
/// # Errors
/// Returns [`LoadError::IOError`] if `reader` cannot be read or repositioned.
pub fn detect_format<R: Read + Seek>(reader: &mut R) -> Result<DetectedFormat, LoadError> {
    let start = reader.stream_position()?;
    let mut signature = Vec::with_capacity(SIGNATURE_LENGTH);
    reader
        .by_ref()
        .take(SIGNATURE_LENGTH as u64)
        .read_to_end(&mut signature)?;
    reader.seek(SeekFrom::Start(start))?;

    let format = DISPATCH_TABLE
        .iter()
        .find(|(matches, _)| matches(&signature))
        .map_or(DetectedFormat::Generic, |&(_, format)| format);
    log::debug!("detected {format} format");
    Ok(format)
}

/// Load the file at `path`.
///
/// Array files are mapped if `options` has a map mode, and otherwise read into memory.
///
/// # Errors
/// Returns
///  - [`LoadError::InvalidInput`] if `options` has an element offset or length without a map mode, or for a file which is not an array file,
///  - [`LoadError::UnsupportedLegacyFormat`] for a pickle,
///  - [`LoadError::FormatMismatch`] if the file matches no format, or
///  - the error of the format specific loader.
pub fn load<P: AsRef<Path>>(
    path: P,
    options: &LoadOptions,
) -> Result<Loaded<BufReader<File>>, LoadError> {
    options.validate()?;
    let path = path.as_ref();
    let mut reader = BufReader::new(File::open(path)?);
    let format = detect_format(&mut reader)?;
    match (format, options.map_mode) {
        (DetectedFormat::Array, Some(mode)) => {
            drop(reader);
            Ok(Loaded::Mapped(MappedArrayView::open_existing(
                path,
                mode,
                options.element_offset,
                options.length,
            )?))
        }
        _ => dispatch(reader, format, options),
    }
}

/// Load from `reader`, starting at its current position.
///
/// Array files are always read into memory. Use [`load`] to map them.
///
/// # Errors
/// Returns [`LoadError::InvalidInput`] if `options` has a map mode and `reader` holds an array file, otherwise see [`load`].
pub fn load_reader<R: Read + Seek>(
    mut reader: R,
    options: &LoadOptions,
) -> Result<Loaded<R>, LoadError> {
    options.validate()?;
    let format = detect_format(&mut reader)?;
    if format == DetectedFormat::Array && options.map_mode.is_some() {
        return Err(LoadError::InvalidInput(
            "an array can only be mapped when loaded from a path".to_string(),
        ));
    }
    dispatch(reader, format, options)
}

fn dispatch<R: Read + Seek>(
    mut reader: R,
    format: DetectedFormat,
    options: &LoadOptions,
) -> Result<Loaded<R>, LoadError> {
    if format != DetectedFormat::Array && options.has_window() {
        return Err(LoadError::InvalidInput(format!(
            "an element offset or length cannot be applied to a {format} stream"
        )));
    }
    match format {
        DetectedFormat::Array => Ok(Loaded::Array(NpyArray::read(&mut reader)?)),
        DetectedFormat::Archive => {
            if let Some(map_mode) = options.map_mode {
                log::warn!("map mode {map_mode} has no effect for archives");
            }
            Ok(Loaded::Archive(NpzArchive::new(reader)?))
        }
        DetectedFormat::Pickle => Err(LoadError::UnsupportedLegacyFormat),
        DetectedFormat::Generic => match serde_json::from_reader(reader) {
            Ok(value) => Ok(Loaded::Generic(value)),
            Err(err) if err.is_io() => Err(std::io::Error::from(err).into()),
            Err(_) => Err(LoadError::FormatMismatch),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use npchunk_format::LayoutOrder;

    use super::*;

    fn array_bytes() -> Vec<u8> {
        let array =
            NpyArray::from_elements(vec![4], LayoutOrder::RowMajor, &[1u16, 2, 3, 4]).unwrap();
        let mut bytes = Vec::new();
        array.write(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn detect_format_restores_position() {
        let mut reader = Cursor::new(array_bytes());
        assert_eq!(detect_format(&mut reader).unwrap(), DetectedFormat::Array);
        assert_eq!(reader.position(), 0);

        let cases: [(&[u8], DetectedFormat); 6] = [
            (b"PK\x03\x04rest", DetectedFormat::Archive),
            (b"\x80\x02}q\x00.", DetectedFormat::Pickle),
            (b"\x80\x06", DetectedFormat::Generic),
            (b"[1, 2]", DetectedFormat::Generic),
            (b"\x93NUM", DetectedFormat::Generic),
            (b"", DetectedFormat::Generic),
        ];
        for (bytes, format) in cases {
            let mut reader = Cursor::new(bytes);
            assert_eq!(detect_format(&mut reader).unwrap(), format);
            assert_eq!(reader.position(), 0);
        }
    }

    #[test]
    fn load_reader_embedded_array() {
        let mut buffer = b"prefix".to_vec();
        buffer.extend_from_slice(&array_bytes());
        buffer.extend_from_slice(b"suffix");
        let mut reader = Cursor::new(buffer);
        reader.set_position(6);

        let array = load_reader(reader, &LoadOptions::default())
            .unwrap()
            .into_array()
            .unwrap();
        assert_eq!(array.to_vec::<u16>().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn load_reader_archive_debug() {
        let mut writer = npchunk_zip::NpzWriter::new(Cursor::new(Vec::new()));
        let array = NpyArray::from_elements(vec![2], LayoutOrder::RowMajor, &[7i32, 8]).unwrap();
        writer.add_array("gates", &array).unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let loaded = load_reader(Cursor::new(bytes), &LoadOptions::default()).unwrap();
        assert_eq!(loaded.format(), DetectedFormat::Archive);
        let debug = format!("{loaded:?}");
        assert!(debug.starts_with("Archive(NpzArchive { entries: 1"), "{debug}");
    }

    #[test]
    fn load_reader_generic() {
        let loaded = load_reader(
            Cursor::new(br#"{"model": "beeler_reuter_1977", "duration": 400.0}"#),
            &LoadOptions::default(),
        )
        .unwrap();
        assert_eq!(loaded.format(), DetectedFormat::Generic);
        assert_eq!(loaded.into_generic().unwrap()["duration"], 400.0);
    }

    #[test]
    fn load_reader_format_mismatch() {
        assert!(matches!(
            load_reader(Cursor::new(b"\x00\x01 not json"), &LoadOptions::default()),
            Err(LoadError::FormatMismatch)
        ));
        assert!(matches!(
            load_reader(Cursor::new(b""), &LoadOptions::default()),
            Err(LoadError::FormatMismatch)
        ));
    }

    #[test]
    fn load_reader_pickle() {
        assert!(matches!(
            load_reader(Cursor::new(b"\x80\x04\x95\x00"), &LoadOptions::default()),
            Err(LoadError::UnsupportedLegacyFormat)
        ));
    }

    #[test]
    fn load_options_window_without_map_mode() {
        let mut options = LoadOptions::default();
        options.element_offset(2);
        assert!(matches!(
            load_reader(Cursor::new(array_bytes()), &options),
            Err(LoadError::InvalidInput(_))
        ));
        let mut options = LoadOptions::default();
        options.length(1);
        assert!(matches!(
            load_reader(Cursor::new(array_bytes()), &options),
            Err(LoadError::InvalidInput(_))
        ));
    }

    #[test]
    fn load_reader_map_mode() {
        let mut options = LoadOptions::default();
        options.map_mode(MapMode::ReadOnly);
        assert!(matches!(
            load_reader(Cursor::new(array_bytes()), &options),
            Err(LoadError::InvalidInput(_))
        ));

        options.length(2);
        assert!(matches!(
            load_reader(Cursor::new(b"{}"), &options),
            Err(LoadError::InvalidInput(_))
        ));
    }
}
