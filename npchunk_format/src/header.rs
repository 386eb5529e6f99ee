//! The array header codec.
//!
//! An array file starts with a fixed preamble followed by a textual header record:
//!
//! | Offset   | Length | Content                                                        |
//! |----------|--------|----------------------------------------------------------------|
//! | 0        | 6      | [`MAGIC`]                                                      |
//! | 6        | 2      | major and minor version, only `(1, 0)` is supported            |
//! | 8        | 2      | little-endian length `L` of the header record                  |
//! | 10       | `L`    | header record, space padded and newline terminated             |
//! | 10 + `L` |        | element data                                                   |
//!
//! `10 + L` is always a multiple of [`HEADER_ALIGNMENT`] for headers written by [`write_header`].

use std::io::{Read, Write};

use crate::FormatError;
use crate::descriptor::ElementDescriptor;
use crate::py_literal::PyValue;

/// The magic bytes at the start of every array file.
pub const MAGIC: [u8; 6] = *b"\x93NUMPY";

/// The alignment of the element data written by [`write_header`].
pub const HEADER_ALIGNMENT: usize = 64;

/// Magic, version and record length.
const PREAMBLE_LENGTH: usize = MAGIC.len() + 4;

/// The version of the file format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, derive_more::Display)]
#[display("({major}, {minor})")]
pub struct FormatVersion {
    /// The major version.
    pub major: u8,
    /// The minor version.
    pub minor: u8,
}

impl FormatVersion {
    /// Version 1.0, the only supported version.
    pub const V1_0: Self = Self::new(1, 0);

    /// Create a new format version.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self::V1_0
    }
}

/// The memory layout of a multidimensional array.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum LayoutOrder {
    /// Row-major (C) order. The last dimension varies fastest.
    #[default]
    RowMajor,
    /// Column-major (Fortran) order. The first dimension varies fastest.
    ColumnMajor,
}

/// An array header.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArrayHeader {
    version: FormatVersion,
    descriptor: ElementDescriptor,
    shape: Vec<u64>,
    order: LayoutOrder,
}

impl ArrayHeader {
    /// Create a new version 1.0 array header.
    #[must_use]
    pub fn new(descriptor: ElementDescriptor, shape: Vec<u64>, order: LayoutOrder) -> Self {
        Self {
            version: FormatVersion::V1_0,
            descriptor,
            shape,
            order,
        }
    }

    /// Set the format version.
    ///
    /// Headers with a version other than [`FormatVersion::V1_0`] cannot be written.
    #[must_use]
    pub const fn with_version(mut self, version: FormatVersion) -> Self {
        self.version = version;
        self
    }

    /// Replace the shape.
    #[must_use]
    pub fn with_shape(mut self, shape: Vec<u64>) -> Self {
        self.shape = shape;
        self
    }

    /// The format version.
    #[must_use]
    pub const fn version(&self) -> FormatVersion {
        self.version
    }

    /// The element descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> &ElementDescriptor {
        &self.descriptor
    }

    /// The shape, outer to inner.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// The layout order.
    #[must_use]
    pub const fn order(&self) -> LayoutOrder {
        self.order
    }

    /// The number of elements, or [`None`] on overflow.
    #[must_use]
    pub fn num_elements(&self) -> Option<u64> {
        self.shape
            .iter()
            .try_fold(1u64, |elements, &dim| elements.checked_mul(dim))
    }

    /// The size of the element data in bytes, or [`None`] on overflow.
    #[must_use]
    pub fn data_size(&self) -> Option<u64> {
        self.num_elements()?
            .checked_mul(u64::try_from(self.descriptor.item_size()).ok()?)
    }

    /// The size in bytes of one index of the outer dimension, or [`None`] on overflow.
    ///
    /// This is the element size for arrays with at most one dimension.
    #[must_use]
    pub fn outer_stride(&self) -> Option<u64> {
        self.shape
            .iter()
            .skip(1)
            .try_fold(u64::try_from(self.descriptor.item_size()).ok()?, |stride, &dim| {
                stride.checked_mul(dim)
            })
    }

    fn to_record(&self) -> PyValue {
        let entry = |key: &str, value| (PyValue::String(key.to_string()), value);
        PyValue::Dict(vec![
            entry("descr", self.descriptor.to_literal()),
            entry(
                "fortran_order",
                PyValue::Bool(self.order == LayoutOrder::ColumnMajor),
            ),
            entry(
                "shape",
                PyValue::Tuple(
                    self.shape
                        .iter()
                        .map(|&dim| PyValue::Integer(i128::from(dim)))
                        .collect(),
                ),
            ),
        ])
    }

    fn from_record(record: &str, version: FormatVersion) -> Result<Self, FormatError> {
        let record = PyValue::parse(record)
            .map_err(|err| FormatError::InvalidHeader(err.to_string()))?;
        let PyValue::Dict(entries) = &record else {
            return Err(FormatError::InvalidHeader(format!(
                "header record {record} is not a dictionary"
            )));
        };
        if entries.len() != 3
            || entries.iter().any(|(key, _)| {
                !matches!(key.as_str(), Some("descr" | "fortran_order" | "shape"))
            })
        {
            return Err(FormatError::InvalidHeader(format!(
                "header record {record} must have exactly the keys 'descr', 'fortran_order' and 'shape'"
            )));
        }
        let missing = |key: &str| FormatError::InvalidHeader(format!("header record is missing {key:?}"));

        let descriptor =
            ElementDescriptor::from_literal(record.get("descr").ok_or_else(|| missing("descr"))?)?;
        let order = match record.get("fortran_order") {
            Some(PyValue::Bool(false)) => LayoutOrder::RowMajor,
            Some(PyValue::Bool(true)) => LayoutOrder::ColumnMajor,
            Some(fortran_order) => {
                return Err(FormatError::InvalidHeader(format!(
                    "'fortran_order' {fortran_order} is not a boolean"
                )))
            }
            None => return Err(missing("fortran_order")),
        };
        let shape = match record.get("shape") {
            Some(PyValue::Tuple(dims)) => dims
                .iter()
                .map(|dim| match dim {
                    PyValue::Integer(dim) => u64::try_from(*dim).ok(),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    FormatError::InvalidHeader(format!(
                        "'shape' {} must be a tuple of non-negative integers",
                        PyValue::Tuple(dims.clone())
                    ))
                })?,
            Some(shape) => {
                return Err(FormatError::InvalidHeader(format!(
                    "'shape' {shape} is not a tuple"
                )))
            }
            None => return Err(missing("shape")),
        };

        let header = Self {
            version,
            descriptor,
            shape,
            order,
        };
        if header.data_size().is_none() {
            return Err(FormatError::InvalidHeader(format!(
                "array with shape {:?} and element size {} overflows",
                header.shape,
                header.descriptor.item_size()
            )));
        }
        Ok(header)
    }
}

/// Encode the preamble and padded header record of `header`.
///
/// # Errors
/// Returns a [`FormatError`] if
///  - the version is not [`FormatVersion::V1_0`],
///  - the descriptor contains an object reference, or
///  - the header record exceeds the maximum record length.
pub fn encode_header(header: &ArrayHeader) -> Result<Vec<u8>, FormatError> {
    if header.version != FormatVersion::V1_0 {
        return Err(FormatError::UnsupportedVersion(header.version));
    }
    if !header.descriptor.is_mappable() {
        return Err(FormatError::MappingUnsafeType(header.descriptor.clone()));
    }

    let mut record = header.to_record().to_string();
    let unpadded = PREAMBLE_LENGTH + record.len() + 1;
    let padding = unpadded.next_multiple_of(HEADER_ALIGNMENT) - unpadded;
    record.extend(std::iter::repeat(' ').take(padding));
    record.push('\n');
    let record_length =
        u16::try_from(record.len()).map_err(|_| FormatError::HeaderTooLong(record.len()))?;

    let mut bytes = Vec::with_capacity(PREAMBLE_LENGTH + record.len());
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&[header.version.major, header.version.minor]);
    bytes.extend_from_slice(&record_length.to_le_bytes());
    bytes.extend_from_slice(record.as_bytes());
    Ok(bytes)
}

/// Write the preamble and header record of `header` to `writer`.
///
/// Returns the byte offset of the element data relative to the start of the header.
///
/// # Errors
/// Returns a [`FormatError`] if the header cannot be encoded (see [`encode_header`]) or on an IO error.
pub fn write_header<W: Write>(writer: &mut W, header: &ArrayHeader) -> Result<u64, FormatError> {
    let bytes = encode_header(header)?;
    writer.write_all(&bytes)?;
    Ok(bytes.len() as u64)
}

/// Read a preamble and header record from `reader`.
///
/// Returns the header and the byte offset of the element data relative to the start of the header.
/// On success, `reader` is positioned at the start of the element data.
///
/// # Errors
/// Returns
///  - [`FormatError::FormatMismatch`] if the stream does not start with [`MAGIC`],
///  - [`FormatError::UnsupportedVersion`] if the version is not `(1, 0)`,
///  - [`FormatError::InvalidHeader`] or [`FormatError::InvalidDescriptor`] if the header record is malformed, or
///  - [`FormatError::IOError`] on an IO error.
pub fn read_header<R: Read>(reader: &mut R) -> Result<(ArrayHeader, u64), FormatError> {
    let mut magic = [0; MAGIC.len()];
    read_exact_or(reader, &mut magic, || FormatError::FormatMismatch)?;
    if magic != MAGIC {
        return Err(FormatError::FormatMismatch);
    }

    let truncated = || FormatError::InvalidHeader("header is truncated".to_string());
    let mut version = [0; 2];
    read_exact_or(reader, &mut version, truncated)?;
    let version = FormatVersion::new(version[0], version[1]);
    if version != FormatVersion::V1_0 {
        return Err(FormatError::UnsupportedVersion(version));
    }

    let mut record_length = [0; 2];
    read_exact_or(reader, &mut record_length, truncated)?;
    let record_length = usize::from(u16::from_le_bytes(record_length));
    let mut record = vec![0; record_length];
    read_exact_or(reader, &mut record, truncated)?;
    let record = std::str::from_utf8(&record)
        .map_err(|_| FormatError::InvalidHeader("header record is not valid text".to_string()))?;

    let header = ArrayHeader::from_record(record, version)?;
    Ok((header, (PREAMBLE_LENGTH + record_length) as u64))
}

fn read_exact_or<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    on_eof: impl FnOnce() -> FormatError,
) -> Result<(), FormatError> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            on_eof()
        } else {
            err.into()
        }
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::descriptor::{ByteOrder, ScalarType, StructField, TypeKind};

    fn f8() -> ElementDescriptor {
        ScalarType::new(ByteOrder::Little, TypeKind::Float, 8)
            .unwrap()
            .into()
    }

    #[test]
    fn header_matches_reference_bytes() {
        let header = ArrayHeader::new("<i8".parse().unwrap(), vec![3], LayoutOrder::RowMajor);
        let bytes = encode_header(&header).unwrap();
        let record = "{'descr': '<i8', 'fortran_order': False, 'shape': (3,), }";
        let mut expected = b"\x93NUMPY\x01\x00\x76\x00".to_vec();
        expected.extend_from_slice(record.as_bytes());
        expected.extend_from_slice(&[b' '; 128 - 10 - 57 - 1]);
        expected.push(b'\n');
        assert_eq!(bytes, expected);
        assert_eq!(bytes.len(), 128);
    }

    #[test]
    fn header_round_trip() {
        let descriptors: Vec<ElementDescriptor> = vec![
            f8(),
            "|b1".parse().unwrap(),
            ">c16".parse().unwrap(),
            "<U12".parse().unwrap(),
            "<M8[us]".parse().unwrap(),
            ElementDescriptor::structured(vec![
                StructField::new("time", f8()),
                StructField::new("state", "<f4".parse().unwrap()).with_subshape(vec![3]),
            ])
            .unwrap(),
        ];
        let shapes = [vec![], vec![0], vec![7], vec![2, 3, 4]];
        for descriptor in &descriptors {
            for shape in &shapes {
                for order in [LayoutOrder::RowMajor, LayoutOrder::ColumnMajor] {
                    let header = ArrayHeader::new(descriptor.clone(), shape.clone(), order);
                    let mut stream = Vec::new();
                    let offset = write_header(&mut stream, &header).unwrap();
                    assert_eq!(offset, stream.len() as u64);
                    assert_eq!(offset % HEADER_ALIGNMENT as u64, 0);
                    assert_eq!(stream.last(), Some(&b'\n'));

                    let mut reader = Cursor::new(&stream);
                    let (read, read_offset) = read_header(&mut reader).unwrap();
                    assert_eq!(read, header);
                    assert_eq!(read_offset, offset);
                    assert_eq!(reader.position(), offset);
                }
            }
        }
    }

    #[test]
    fn header_unsupported_version() {
        let header = ArrayHeader::new(f8(), vec![4], LayoutOrder::RowMajor);
        let mut bytes = encode_header(&header).unwrap();
        bytes[6] = 2;
        assert!(matches!(
            read_header(&mut bytes.as_slice()),
            Err(FormatError::UnsupportedVersion(FormatVersion { major: 2, minor: 0 }))
        ));

        let header = header.with_version(FormatVersion::new(2, 0));
        assert!(matches!(
            write_header(&mut Vec::new(), &header),
            Err(FormatError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn header_mapping_unsafe_type() {
        let header = ArrayHeader::new("|O".parse().unwrap(), vec![4], LayoutOrder::RowMajor);
        let mut stream = Vec::new();
        assert!(matches!(
            write_header(&mut stream, &header),
            Err(FormatError::MappingUnsafeType(_))
        ));
        assert!(stream.is_empty());
    }

    #[test]
    fn header_format_mismatch() {
        assert!(matches!(
            read_header(&mut b"PK\x03\x04 not an array".as_slice()),
            Err(FormatError::FormatMismatch)
        ));
        assert!(matches!(
            read_header(&mut b"\x93NUM".as_slice()),
            Err(FormatError::FormatMismatch)
        ));
    }

    fn header_with_record(record: &str) -> Vec<u8> {
        let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
        bytes.extend_from_slice(&u16::try_from(record.len()).unwrap().to_le_bytes());
        bytes.extend_from_slice(record.as_bytes());
        bytes
    }

    #[test]
    fn header_invalid_records() {
        let invalid = [
            "{'descr': '<f8', 'fortran_order': False}",
            "{'descr': '<f8', 'fortran_order': False, 'shape': (3,), 'extra': 1}",
            "{'descr': '<f8', 'fortran_order': 0, 'shape': (3,)}",
            "{'descr': '<f8', 'fortran_order': False, 'shape': [3]}",
            "{'descr': '<f8', 'fortran_order': False, 'shape': (-3,)}",
            "{'descr': '<f8', 'fortran_order': False, 'shape': (3,)} trailing",
            "{'descr': '<f8', 'fortran_order': False, 'shape': (4294967296, 4294967296)}",
            "('descr', '<f8')",
        ];
        for record in invalid {
            assert!(
                matches!(
                    read_header(&mut header_with_record(record).as_slice()),
                    Err(FormatError::InvalidHeader(_))
                ),
                "{record}"
            );
        }
        assert!(matches!(
            read_header(
                &mut header_with_record("{'descr': '<x8', 'fortran_order': False, 'shape': (3,)}")
                    .as_slice()
            ),
            Err(FormatError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn header_truncated() {
        let header = ArrayHeader::new(f8(), vec![4], LayoutOrder::RowMajor);
        let bytes = encode_header(&header).unwrap();
        assert!(matches!(
            read_header(&mut &bytes[..20]),
            Err(FormatError::InvalidHeader(_))
        ));
    }

    #[test]
    fn header_legacy_and_padded_records() {
        // A long integer suffix and the extra padding written by newer writers
        let record = format!(
            "{{'descr': '<f8', 'fortran_order': True, 'shape': (10L, 2L), }}{}\n",
            " ".repeat(60)
        );
        let (header, offset) = read_header(&mut header_with_record(&record).as_slice()).unwrap();
        assert_eq!(header.shape(), &[10, 2]);
        assert_eq!(header.order(), LayoutOrder::ColumnMajor);
        assert_eq!(offset, 10 + record.len() as u64);
    }

    #[test]
    fn header_sizes() {
        let header = ArrayHeader::new(f8(), vec![5, 3, 2], LayoutOrder::RowMajor);
        assert_eq!(header.num_elements(), Some(30));
        assert_eq!(header.data_size(), Some(240));
        assert_eq!(header.outer_stride(), Some(48));
        let header = header.with_shape(vec![]);
        assert_eq!(header.num_elements(), Some(1));
        assert_eq!(header.outer_stride(), Some(8));
    }
}
