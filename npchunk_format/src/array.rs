use std::io::{Read, Write};

use crate::FormatError;
use crate::element::{Element, ElementError, decode_elements, encode_elements};
use crate::header::{ArrayHeader, LayoutOrder, read_header, write_header};

/// An array header and its element data, held in memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NpyArray {
    header: ArrayHeader,
    bytes: Vec<u8>,
}

impl NpyArray {
    /// Create a new array from a header and element data laid out in the header order.
    ///
    /// # Errors
    /// Returns [`FormatError::MappingUnsafeType`] if the element type contains object references
    /// or [`FormatError::DataLength`] if the length of `bytes` does not match the header.
    pub fn new(header: ArrayHeader, bytes: Vec<u8>) -> Result<Self, FormatError> {
        let expected = checked_data_size(&header)?;
        if bytes.len() as u64 != expected {
            return Err(FormatError::DataLength {
                expected,
                got: bytes.len() as u64,
            });
        }
        Ok(Self { header, bytes })
    }

    /// Create a new array from elements laid out in `order`.
    ///
    /// # Errors
    /// Returns [`FormatError::Element`] if the number of elements does not match `shape`.
    pub fn from_elements<T: Element>(
        shape: Vec<u64>,
        order: LayoutOrder,
        elements: &[T],
    ) -> Result<Self, FormatError> {
        let header = ArrayHeader::new(T::descriptor(), shape, order);
        if header.num_elements() != Some(elements.len() as u64) {
            return Err(ElementError::InvalidShape {
                shape: header.shape().to_vec(),
                length: elements.len(),
            }
            .into());
        }
        Ok(Self {
            header,
            bytes: encode_elements(elements),
        })
    }

    /// Read a header and its element data from `reader`.
    ///
    /// Bytes after the element data are not consumed.
    ///
    /// # Errors
    /// Returns a [`FormatError`] if the header is invalid (see [`read_header`]),
    /// the element type contains object references, or the element data is truncated.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self, FormatError> {
        let (header, _) = read_header(reader)?;
        let expected = checked_data_size(&header)?;
        let mut bytes = Vec::new();
        reader.by_ref().take(expected).read_to_end(&mut bytes)?;
        Self::new(header, bytes)
    }

    /// Write the header and element data to `writer`.
    ///
    /// # Errors
    /// Returns a [`FormatError`] if the header cannot be encoded or on an IO error.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), FormatError> {
        write_header(writer, &self.header)?;
        writer.write_all(&self.bytes)?;
        Ok(())
    }

    /// The header.
    #[must_use]
    pub const fn header(&self) -> &ArrayHeader {
        &self.header
    }

    /// The element data.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decompose into the header and element data.
    #[must_use]
    pub fn into_parts(self) -> (ArrayHeader, Vec<u8>) {
        (self.header, self.bytes)
    }

    /// Copy the elements into a [`Vec`] in the layout order of the header, converting to native byte order.
    ///
    /// # Errors
    /// Returns [`FormatError::Element`] if `T` is incompatible with the element descriptor.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, FormatError> {
        Ok(decode_elements(self.header.descriptor(), &self.bytes)?)
    }

    #[cfg(feature = "ndarray")]
    /// Copy the elements into an [`ndarray::ArrayD`] with the layout order of the header.
    ///
    /// # Errors
    /// Returns [`FormatError::Element`] if `T` is incompatible with the element descriptor or the shape does not fit in memory.
    pub fn to_ndarray<T: Element>(&self) -> Result<ndarray::ArrayD<T>, FormatError> {
        Ok(elements_to_ndarray(
            self.header.shape(),
            self.header.order(),
            self.to_vec()?,
        )?)
    }
}

fn checked_data_size(header: &ArrayHeader) -> Result<u64, FormatError> {
    if !header.descriptor().is_mappable() {
        return Err(FormatError::MappingUnsafeType(header.descriptor().clone()));
    }
    header.data_size().ok_or_else(|| {
        FormatError::InvalidHeader(format!("array with shape {:?} overflows", header.shape()))
    })
}

#[cfg(feature = "ndarray")]
/// Convert `shape` and `order` to an [`ndarray`] shape.
///
/// # Errors
/// Returns [`ElementError::InvalidShape`] if a dimension does not fit in [`usize`].
pub fn ndarray_shape(
    shape: &[u64],
    order: LayoutOrder,
) -> Result<ndarray::Shape<ndarray::IxDyn>, ElementError> {
    use ndarray::ShapeBuilder;
    let dims = shape
        .iter()
        .map(|&dim| usize::try_from(dim).ok())
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| ElementError::InvalidShape {
            shape: shape.to_vec(),
            length: 0,
        })?;
    Ok(ndarray::IxDyn(&dims).set_f(order == LayoutOrder::ColumnMajor))
}

#[cfg(feature = "ndarray")]
/// Convert a vector of elements laid out in `order` to an [`ndarray::ArrayD`].
///
/// # Errors
/// Returns [`ElementError::InvalidShape`] if the number of elements does not match `shape`.
pub fn elements_to_ndarray<T>(
    shape: &[u64],
    order: LayoutOrder,
    elements: Vec<T>,
) -> Result<ndarray::ArrayD<T>, ElementError> {
    let length = elements.len();
    ndarray::ArrayD::from_shape_vec(ndarray_shape(shape, order)?, elements).map_err(|_| {
        ElementError::InvalidShape {
            shape: shape.to_vec(),
            length,
        }
    })
}
