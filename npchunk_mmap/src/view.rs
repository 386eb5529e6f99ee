use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut, MmapOptions};
use npchunk_format::element::{cast_slice, cast_slice_mut};
use npchunk_format::{
    ArrayHeader, Element, ElementDescriptor, FormatError, LayoutOrder, NpyArray, encode_header,
    read_header,
};

use crate::{MapError, MapMode};

enum Mapping {
    /// Zero length windows are not mapped.
    Empty,
    ReadOnly(Mmap),
    Writable(MmapMut),
}

/// A memory-mapped window of the element data of an array file.
///
/// The window spans `length` indices of the outer dimension starting at `element_offset`, or the whole array.
/// The header of the view describes the window: its outer dimension is the window length.
///
/// A [`MapMode::ReadWrite`] view is flushed when dropped.
/// Call [`MappedArrayView::flush`] to observe flush errors.
pub struct MappedArrayView {
    path: PathBuf,
    header: ArrayHeader,
    mode: MapMode,
    element_offset: u64,
    byte_offset: u64,
    num_elements: u64,
    mapping: Mapping,
}

impl std::fmt::Debug for MappedArrayView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedArrayView")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("mode", &self.mode)
            .field("element_offset", &self.element_offset)
            .field("byte_offset", &self.byte_offset)
            .field("num_elements", &self.num_elements)
            .finish_non_exhaustive()
    }
}

impl MappedArrayView {
    /// Create a new array file at `path` and map its element data read-write.
    ///
    /// An existing file at `path` is truncated. The element data is zero initialised.
    ///
    /// # Errors
    /// Returns [`MapError::Format`] with [`FormatError::MappingUnsafeType`] if `descriptor` contains an object reference,
    /// in which case no file is created, or a [`MapError`] if the file cannot be created or mapped.
    pub fn open_for_create<P: AsRef<Path>>(
        path: P,
        descriptor: ElementDescriptor,
        shape: Vec<u64>,
        order: LayoutOrder,
    ) -> Result<Self, MapError> {
        Self::create_with_header(path, ArrayHeader::new(descriptor, shape, order))
    }

    /// Create a new array file at `path` with `header` and map its element data read-write.
    ///
    /// # Errors
    /// See [`MappedArrayView::open_for_create`].
    /// Also returns [`MapError::Format`] with [`FormatError::UnsupportedVersion`] if the header version is not 1.0.
    pub fn create_with_header<P: AsRef<Path>>(
        path: P,
        header: ArrayHeader,
    ) -> Result<Self, MapError> {
        let path = path.as_ref();
        let header_bytes = encode_header(&header)?;
        let too_large = || {
            MapError::InvalidInput(format!(
                "array with shape {:?} is too large",
                header.shape()
            ))
        };
        let num_elements = header.num_elements().ok_or_else(too_large)?;
        let data_size = header.data_size().ok_or_else(too_large)?;
        let data_offset = header_bytes.len() as u64;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&header_bytes)?;
        file.set_len(data_offset + data_size)?;

        let mapping = map(&file, path, MapMode::ReadWrite, data_offset, data_size)?;
        Ok(Self {
            path: path.to_path_buf(),
            header,
            mode: MapMode::ReadWrite,
            element_offset: 0,
            byte_offset: data_offset,
            num_elements,
            mapping,
        })
    }

    /// Map the element data of the existing array file at `path`.
    ///
    /// # Errors
    /// See [`MappedArrayView::open_existing`].
    pub fn open<P: AsRef<Path>>(path: P, mode: MapMode) -> Result<Self, MapError> {
        Self::open_existing(path, mode, 0, None)
    }

    /// Map a window of the element data of the existing array file at `path`.
    ///
    /// The window starts at index `element_offset` of the outer dimension and spans `length` indices,
    /// or the remainder of the outer dimension if `length` is [`None`].
    ///
    /// # Errors
    /// Returns
    ///  - [`MapError::Format`] if the file is not a valid array file or its element type contains object references,
    ///  - [`MapError::Bounds`] if the window exceeds the outer dimension,
    ///  - [`MapError::InvalidInput`] if a window is requested of a zero dimensional array,
    ///    or a partial window is requested of a multidimensional column-major array (it would not be contiguous),
    ///  - [`MapError::FileTooShort`] if the file is truncated, or
    ///  - [`MapError::IOError`] if the file cannot be opened or mapped.
    pub fn open_existing<P: AsRef<Path>>(
        path: P,
        mode: MapMode,
        element_offset: u64,
        length: Option<u64>,
    ) -> Result<Self, MapError> {
        let path = path.as_ref();
        let file = if mode == MapMode::ReadWrite {
            OpenOptions::new().read(true).write(true).open(path)?
        } else {
            File::open(path)?
        };
        let (header, data_offset) = read_header(&mut BufReader::new(&file))?;
        if !header.descriptor().is_mappable() {
            return Err(FormatError::MappingUnsafeType(header.descriptor().clone()).into());
        }
        let header = window_header(header, element_offset, length)?;

        let stride = header
            .outer_stride()
            .ok_or_else(|| MapError::InvalidInput("array element size overflows".to_string()))?;
        let byte_offset = element_offset
            .checked_mul(stride)
            .and_then(|offset| offset.checked_add(data_offset))
            .ok_or_else(|| MapError::InvalidInput("window offset overflows".to_string()))?;
        let num_elements = header
            .num_elements()
            .ok_or_else(|| MapError::InvalidInput("window length overflows".to_string()))?;
        let byte_length = header
            .data_size()
            .ok_or_else(|| MapError::InvalidInput("window length overflows".to_string()))?;
        let expected = byte_offset
            .checked_add(byte_length)
            .ok_or_else(|| MapError::InvalidInput("window length overflows".to_string()))?;
        let got = file.metadata()?.len();
        if got < expected {
            return Err(MapError::FileTooShort { expected, got });
        }

        let mapping = map(&file, path, mode, byte_offset, byte_length)?;
        Ok(Self {
            path: path.to_path_buf(),
            header,
            mode,
            element_offset,
            byte_offset,
            num_elements,
            mapping,
        })
    }

    /// The path of the array file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The header of the window. Its outer dimension is the window length.
    #[must_use]
    pub const fn header(&self) -> &ArrayHeader {
        &self.header
    }

    /// The element descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> &ElementDescriptor {
        self.header.descriptor()
    }

    /// The shape of the window.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        self.header.shape()
    }

    /// The access mode.
    #[must_use]
    pub const fn mode(&self) -> MapMode {
        self.mode
    }

    /// The offset of the window along the outer dimension of the stored array.
    #[must_use]
    pub const fn element_offset(&self) -> u64 {
        self.element_offset
    }

    /// The byte offset of the window in the file.
    #[must_use]
    pub const fn byte_offset(&self) -> u64 {
        self.byte_offset
    }

    /// The number of elements in the window.
    ///
    /// This is the product of the window shape, including for zero sized element types.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.num_elements
    }

    /// Returns true if the window has no elements.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.num_elements == 0
    }

    /// The element data of the window.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match &self.mapping {
            Mapping::Empty => &[],
            Mapping::ReadOnly(mmap) => &mmap[..],
            Mapping::Writable(mmap) => &mmap[..],
        }
    }

    /// The mutable element data of the window.
    ///
    /// # Errors
    /// Returns [`MapError::ReadOnly`] if the view is [`MapMode::ReadOnly`].
    pub fn as_bytes_mut(&mut self) -> Result<&mut [u8], MapError> {
        match &mut self.mapping {
            Mapping::ReadOnly(_) => Err(MapError::ReadOnly),
            Mapping::Empty if self.mode == MapMode::ReadOnly => Err(MapError::ReadOnly),
            Mapping::Empty => Ok(&mut []),
            Mapping::Writable(mmap) => Ok(&mut mmap[..]),
        }
    }

    /// View the elements of the window as a slice of `T`.
    ///
    /// # Errors
    /// Returns [`MapError::Element`] if `T` is incompatible with the element descriptor,
    /// the element data is not in native byte order, or the window is not aligned for `T`.
    pub fn as_slice<T: Element>(&self) -> Result<&[T], MapError> {
        Ok(cast_slice(self.header.descriptor(), self.as_bytes())?)
    }

    /// View the elements of the window as a mutable slice of `T`.
    ///
    /// # Errors
    /// Returns [`MapError::ReadOnly`] if the view is [`MapMode::ReadOnly`], otherwise see [`MappedArrayView::as_slice`].
    pub fn as_slice_mut<T: Element>(&mut self) -> Result<&mut [T], MapError> {
        let descriptor = self.header.descriptor().clone();
        Ok(cast_slice_mut(&descriptor, self.as_bytes_mut()?)?)
    }

    /// Flush outstanding writes of a [`MapMode::ReadWrite`] view to the file.
    ///
    /// This is a no-op for other modes.
    ///
    /// # Errors
    /// Returns [`MapError::IOError`] if the flush fails.
    pub fn flush(&self) -> Result<(), MapError> {
        match &self.mapping {
            Mapping::Writable(mmap) if self.mode == MapMode::ReadWrite => Ok(mmap.flush()?),
            _ => Ok(()),
        }
    }

    /// Copy the window into an owned array.
    ///
    /// # Errors
    /// Returns [`MapError::Format`] if the element data does not match the header.
    pub fn to_array(&self) -> Result<NpyArray, MapError> {
        Ok(NpyArray::new(self.header.clone(), self.as_bytes().to_vec())?)
    }

    #[cfg(feature = "ndarray")]
    /// View the window as an [`ndarray::ArrayViewD`] with the layout order of the array.
    ///
    /// # Errors
    /// See [`MappedArrayView::as_slice`].
    pub fn as_ndarray<T: Element>(&self) -> Result<ndarray::ArrayViewD<'_, T>, MapError> {
        let shape = npchunk_format::ndarray_shape(self.shape(), self.header.order())?;
        let elements = self.as_slice()?;
        ndarray::ArrayViewD::from_shape(shape, elements).map_err(|_| {
            npchunk_format::ElementError::InvalidShape {
                shape: self.shape().to_vec(),
                length: elements.len(),
            }
            .into()
        })
    }

    #[cfg(feature = "ndarray")]
    /// View the window as an [`ndarray::ArrayViewMutD`] with the layout order of the array.
    ///
    /// # Errors
    /// See [`MappedArrayView::as_slice_mut`].
    pub fn as_ndarray_mut<T: Element>(&mut self) -> Result<ndarray::ArrayViewMutD<'_, T>, MapError> {
        let shape = npchunk_format::ndarray_shape(self.header.shape(), self.header.order())?;
        let window_shape = self.header.shape().to_vec();
        let elements = self.as_slice_mut()?;
        let length = elements.len();
        ndarray::ArrayViewMutD::from_shape(shape, elements).map_err(|_| {
            npchunk_format::ElementError::InvalidShape {
                shape: window_shape,
                length,
            }
            .into()
        })
    }
}

impl Drop for MappedArrayView {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            log::warn!(
                "failed to flush mapping of {} at byte offset {}: {err}",
                self.path.display(),
                self.byte_offset
            );
        }
    }
}

/// Restrict `header` to the window of `length` outer indices starting at `element_offset`.
fn window_header(
    header: ArrayHeader,
    element_offset: u64,
    length: Option<u64>,
) -> Result<ArrayHeader, MapError> {
    let Some((&outer, inner)) = header.shape().split_first() else {
        if element_offset != 0 || length.is_some() {
            return Err(MapError::InvalidInput(
                "a zero dimensional array has no outer dimension to offset".to_string(),
            ));
        }
        return Ok(header);
    };

    let length = match length {
        Some(length) => length,
        None => outer.checked_sub(element_offset).ok_or(MapError::Bounds {
            offset: element_offset,
            length: 0,
            outer,
        })?,
    };
    if element_offset.checked_add(length).is_none_or(|end| end > outer) {
        return Err(MapError::Bounds {
            offset: element_offset,
            length,
            outer,
        });
    }
    if length == outer {
        return Ok(header);
    }
    if header.order() == LayoutOrder::ColumnMajor && inner.iter().product::<u64>() > 1 {
        return Err(MapError::InvalidInput(format!(
            "a partial window of a column-major array with shape {:?} is not contiguous",
            header.shape()
        )));
    }

    let mut shape = header.shape().to_vec();
    shape[0] = length;
    Ok(header.with_shape(shape))
}

fn map(
    file: &File,
    path: &Path,
    mode: MapMode,
    byte_offset: u64,
    byte_length: u64,
) -> Result<Mapping, MapError> {
    if byte_length == 0 {
        return Ok(Mapping::Empty);
    }
    let len = usize::try_from(byte_length).map_err(|_| {
        MapError::InvalidInput(format!(
            "window of {byte_length} bytes exceeds the address space"
        ))
    })?;
    let mut options = MmapOptions::new();
    options.offset(byte_offset).len(len);
    // SAFETY: the mapping is only valid while the file is not truncated or resized by another process.
    // Concurrent writers to overlapping windows must be synchronised by the caller.
    let mapping = unsafe {
        match mode {
            MapMode::ReadOnly => Mapping::ReadOnly(options.map(file)?),
            MapMode::ReadWrite => Mapping::Writable(options.map_mut(file)?),
            MapMode::CopyOnWrite => Mapping::Writable(options.map_copy(file)?),
        }
    };
    log::debug!(
        "mapped {len} bytes at byte offset {byte_offset} of {} ({mode})",
        path.display()
    );
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(shape: Vec<u64>, order: LayoutOrder) -> ArrayHeader {
        ArrayHeader::new("<f4".parse().unwrap(), shape, order)
    }

    #[test]
    fn window_header_row_major() {
        let full = header(vec![10, 3], LayoutOrder::RowMajor);
        let window = window_header(full.clone(), 4, Some(2)).unwrap();
        assert_eq!(window.shape(), &[2, 3]);
        let window = window_header(full.clone(), 4, None).unwrap();
        assert_eq!(window.shape(), &[6, 3]);
        let window = window_header(full.clone(), 10, None).unwrap();
        assert_eq!(window.shape(), &[0, 3]);
        assert_eq!(window_header(full.clone(), 0, None).unwrap(), full);
    }

    #[test]
    fn window_header_bounds() {
        let full = header(vec![10], LayoutOrder::RowMajor);
        assert!(matches!(
            window_header(full.clone(), 8, Some(5)),
            Err(MapError::Bounds {
                offset: 8,
                length: 5,
                outer: 10
            })
        ));
        assert!(matches!(
            window_header(full.clone(), 11, None),
            Err(MapError::Bounds { offset: 11, .. })
        ));
        assert!(matches!(
            window_header(full, u64::MAX, Some(2)),
            Err(MapError::Bounds { .. })
        ));
    }

    #[test]
    fn window_header_column_major() {
        let full = header(vec![10, 3], LayoutOrder::ColumnMajor);
        assert!(matches!(
            window_header(full.clone(), 2, Some(3)),
            Err(MapError::InvalidInput(_))
        ));
        assert_eq!(window_header(full.clone(), 0, Some(10)).unwrap(), full);

        let vector = header(vec![10, 1], LayoutOrder::ColumnMajor);
        assert_eq!(
            window_header(vector, 2, Some(3)).unwrap().shape(),
            &[3, 1]
        );
    }

    #[test]
    fn window_header_zero_dimensional() {
        let scalar = header(vec![], LayoutOrder::RowMajor);
        assert_eq!(window_header(scalar.clone(), 0, None).unwrap(), scalar);
        assert!(matches!(
            window_header(scalar.clone(), 1, None),
            Err(MapError::InvalidInput(_))
        ));
        assert!(matches!(
            window_header(scalar, 0, Some(1)),
            Err(MapError::InvalidInput(_))
        ));
    }
}
