//! Rust element types of array data.
//!
//! An [`Element`] is a plain old data type whose in-memory representation matches a scalar [`ElementDescriptor`] in native byte order.
//! Element bytes in native byte order can be viewed in place with [`cast_slice`] and [`cast_slice_mut`].
//! [`decode_elements`] copies element bytes of either byte order into a [`Vec`].

use crate::descriptor::{ByteOrder, ElementDescriptor, ScalarType, TypeKind};

/// An element error.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ElementError {
    /// Incompatible element type for the element descriptor.
    #[error("incompatible element type {element} for element descriptor {descriptor}")]
    IncompatibleElementType {
        /// The element descriptor.
        descriptor: ElementDescriptor,
        /// The name of the element type.
        element: &'static str,
    },
    /// The element data is not in native byte order and cannot be viewed in place.
    #[error("element data with byte order {0} cannot be viewed in place")]
    NonNativeByteOrder(ByteOrder),
    /// The element data is not aligned for the element type.
    #[error("element data is not aligned to {0} bytes")]
    Misaligned(usize),
    /// The element data is not a whole number of elements.
    #[error("element data of {length} bytes is not a multiple of the element size {element_size}")]
    InvalidLength {
        /// The length of the element data in bytes.
        length: usize,
        /// The element size in bytes.
        element_size: usize,
    },
    /// The number of elements does not match the shape.
    #[error("{length} elements do not match shape {shape:?}")]
    InvalidShape {
        /// The shape.
        shape: Vec<u64>,
        /// The number of elements.
        length: usize,
    },
}

/// A trait for Rust element types of array data.
pub trait Element: bytemuck::Pod {
    /// The name of the element type.
    const NAME: &'static str;

    /// The type kinds with the same representation as this type.
    ///
    /// The first kind is used by [`Element::descriptor`].
    const KINDS: &'static [TypeKind];

    /// The number of byte swapped components of an element.
    const COMPONENTS: usize = 1;

    /// The element descriptor of this type in native byte order.
    #[must_use]
    fn descriptor() -> ElementDescriptor {
        let size = size_of::<Self>();
        let byte_order = if size == 1 {
            ByteOrder::NotApplicable
        } else {
            ByteOrder::native()
        };
        ScalarType::new_unchecked(byte_order, Self::KINDS[0], size).into()
    }

    /// Validate that `descriptor` is compatible with this type, returning the byte order of the descriptor.
    ///
    /// # Errors
    /// Returns [`ElementError::IncompatibleElementType`] if the descriptor is structured or differs in kind or size.
    fn validate_descriptor(descriptor: &ElementDescriptor) -> Result<ByteOrder, ElementError> {
        match descriptor.as_scalar() {
            Some(scalar)
                if Self::KINDS.contains(&scalar.kind()) && scalar.size() == size_of::<Self>() =>
            {
                Ok(scalar.byte_order())
            }
            _ => Err(ElementError::IncompatibleElementType {
                descriptor: descriptor.clone(),
                element: Self::NAME,
            }),
        }
    }
}

macro_rules! impl_element {
    ($type:ty, $name:literal, [$($kind:ident),+]) => {
        impl_element!($type, $name, [$($kind),+], 1);
    };
    ($type:ty, $name:literal, [$($kind:ident),+], $components:literal) => {
        impl Element for $type {
            const NAME: &'static str = $name;
            const KINDS: &'static [TypeKind] = &[$(TypeKind::$kind),+];
            const COMPONENTS: usize = $components;
        }
    };
}

impl_element!(i8, "i8", [Int]);
impl_element!(i16, "i16", [Int]);
impl_element!(i32, "i32", [Int]);
impl_element!(i64, "i64", [Int, DateTime, TimeDelta]);
impl_element!(u8, "u8", [UInt, Bool]);
impl_element!(u16, "u16", [UInt]);
impl_element!(u32, "u32", [UInt]);
impl_element!(u64, "u64", [UInt]);
impl_element!(half::f16, "f16", [Float]);
impl_element!(f32, "f32", [Float]);
impl_element!(f64, "f64", [Float]);
impl_element!(num::complex::Complex32, "Complex32", [Complex], 2);
impl_element!(num::complex::Complex64, "Complex64", [Complex], 2);

/// The size of each byte swapped component of `T`.
const fn component_size<T: Element>() -> usize {
    size_of::<T>() / T::COMPONENTS
}

fn check_in_place<T: Element>(descriptor: &ElementDescriptor) -> Result<(), ElementError> {
    let byte_order = T::validate_descriptor(descriptor)?;
    // single byte components read the same in either byte order
    if byte_order.is_native() || component_size::<T>() == 1 {
        Ok(())
    } else {
        Err(ElementError::NonNativeByteOrder(byte_order))
    }
}

fn map_cast_error<T>(err: bytemuck::PodCastError, length: usize) -> ElementError {
    match err {
        bytemuck::PodCastError::TargetAlignmentGreaterAndInputNotAligned => {
            ElementError::Misaligned(align_of::<T>())
        }
        _ => ElementError::InvalidLength {
            length,
            element_size: size_of::<T>(),
        },
    }
}

/// View element bytes described by `descriptor` as a slice of `T`.
///
/// # Errors
/// Returns an [`ElementError`] if
///  - `T` is incompatible with `descriptor`,
///  - the bytes are not in native byte order,
///  - the bytes are not aligned for `T`, or
///  - the bytes are not a whole number of elements.
pub fn cast_slice<'a, T: Element>(
    descriptor: &ElementDescriptor,
    bytes: &'a [u8],
) -> Result<&'a [T], ElementError> {
    check_in_place::<T>(descriptor)?;
    bytemuck::try_cast_slice(bytes).map_err(|err| map_cast_error::<T>(err, bytes.len()))
}

/// View element bytes described by `descriptor` as a mutable slice of `T`.
///
/// # Errors
/// See [`cast_slice`].
pub fn cast_slice_mut<'a, T: Element>(
    descriptor: &ElementDescriptor,
    bytes: &'a mut [u8],
) -> Result<&'a mut [T], ElementError> {
    check_in_place::<T>(descriptor)?;
    let length = bytes.len();
    bytemuck::try_cast_slice_mut(bytes).map_err(|err| map_cast_error::<T>(err, length))
}

/// Copy element bytes described by `descriptor` into a [`Vec`] of `T` in native byte order.
///
/// The bytes need not be aligned.
///
/// # Errors
/// Returns an [`ElementError`] if `T` is incompatible with `descriptor` or the bytes are not a whole number of elements.
pub fn decode_elements<T: Element>(
    descriptor: &ElementDescriptor,
    bytes: &[u8],
) -> Result<Vec<T>, ElementError> {
    let byte_order = T::validate_descriptor(descriptor)?;
    if bytes.len() % size_of::<T>() != 0 {
        return Err(ElementError::InvalidLength {
            length: bytes.len(),
            element_size: size_of::<T>(),
        });
    }
    let mut elements: Vec<T> = bytemuck::pod_collect_to_vec(bytes);
    if !byte_order.is_native() && component_size::<T>() > 1 {
        bytemuck::cast_slice_mut::<T, u8>(&mut elements)
            .chunks_exact_mut(component_size::<T>())
            .for_each(<[u8]>::reverse);
    }
    Ok(elements)
}

/// Convert elements to bytes in native byte order.
#[must_use]
pub fn encode_elements<T: Element>(elements: &[T]) -> Vec<u8> {
    bytemuck::cast_slice(elements).to_vec()
}
