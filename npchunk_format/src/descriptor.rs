//! Element descriptors.
//!
//! An [`ElementDescriptor`] encodes the type of a single array element.
//! It is either a [`ScalarType`] (e.g. `<f8`, a little-endian 64-bit float) or a list of named [`StructField`]s.

use std::collections::HashSet;
use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

use crate::py_literal::{PyLiteralError, PyValue};

/// The byte order of a scalar type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ByteOrder {
    /// Little-endian (`<`).
    #[display("<")]
    Little,
    /// Big-endian (`>`).
    #[display(">")]
    Big,
    /// Byte order is not applicable (`|`), e.g. for single byte types.
    #[display("|")]
    NotApplicable,
}

impl ByteOrder {
    /// The byte order of the host.
    #[must_use]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }

    /// Returns true if data in this byte order can be read without swapping bytes on the host.
    #[must_use]
    pub fn is_native(self) -> bool {
        self == Self::NotApplicable || self == Self::native()
    }

    fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '<' => Some(Self::Little),
            '>' => Some(Self::Big),
            '|' => Some(Self::NotApplicable),
            '=' => Some(Self::native()),
            _ => None,
        }
    }
}

/// The kind of a scalar type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum TypeKind {
    /// A boolean (`b`).
    #[display("bool")]
    Bool,
    /// A signed integer (`i`).
    #[display("int")]
    Int,
    /// An unsigned integer (`u`).
    #[display("uint")]
    UInt,
    /// An IEEE floating point number (`f`).
    #[display("float")]
    Float,
    /// A complex number of two IEEE floating point numbers (`c`).
    #[display("complex")]
    Complex,
    /// A fixed length byte string (`S`).
    #[display("bytes")]
    Bytes,
    /// A fixed length UCS-4 string (`U`).
    #[display("unicode")]
    Unicode,
    /// Raw bytes (`V`).
    #[display("void")]
    Void,
    /// A 64-bit datetime (`M`).
    #[display("datetime64")]
    DateTime,
    /// A 64-bit timedelta (`m`).
    #[display("timedelta64")]
    TimeDelta,
    /// A reference to a language runtime object (`O`).
    ///
    /// Object references cannot be stored in a file or mapped.
    #[display("object")]
    Object,
}

impl TypeKind {
    /// The single character code of the kind.
    #[must_use]
    pub const fn code(self) -> char {
        match self {
            Self::Bool => 'b',
            Self::Int => 'i',
            Self::UInt => 'u',
            Self::Float => 'f',
            Self::Complex => 'c',
            Self::Bytes => 'S',
            Self::Unicode => 'U',
            Self::Void => 'V',
            Self::DateTime => 'M',
            Self::TimeDelta => 'm',
            Self::Object => 'O',
        }
    }

    fn from_code(code: char) -> Option<Self> {
        match code {
            'b' | '?' => Some(Self::Bool),
            'i' => Some(Self::Int),
            'u' => Some(Self::UInt),
            'f' => Some(Self::Float),
            'c' => Some(Self::Complex),
            'S' | 'a' => Some(Self::Bytes),
            'U' => Some(Self::Unicode),
            'V' => Some(Self::Void),
            'M' => Some(Self::DateTime),
            'm' => Some(Self::TimeDelta),
            'O' => Some(Self::Object),
            _ => None,
        }
    }

    /// Return true if `size` bytes is a valid item size for this kind.
    fn is_valid_size(self, size: usize) -> bool {
        match self {
            Self::Bool => size == 1,
            Self::Int | Self::UInt => matches!(size, 1 | 2 | 4 | 8),
            Self::Float => matches!(size, 2 | 4 | 8 | 16),
            Self::Complex => matches!(size, 8 | 16 | 32),
            Self::DateTime | Self::TimeDelta => size == 8,
            Self::Unicode => size % 4 == 0,
            Self::Object => size == size_of::<usize>(),
            Self::Bytes | Self::Void => true,
        }
    }
}

/// An element descriptor error.
#[derive(Clone, Debug, Error)]
pub enum DescriptorError {
    /// An unrecognised scalar type string.
    #[error("unrecognised type string {0:?}")]
    InvalidTypeString(String),
    /// An item size which is not valid for the type kind.
    #[error("invalid item size {size} for {kind} type")]
    InvalidSize {
        /// The type kind.
        kind: TypeKind,
        /// The item size in bytes.
        size: usize,
    },
    /// A field name used more than once in a structured descriptor.
    #[error("duplicate field name {0:?}")]
    DuplicateFieldName(String),
    /// A malformed structured field.
    #[error("invalid structured field {0}")]
    InvalidField(String),
    /// The element size does not fit in memory.
    #[error("element size overflows")]
    SizeOverflow,
    /// A literal syntax error.
    #[error(transparent)]
    Literal(#[from] PyLiteralError),
}

/// A fixed size scalar type, such as `<f8` or `|u1`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScalarType {
    byte_order: ByteOrder,
    kind: TypeKind,
    size: usize,
    unit: Option<String>,
}

impl ScalarType {
    /// Create a new scalar type with an item `size` in bytes.
    ///
    /// # Errors
    /// Returns [`DescriptorError::InvalidSize`] if `size` is not valid for `kind`.
    pub fn new(byte_order: ByteOrder, kind: TypeKind, size: usize) -> Result<Self, DescriptorError> {
        if kind.is_valid_size(size) {
            Ok(Self {
                byte_order,
                kind,
                size,
                unit: None,
            })
        } else {
            Err(DescriptorError::InvalidSize { kind, size })
        }
    }

    /// `size` must be valid for `kind`.
    pub(crate) const fn new_unchecked(byte_order: ByteOrder, kind: TypeKind, size: usize) -> Self {
        Self {
            byte_order,
            kind,
            size,
            unit: None,
        }
    }

    /// Set the time unit of a datetime or timedelta type, e.g. `ns`.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// The byte order.
    #[must_use]
    pub const fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// The kind.
    #[must_use]
    pub const fn kind(&self) -> TypeKind {
        self.kind
    }

    /// The item size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// The time unit of a datetime or timedelta type.
    #[must_use]
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }
}

impl Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = match self.kind {
            TypeKind::Unicode => self.size / 4,
            TypeKind::Object => return write!(f, "{}O", self.byte_order),
            _ => self.size,
        };
        write!(f, "{}{}{count}", self.byte_order, self.kind.code())?;
        if let Some(unit) = &self.unit {
            write!(f, "[{unit}]")?;
        }
        Ok(())
    }
}

impl FromStr for ScalarType {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DescriptorError::InvalidTypeString(s.to_string());
        let mut chars = s.chars().peekable();
        let byte_order = match chars.peek().copied().and_then(ByteOrder::from_symbol) {
            Some(byte_order) => {
                chars.next();
                byte_order
            }
            None => ByteOrder::native(),
        };
        let kind = chars.next().and_then(TypeKind::from_code).ok_or_else(invalid)?;
        let rest: String = chars.collect();
        let (count, unit) = match rest.split_once('[') {
            Some((count, unit)) => {
                let unit = unit.strip_suffix(']').ok_or_else(invalid)?;
                if !matches!(kind, TypeKind::DateTime | TypeKind::TimeDelta) || unit.is_empty() {
                    return Err(invalid());
                }
                (count, Some(unit.to_string()))
            }
            None => (rest.as_str(), None),
        };
        let size = if count.is_empty() {
            match kind {
                TypeKind::Bool => 1,
                TypeKind::Object => size_of::<usize>(),
                TypeKind::DateTime | TypeKind::TimeDelta => 8,
                _ => return Err(invalid()),
            }
        } else {
            let count: usize = count.parse().map_err(|_| invalid())?;
            match kind {
                TypeKind::Unicode => count.checked_mul(4).ok_or(DescriptorError::SizeOverflow)?,
                _ => count,
            }
        };
        let scalar = Self::new(byte_order, kind, size)?;
        Ok(match unit {
            Some(unit) => scalar.with_unit(unit),
            None => scalar,
        })
    }
}

/// A named field of a structured element descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructField {
    name: String,
    descriptor: ElementDescriptor,
    subshape: Vec<u64>,
}

impl StructField {
    /// Create a new field.
    #[must_use]
    pub fn new(name: impl Into<String>, descriptor: ElementDescriptor) -> Self {
        Self {
            name: name.into(),
            descriptor,
            subshape: Vec::new(),
        }
    }

    /// Make the field a fixed shape subarray of its descriptor.
    #[must_use]
    pub fn with_subshape(mut self, subshape: Vec<u64>) -> Self {
        self.subshape = subshape;
        self
    }

    /// The field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> &ElementDescriptor {
        &self.descriptor
    }

    /// The subarray shape, empty for a scalar field.
    #[must_use]
    pub fn subshape(&self) -> &[u64] {
        &self.subshape
    }

    fn checked_size(&self) -> Option<usize> {
        self.subshape.iter().try_fold(self.descriptor.checked_item_size()?, |size, &dim| {
            size.checked_mul(usize::try_from(dim).ok()?)
        })
    }

    fn to_literal(&self) -> PyValue {
        let mut items = vec![
            PyValue::String(self.name.clone()),
            self.descriptor.to_literal(),
        ];
        if !self.subshape.is_empty() {
            items.push(PyValue::Tuple(
                self.subshape
                    .iter()
                    .map(|&dim| PyValue::Integer(i128::from(dim)))
                    .collect(),
            ));
        }
        PyValue::Tuple(items)
    }

    fn from_literal(value: &PyValue) -> Result<Self, DescriptorError> {
        let invalid = || DescriptorError::InvalidField(value.to_string());
        let items = value.as_sequence().ok_or_else(invalid)?;
        let (name, descriptor, subshape) = match items {
            [name, descriptor] => (name, descriptor, None),
            [name, descriptor, subshape] => (name, descriptor, Some(subshape)),
            _ => return Err(invalid()),
        };
        let name = name.as_str().ok_or_else(invalid)?;
        let descriptor = ElementDescriptor::from_literal(descriptor)?;
        let subshape = match subshape {
            None => Vec::new(),
            Some(PyValue::Integer(dim)) => vec![u64::try_from(*dim).map_err(|_| invalid())?],
            Some(subshape) => subshape
                .as_sequence()
                .ok_or_else(invalid)?
                .iter()
                .map(|dim| match dim {
                    PyValue::Integer(dim) => u64::try_from(*dim).ok(),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .ok_or_else(invalid)?,
        };
        Ok(Self::new(name, descriptor).with_subshape(subshape))
    }
}

/// An element descriptor.
///
/// The [`Display`] implementation gives the descriptor as written in the `descr` entry of a header record,
/// without quotes for a scalar type (e.g. `<f8`) and as a list literal for a structured type (e.g. `[('x', '<f8'), ('y', '<i4')]`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ElementDescriptor {
    /// A scalar type.
    Scalar(ScalarType),
    /// A structured type with fields in declared order.
    Structured(Vec<StructField>),
}

impl From<ScalarType> for ElementDescriptor {
    fn from(scalar: ScalarType) -> Self {
        Self::Scalar(scalar)
    }
}

impl ElementDescriptor {
    /// Create a structured descriptor.
    ///
    /// # Errors
    /// Returns [`DescriptorError::DuplicateFieldName`] if a non-empty field name appears more than once
    /// or [`DescriptorError::SizeOverflow`] if the element size overflows.
    pub fn structured(fields: Vec<StructField>) -> Result<Self, DescriptorError> {
        let mut names = HashSet::new();
        // empty names are padding and may repeat
        if let Some(field) = fields
            .iter()
            .find(|field| !field.name.is_empty() && !names.insert(field.name.as_str()))
        {
            return Err(DescriptorError::DuplicateFieldName(field.name.clone()));
        }
        let descriptor = Self::Structured(fields);
        descriptor
            .checked_item_size()
            .ok_or(DescriptorError::SizeOverflow)?;
        Ok(descriptor)
    }

    /// The size of one element in bytes.
    ///
    /// Saturates at [`usize::MAX`] for a structured descriptor assembled without [`ElementDescriptor::structured`] whose size overflows.
    #[must_use]
    pub fn item_size(&self) -> usize {
        self.checked_item_size().unwrap_or(usize::MAX)
    }

    fn checked_item_size(&self) -> Option<usize> {
        match self {
            Self::Scalar(scalar) => Some(scalar.size),
            Self::Structured(fields) => fields
                .iter()
                .try_fold(0usize, |size, field| size.checked_add(field.checked_size()?)),
        }
    }

    /// Returns true if the descriptor contains an object reference anywhere, including nested fields.
    #[must_use]
    pub fn has_object(&self) -> bool {
        match self {
            Self::Scalar(scalar) => scalar.kind == TypeKind::Object,
            Self::Structured(fields) => fields.iter().any(|field| field.descriptor.has_object()),
        }
    }

    /// Returns true if elements of this type can be stored and mapped byte-for-byte.
    #[must_use]
    pub fn is_mappable(&self) -> bool {
        !self.has_object()
    }

    /// Return the scalar type if this is a scalar descriptor.
    #[must_use]
    pub const fn as_scalar(&self) -> Option<&ScalarType> {
        match self {
            Self::Scalar(scalar) => Some(scalar),
            Self::Structured(_) => None,
        }
    }

    /// Return the fields if this is a structured descriptor.
    #[must_use]
    pub fn fields(&self) -> Option<&[StructField]> {
        match self {
            Self::Scalar(_) => None,
            Self::Structured(fields) => Some(fields),
        }
    }

    /// Convert to the literal stored in the `descr` entry of a header record.
    #[must_use]
    pub fn to_literal(&self) -> PyValue {
        match self {
            Self::Scalar(scalar) => PyValue::String(scalar.to_string()),
            Self::Structured(fields) => {
                PyValue::List(fields.iter().map(StructField::to_literal).collect())
            }
        }
    }

    /// Create a descriptor from the literal stored in the `descr` entry of a header record.
    ///
    /// # Errors
    /// Returns a [`DescriptorError`] if `value` is not a valid descriptor.
    pub fn from_literal(value: &PyValue) -> Result<Self, DescriptorError> {
        match value {
            PyValue::String(type_string) => Ok(Self::Scalar(type_string.parse()?)),
            PyValue::List(fields) => Self::structured(
                fields
                    .iter()
                    .map(StructField::from_literal)
                    .collect::<Result<_, _>>()?,
            ),
            _ => Err(DescriptorError::InvalidTypeString(value.to_string())),
        }
    }
}

impl Display for ElementDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(scalar) => scalar.fmt(f),
            Self::Structured(_) => self.to_literal().fmt(f),
        }
    }
}

impl FromStr for ElementDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with('[') {
            Self::from_literal(&PyValue::parse(s)?)
        } else {
            Ok(Self::Scalar(s.parse()?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_type_strings() {
        let f8: ScalarType = "<f8".parse().unwrap();
        assert_eq!(f8.byte_order(), ByteOrder::Little);
        assert_eq!(f8.kind(), TypeKind::Float);
        assert_eq!(f8.size(), 8);
        assert_eq!(f8.to_string(), "<f8");

        let b1: ScalarType = "|b1".parse().unwrap();
        assert_eq!(b1.kind(), TypeKind::Bool);
        assert_eq!(b1.to_string(), "|b1");

        let u5: ScalarType = "<U5".parse().unwrap();
        assert_eq!(u5.size(), 20);
        assert_eq!(u5.to_string(), "<U5");

        let dt: ScalarType = "<M8[ns]".parse().unwrap();
        assert_eq!(dt.kind(), TypeKind::DateTime);
        assert_eq!(dt.unit(), Some("ns"));
        assert_eq!(dt.to_string(), "<M8[ns]");

        let native: ScalarType = "=i4".parse().unwrap();
        assert_eq!(native.byte_order(), ByteOrder::native());

        let object: ScalarType = "|O".parse().unwrap();
        assert_eq!(object.kind(), TypeKind::Object);
        assert_eq!(object.to_string(), "|O");
    }

    #[test]
    fn scalar_type_strings_invalid() {
        assert!("".parse::<ScalarType>().is_err());
        assert!("<x8".parse::<ScalarType>().is_err());
        assert!("<f3".parse::<ScalarType>().is_err());
        assert!("<i".parse::<ScalarType>().is_err());
        assert!("<f8[ns]".parse::<ScalarType>().is_err());
        assert!("<M8[ns".parse::<ScalarType>().is_err());
        assert!(matches!(
            "|b2".parse::<ScalarType>(),
            Err(DescriptorError::InvalidSize {
                kind: TypeKind::Bool,
                size: 2
            })
        ));
    }

    #[test]
    fn structured_descriptor() {
        let descriptor: ElementDescriptor = "[('x', '<f8'), ('y', '<i4', (2, 3))]".parse().unwrap();
        assert_eq!(descriptor.item_size(), 8 + 4 * 6);
        let fields = descriptor.fields().unwrap();
        assert_eq!(fields[0].name(), "x");
        assert_eq!(fields[1].subshape(), &[2, 3]);
        assert_eq!(
            descriptor.to_string(),
            "[('x', '<f8'), ('y', '<i4', (2, 3))]"
        );
        assert!(descriptor.is_mappable());
    }

    #[test]
    fn structured_descriptor_nested_object() {
        let descriptor: ElementDescriptor =
            "[('a', '<f8'), ('b', [('c', '|O'), ('d', '|u1')])]".parse().unwrap();
        assert!(descriptor.has_object());
        assert!(!descriptor.is_mappable());
    }

    #[test]
    fn structured_descriptor_duplicate_names() {
        assert!(matches!(
            "[('x', '<f8'), ('x', '<i4')]".parse::<ElementDescriptor>(),
            Err(DescriptorError::DuplicateFieldName(name)) if name == "x"
        ));
        // padding fields
        let descriptor: ElementDescriptor = "[('', '|V4'), ('a', '<i4'), ('', '|V4')]".parse().unwrap();
        assert_eq!(descriptor.item_size(), 12);
    }

    #[test]
    fn structured_descriptor_overflow() {
        assert!(matches!(
            "[('x', '<f8', (18446744073709551615, 18446744073709551615))]"
                .parse::<ElementDescriptor>(),
            Err(DescriptorError::SizeOverflow)
        ));
    }
}
