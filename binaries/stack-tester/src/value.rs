//! Stack values; `enum StackValue`.

//---------------------------------------------------------------------------------------------------- Import
use galena_tuple::{pack, Element};

use crate::{constants::RESULT_NOT_PRESENT, error::MachineError};

//---------------------------------------------------------------------------------------------------- StackValue
/// The dynamic value carried by a stack slot once it has materialised.
///
/// A tagged sum over the tuple element types plus the fixed
/// `RESULT_NOT_PRESENT` sentinel. Error envelopes are not a separate tag:
/// the pop-time translator packs them into [`StackValue::Bytes`].
#[derive(Debug, Clone, PartialEq)]
pub enum StackValue {
    Int(i64),
    Bytes(Vec<u8>),
    String(String),
    Bool(bool),
    Float(f32),
    Double(f64),
    Uuid([u8; 16]),
    Tuple(Vec<Element>),
    /// The database reported no value at all.
    ResultNotPresent,
}

impl StackValue {
    /// Coerce into a signed integer.
    pub fn into_int(self) -> Result<i64, MachineError> {
        match self {
            Self::Int(i) => Ok(i),
            _ => Err(MachineError::IllegalValueType),
        }
    }

    /// Coerce into the binding's abstract key/value byte type.
    ///
    /// Byte strings pass through; a nested tuple coerces by packing.
    pub fn into_bytes(self) -> Result<Vec<u8>, MachineError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Tuple(elements) => Ok(pack(&elements)),
            _ => Err(MachineError::IllegalValueType),
        }
    }

    /// Coerce into a UTF-8 string.
    pub fn into_string(self) -> Result<String, MachineError> {
        match self {
            Self::String(s) => Ok(s),
            _ => Err(MachineError::IllegalValueType),
        }
    }

    /// The tuple element this value persists as.
    pub fn into_element(self) -> Element {
        match self {
            Self::Int(i) => Element::Int(i),
            Self::Bytes(bytes) => Element::Bytes(bytes),
            Self::String(s) => Element::String(s),
            Self::Bool(b) => Element::Bool(b),
            Self::Float(f) => Element::Float(f),
            Self::Double(f) => Element::Double(f),
            Self::Uuid(uuid) => Element::Uuid(uuid),
            Self::Tuple(elements) => Element::Tuple(elements),
            Self::ResultNotPresent => Element::Bytes(RESULT_NOT_PRESENT.to_vec()),
        }
    }
}

impl From<Element> for StackValue {
    fn from(element: Element) -> Self {
        match element {
            // A bare nil has no value form of its own; it only occurs as a
            // `PUSH` literal and rides along as a singleton tuple.
            Element::Nil => Self::Tuple(vec![Element::Nil]),
            Element::Int(i) => Self::Int(i),
            Element::Bytes(bytes) => Self::Bytes(bytes),
            Element::String(s) => Self::String(s),
            Element::Bool(b) => Self::Bool(b),
            Element::Float(f) => Self::Float(f),
            Element::Double(f) => Self::Double(f),
            Element::Uuid(uuid) => Self::Uuid(uuid),
            Element::Tuple(elements) => Self::Tuple(elements),
        }
    }
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coercions() {
        assert_eq!(StackValue::Int(5).into_int().unwrap(), 5);
        assert!(StackValue::Bytes(vec![]).into_int().is_err());

        assert_eq!(
            StackValue::Bytes(b"k".to_vec()).into_bytes().unwrap(),
            b"k".to_vec()
        );
        // A nested tuple packs into key material.
        assert_eq!(
            StackValue::Tuple(vec![Element::Int(0)]).into_bytes().unwrap(),
            pack(&[Element::Int(0)])
        );
        assert!(StackValue::Int(1).into_bytes().is_err());
        assert!(StackValue::String("s".into()).into_bytes().is_err());
    }

    #[test]
    fn sentinel_persists_as_literal_bytes() {
        assert_eq!(
            StackValue::ResultNotPresent.into_element(),
            Element::Bytes(b"RESULT_NOT_PRESENT".to_vec())
        );
    }
}
