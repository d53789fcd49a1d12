//! Realtime packet decoding
//!
//! Frames are zero-padded up to the layout size before decoding. CB2
//! controllers are known to send short records; padding keeps those usable
//! but nothing downstream can tell a padded zero from a real one.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::borrow::Cow;

use crate::layout::{ByteOrder, ElementType, FieldSpec, LayoutFamily, PacketLayout};
use crate::modes::{RobotMode, SafetyMode};
use crate::{Result, URError};

/// Decoded value of one field
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl FieldValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            FieldValue::Scalar(value) => Some(*value),
            FieldValue::Vector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            FieldValue::Scalar(_) => None,
            FieldValue::Vector(values) => Some(values),
        }
    }
}

/// One decoded realtime record, fields in wire order
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    family: LayoutFamily,
    fields: Vec<(&'static str, FieldValue)>,
}

impl DecodedPacket {
    /// Layout family the packet was decoded with
    pub fn family(&self) -> LayoutFamily {
        self.family
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FieldValue::as_scalar)
    }

    pub fn vector(&self, name: &str) -> Option<&[f64]> {
        self.get(name).and_then(FieldValue::as_vector)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (*name, value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Size announced by the controller. Informational only.
    pub fn message_size(&self) -> Option<i32> {
        self.scalar("message_size").map(|v| v as i32)
    }

    /// Controller time since power-on, seconds
    pub fn time(&self) -> Option<f64> {
        self.scalar("time")
    }

    /// Robot mode, absent on CB2 firmware before 1.7
    pub fn robot_mode(&self) -> Option<RobotMode> {
        self.scalar("robot_mode").map(RobotMode::from_wire)
    }

    /// Safety mode, CB3 and later
    pub fn safety_mode(&self) -> Option<SafetyMode> {
        self.scalar("safety_mode").and_then(SafetyMode::from_wire)
    }
}

impl Serialize for DecodedPacket {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Right-pad `raw` with zeros to `size` bytes, or cut it to `size`.
pub fn pad_frame(raw: &[u8], size: usize) -> Cow<'_, [u8]> {
    if raw.len() >= size {
        Cow::Borrowed(&raw[..size])
    } else {
        let mut padded = Vec::with_capacity(size);
        padded.extend_from_slice(raw);
        padded.resize(size, 0);
        Cow::Owned(padded)
    }
}

/// Decode a frame with the given layout.
///
/// Short frames are zero-padded; bytes past the layout size are ignored.
pub fn decode(raw: &[u8], layout: &PacketLayout) -> Result<DecodedPacket> {
    let frame = pad_frame(raw, layout.total_size());
    if frame.len() < layout.total_size() {
        return Err(URError::MalformedPacket(format!(
            "frame of {} bytes is shorter than the {} byte {} layout",
            frame.len(),
            layout.total_size(),
            layout.family().name()
        )));
    }

    let mut fields = Vec::with_capacity(layout.fields().len());
    let mut offset = 0;

    for spec in layout.fields() {
        let end = offset + spec.byte_len();
        let bytes = frame.get(offset..end).ok_or_else(|| {
            let reason = format!("field '{}' runs past the end of the frame", spec.name());
            URError::MalformedPacket(reason)
        })?;

        fields.push((spec.name(), decode_field(spec, bytes)?));
        offset = end;
    }

    Ok(DecodedPacket {
        family: layout.family(),
        fields,
    })
}

fn decode_field(spec: &FieldSpec, bytes: &[u8]) -> Result<FieldValue> {
    let width = spec.element().width();
    let mut values = Vec::with_capacity(spec.element_count());

    for chunk in bytes.chunks_exact(width) {
        let value = match spec.element() {
            ElementType::I32 => read_i32(chunk, spec)? as f64,
            ElementType::F64 => {
                let value = read_f64(chunk, spec)?;
                if !value.is_finite() {
                    return Err(URError::MalformedPacket(format!(
                        "non-finite value {} in field '{}'",
                        value,
                        spec.name()
                    )));
                }
                value
            }
        };
        values.push(value);
    }

    if spec.is_scalar() {
        Ok(FieldValue::Scalar(values[0]))
    } else {
        Ok(FieldValue::Vector(values))
    }
}

fn read_i32(chunk: &[u8], spec: &FieldSpec) -> Result<i32> {
    let bytes: [u8; 4] = chunk.try_into().map_err(|_| misaligned(spec))?;
    Ok(match spec.byte_order() {
        ByteOrder::BigEndian => i32::from_be_bytes(bytes),
        ByteOrder::LittleEndian => i32::from_le_bytes(bytes),
    })
}

fn read_f64(chunk: &[u8], spec: &FieldSpec) -> Result<f64> {
    let bytes: [u8; 8] = chunk.try_into().map_err(|_| misaligned(spec))?;
    Ok(match spec.byte_order() {
        ByteOrder::BigEndian => f64::from_be_bytes(bytes),
        ByteOrder::LittleEndian => f64::from_le_bytes(bytes),
    })
}

fn misaligned(spec: &FieldSpec) -> URError {
    URError::MalformedPacket(format!("misaligned element in field '{}'", spec.name()))
}
