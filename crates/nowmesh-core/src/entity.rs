//! Entity descriptors and the REG/DATA payload codecs
//!
//! Nodes describe their local entities (sensors, switches, ...) to
//! the gateway once at attach time, then stream value changes. Both
//! message bodies are fixed-layout and little-endian:
//!
//! ```text
//! REG payload (53 bytes):
//! ┌──────────┬──────────┬────────────┬──────────┬──────────────┐
//! │ Hash (4) │ Kind (1) │ Name (24)  │ Unit (8) │ Class (16)   │
//! │   LE     │          │ NUL-padded │ NUL-pad  │ NUL-padded   │
//! └──────────┴──────────┴────────────┴──────────┴──────────────┘
//!
//! DATA payload:
//! ┌──────────┬──────────────────────────────┐
//! │ Hash (4) │ value encoding (per kind)    │
//! └──────────┴──────────────────────────────┘
//! ```
//!
//! The engine never interprets a DATA value; only the gateway-side
//! sink (or its host) decodes it.

use serde::{Deserialize, Serialize};

/// Wire size of a registration payload
pub const REG_PAYLOAD_LEN: usize = 53;

/// Fixed width of the entity name field
pub const NAME_LEN: usize = 24;

/// Fixed width of the unit-of-measure field
pub const UNIT_LEN: usize = 8;

/// Fixed width of the device-class field
pub const CLASS_LEN: usize = 16;

/// Single-byte entity category codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntityKind {
    BinarySensor = 0x01,
    Switch = 0x02,
    Button = 0x03,
    Event = 0x04,
    Sensor = 0x05,
    TextSensor = 0x06,
    Fan = 0x07,
    Cover = 0x08,
    Climate = 0x09,
    Light = 0x0A,
    Number = 0x0B,
    Select = 0x0F,
    Text = 0x10,
    Lock = 0x11,
    Valve = 0x12,
}

impl EntityKind {
    /// Create from the wire byte, if it names a known category
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(EntityKind::BinarySensor),
            0x02 => Some(EntityKind::Switch),
            0x03 => Some(EntityKind::Button),
            0x04 => Some(EntityKind::Event),
            0x05 => Some(EntityKind::Sensor),
            0x06 => Some(EntityKind::TextSensor),
            0x07 => Some(EntityKind::Fan),
            0x08 => Some(EntityKind::Cover),
            0x09 => Some(EntityKind::Climate),
            0x0A => Some(EntityKind::Light),
            0x0B => Some(EntityKind::Number),
            0x0F => Some(EntityKind::Select),
            0x10 => Some(EntityKind::Text),
            0x11 => Some(EntityKind::Lock),
            0x12 => Some(EntityKind::Valve),
            _ => None,
        }
    }

    /// Get the wire byte value
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }
}

/// Descriptor of one local entity, as registered with the gateway
///
/// The same shape serves both sides of the wire: nodes build
/// descriptors for their inventory, the gateway decodes incoming
/// registrations back into descriptors for its sink. `kind` stays a
/// raw byte so unknown categories survive end-to-end; use
/// [`EntityKind::from_byte`] to interpret it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Opaque 32-bit identifier of the entity on its node
    pub hash: u32,
    /// Category code (see [`EntityKind`])
    pub kind: u8,
    /// Human-readable name (truncated to 24 bytes on the wire)
    pub name: String,
    /// Unit of measure (truncated to 8 bytes)
    pub unit: String,
    /// Device class (truncated to 16 bytes)
    pub device_class: String,
}

impl EntityDescriptor {
    /// Create a descriptor for a known category
    pub fn new(hash: u32, kind: EntityKind, name: &str, unit: &str, device_class: &str) -> Self {
        Self {
            hash,
            kind: kind.as_byte(),
            name: name.to_string(),
            unit: unit.to_string(),
            device_class: device_class.to_string(),
        }
    }

    /// Interpret the category byte, if known
    pub fn entity_kind(&self) -> Option<EntityKind> {
        EntityKind::from_byte(self.kind)
    }
}

/// A sampled entity state, ready for the DATA value encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityValue {
    /// Numeric state, encoded as 4-byte little-endian IEEE-754
    Number(f32),
    /// Boolean state, encoded as a single 0/1 byte
    Bool(bool),
    /// Textual state, encoded as raw UTF-8 bytes
    Text(String),
}

impl EntityValue {
    /// Encode the value portion of a DATA payload
    pub fn encode(&self) -> Vec<u8> {
        match self {
            EntityValue::Number(v) => v.to_le_bytes().to_vec(),
            EntityValue::Bool(v) => vec![u8::from(*v)],
            EntityValue::Text(s) => s.as_bytes().to_vec(),
        }
    }

    /// Decode a numeric value encoding
    pub fn decode_number(bytes: &[u8]) -> Option<f32> {
        let arr: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        Some(f32::from_le_bytes(arr))
    }

    /// Decode a boolean value encoding
    pub fn decode_bool(bytes: &[u8]) -> Option<bool> {
        match bytes.first() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        }
    }
}

fn put_padded(buf: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(buf.len());
    buf[..n].copy_from_slice(&bytes[..n]);
}

fn take_padded(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Serialize a registration payload (53 bytes, fixed layout)
pub fn pack_registration(desc: &EntityDescriptor) -> [u8; REG_PAYLOAD_LEN] {
    let mut bytes = [0u8; REG_PAYLOAD_LEN];
    bytes[0..4].copy_from_slice(&desc.hash.to_le_bytes());
    bytes[4] = desc.kind;
    put_padded(&mut bytes[5..5 + NAME_LEN], &desc.name);
    put_padded(&mut bytes[29..29 + UNIT_LEN], &desc.unit);
    put_padded(&mut bytes[37..37 + CLASS_LEN], &desc.device_class);
    bytes
}

/// Parse a registration payload back into a descriptor
pub fn parse_registration(payload: &[u8]) -> Option<EntityDescriptor> {
    if payload.len() < REG_PAYLOAD_LEN {
        return None;
    }
    Some(EntityDescriptor {
        hash: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
        kind: payload[4],
        name: take_padded(&payload[5..5 + NAME_LEN]),
        unit: take_padded(&payload[29..29 + UNIT_LEN]),
        device_class: take_padded(&payload[37..37 + CLASS_LEN]),
    })
}

/// Serialize a telemetry payload: entity hash plus value encoding
pub fn pack_data(hash: u32, value: &EntityValue) -> Vec<u8> {
    let encoded = value.encode();
    let mut bytes = Vec::with_capacity(4 + encoded.len());
    bytes.extend_from_slice(&hash.to_le_bytes());
    bytes.extend_from_slice(&encoded);
    bytes
}

/// Extract the entity hash from a telemetry payload
pub fn data_entity_hash(payload: &[u8]) -> Option<u32> {
    let arr: [u8; 4] = payload.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_descriptor() -> EntityDescriptor {
        EntityDescriptor::new(0xCAFE1234, EntityKind::Sensor, "Kitchen Temp", "°C", "temperature")
    }

    #[test]
    fn test_entity_kind_roundtrip() {
        for kind in [
            EntityKind::BinarySensor,
            EntityKind::Sensor,
            EntityKind::Switch,
            EntityKind::Valve,
        ] {
            assert_eq!(EntityKind::from_byte(kind.as_byte()), Some(kind));
        }
        assert_eq!(EntityKind::from_byte(0xEE), None);
    }

    #[test]
    fn test_registration_layout() {
        let payload = pack_registration(&sample_descriptor());
        assert_eq!(payload.len(), 53);
        assert_eq!(&payload[0..4], &0xCAFE1234u32.to_le_bytes());
        assert_eq!(payload[4], EntityKind::Sensor.as_byte());
        assert_eq!(&payload[5..17], b"Kitchen Temp");
        assert_eq!(payload[17], 0);
    }

    #[test]
    fn test_registration_roundtrip() {
        let desc = sample_descriptor();
        let parsed = parse_registration(&pack_registration(&desc)).unwrap();
        assert_eq!(parsed, desc);
        assert_eq!(parsed.entity_kind(), Some(EntityKind::Sensor));
    }

    #[test]
    fn test_registration_truncates_long_fields() {
        let desc = EntityDescriptor::new(
            1,
            EntityKind::TextSensor,
            "A name well beyond the twenty-four byte limit",
            "long-unit-name",
            "device class that is too long",
        );
        let parsed = parse_registration(&pack_registration(&desc)).unwrap();
        assert_eq!(parsed.name.len(), NAME_LEN);
        assert_eq!(parsed.unit.len(), UNIT_LEN);
        assert_eq!(parsed.device_class.len(), CLASS_LEN);
        assert!(desc.name.starts_with(&parsed.name));
    }

    #[test]
    fn test_registration_short_payload_rejected() {
        assert!(parse_registration(&[0u8; 52]).is_none());
    }

    #[test]
    fn test_unknown_kind_preserved() {
        let mut payload = pack_registration(&sample_descriptor());
        payload[4] = 0xEE;
        let parsed = parse_registration(&payload).unwrap();
        assert_eq!(parsed.kind, 0xEE);
        assert_eq!(parsed.entity_kind(), None);
        // Re-packing keeps the unknown byte
        assert_eq!(pack_registration(&parsed)[4], 0xEE);
    }

    #[test]
    fn test_data_payload() {
        let payload = pack_data(0xCAFE1234, &EntityValue::Number(21.5));
        assert_eq!(payload.len(), 8);
        assert_eq!(data_entity_hash(&payload), Some(0xCAFE1234));
        assert_eq!(EntityValue::decode_number(&payload[4..]), Some(21.5));

        let payload = pack_data(7, &EntityValue::Bool(true));
        assert_eq!(payload.len(), 5);
        assert_eq!(EntityValue::decode_bool(&payload[4..]), Some(true));

        let payload = pack_data(7, &EntityValue::Text("open".into()));
        assert_eq!(&payload[4..], b"open");
    }

    #[test]
    fn test_data_hash_requires_four_bytes() {
        assert_eq!(data_entity_hash(&[1, 2, 3]), None);
    }
}
