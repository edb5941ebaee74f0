//! Object Dictionary for the mock CANopen node
//!
//! Holds the live values the simulated device serves over SDO, either seeded
//! from a descriptor's default values or from a built-in set of test objects.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use canopen_browser::eds::parse_integer;
use canopen_browser::{AccessType, Object, ObjectDictionary as Descriptor, ScalarObject};
use canopen_common::datatype::{fixed_size, symbolic_name};
use rand::Rng;
use tracing::info;

/// Object does not exist in the object dictionary
pub const ABORT_NO_OBJECT: u32 = 0x0602_0000;
/// Attempt to read a write only object
pub const ABORT_WRITE_ONLY: u32 = 0x0601_0001;
/// Attempt to write a read only object
pub const ABORT_READ_ONLY: u32 = 0x0601_0002;
/// Data type does not match, length of service parameter does not match
pub const ABORT_LENGTH: u32 = 0x0607_0010;

const BOOLEAN: u16 = 0x01;
const INTEGER16: u16 = 0x03;
const INTEGER32: u16 = 0x04;
const UNSIGNED8: u16 = 0x05;
const UNSIGNED16: u16 = 0x06;
const UNSIGNED32: u16 = 0x07;
const REAL32: u16 = 0x08;
const VISIBLE_STRING: u16 = 0x09;
const OCTET_STRING: u16 = 0x0A;
const REAL64: u16 = 0x11;

/// Represents a single entry in the object dictionary
pub enum ObjectEntry {
    /// Stored value, written by SDO downloads when the access type allows
    Static {
        data: Vec<u8>,
        data_type: u16,
        access: AccessType,
    },
    /// Read-only value generated on each read
    Dynamic {
        generator: Box<dyn Fn() -> Vec<u8> + Send + Sync>,
        data_type: u16,
    },
}

impl ObjectEntry {
    fn data_type(&self) -> u16 {
        match self {
            ObjectEntry::Static { data_type, .. } | ObjectEntry::Dynamic { data_type, .. } => *data_type,
        }
    }
}

/// Object dictionary mapping (index, subindex) to values
#[derive(Default)]
pub struct ObjectDictionary {
    entries: BTreeMap<(u16, u8), ObjectEntry>,
}

impl ObjectDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the values from a descriptor. Entries without a usable default start out empty.
    pub fn from_descriptor(descriptor: &Descriptor, node_id: u8) -> Self {
        let mut dictionary = Self::new();
        for object in descriptor.iter() {
            match object {
                Object::Scalar(scalar) => dictionary.add_from_descriptor(scalar, node_id),
                Object::Composite(composite) => {
                    for member in composite.sub_objects() {
                        dictionary.add_from_descriptor(member, node_id);
                    }
                }
            }
        }
        dictionary
    }

    fn add_from_descriptor(&mut self, scalar: &ScalarObject, node_id: u8) {
        let data_type = scalar.data_type.unwrap_or(OCTET_STRING);
        let data = scalar
            .default
            .as_deref()
            .and_then(|raw| encode_default(data_type, raw, node_id))
            .unwrap_or_default();
        self.add_static(scalar.index, scalar.subindex, data, data_type, scalar.access_type);
    }

    /// Add a static entry to the dictionary
    pub fn add_static(&mut self, index: u16, subindex: u8, data: Vec<u8>, data_type: u16, access: AccessType) {
        self.entries.insert(
            (index, subindex),
            ObjectEntry::Static {
                data,
                data_type,
                access,
            },
        );
    }

    /// Add a dynamic entry (value generated on each read)
    pub fn add_dynamic<F>(&mut self, index: u16, subindex: u8, generator: F, data_type: u16)
    where
        F: Fn() -> Vec<u8> + Send + Sync + 'static,
    {
        self.entries.insert(
            (index, subindex),
            ObjectEntry::Dynamic {
                generator: Box::new(generator),
                data_type,
            },
        );
    }

    /// Current value, or the abort code to answer with
    pub fn read(&self, index: u16, subindex: u8) -> Result<Vec<u8>, u32> {
        match self.entries.get(&(index, subindex)) {
            None => Err(ABORT_NO_OBJECT),
            Some(ObjectEntry::Static { access: AccessType::WriteOnly, .. }) => Err(ABORT_WRITE_ONLY),
            Some(ObjectEntry::Static { data, .. }) => Ok(data.clone()),
            Some(ObjectEntry::Dynamic { generator, .. }) => Ok(generator()),
        }
    }

    /// Check that an entry accepts writes, before a segmented download starts
    pub fn check_writable(&self, index: u16, subindex: u8) -> Result<(), u32> {
        match self.entries.get(&(index, subindex)) {
            None => Err(ABORT_NO_OBJECT),
            Some(ObjectEntry::Static {
                access: AccessType::ReadWrite | AccessType::WriteOnly,
                ..
            }) => Ok(()),
            Some(_) => Err(ABORT_READ_ONLY),
        }
    }

    /// Store a downloaded value
    pub fn write(&mut self, index: u16, subindex: u8, value: Vec<u8>) -> Result<(), u32> {
        self.check_writable(index, subindex)?;
        let Some(ObjectEntry::Static { data, data_type, .. }) = self.entries.get_mut(&(index, subindex)) else {
            return Err(ABORT_READ_ONLY);
        };
        if fixed_size(*data_type).is_some_and(|size| size != value.len()) {
            return Err(ABORT_LENGTH);
        }
        *data = value;
        Ok(())
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Log a summary of all objects
    pub fn print_summary(&self) {
        for ((index, subindex), entry) in &self.entries {
            let kind = match entry {
                ObjectEntry::Static { access, .. } => format!("Static {}", access),
                ObjectEntry::Dynamic { .. } => "Dynamic ro".to_string(),
            };
            let data_type = symbolic_name(entry.data_type())
                .map(str::to_string)
                .unwrap_or_else(|| format!("0x{:04X}", entry.data_type()));
            info!("  0x{:04X}:{:02X} - {} {}", index, subindex, kind, data_type);
        }
    }

    /// Add standard test objects for demonstration
    pub fn add_test_objects_for_node(&mut self, node_id: u8) {
        use AccessType::{Const, ReadOnly, ReadWrite, WriteOnly};

        // 0x1000:00 - Device Type
        self.add_static(0x1000, 0x00, 0x0000_0191u32.to_le_bytes().to_vec(), UNSIGNED32, ReadOnly);
        // 0x1001:00 - Error Register
        self.add_static(0x1001, 0x00, vec![0x00], UNSIGNED8, ReadOnly);
        // 0x1008:00 - Device Name, longer than 4 bytes so it needs a segmented upload
        self.add_static(0x1008, 0x00, b"MockCANopenNode".to_vec(), VISIBLE_STRING, Const);
        // 0x1017:00 - Producer heartbeat time
        self.add_static(0x1017, 0x00, 1000u16.to_le_bytes().to_vec(), UNSIGNED16, ReadWrite);

        // 0x1018 - Identity
        self.add_static(0x1018, 0x00, vec![4], UNSIGNED8, ReadOnly);
        self.add_static(0x1018, 0x01, 0x0000_0001u32.to_le_bytes().to_vec(), UNSIGNED32, ReadOnly);
        self.add_static(0x1018, 0x02, 0x0000_4D4Bu32.to_le_bytes().to_vec(), UNSIGNED32, ReadOnly);
        self.add_static(0x1018, 0x03, 0x0001_0000u32.to_le_bytes().to_vec(), UNSIGNED32, ReadOnly);
        self.add_static(0x1018, 0x04, (0x1000_0000u32 + node_id as u32).to_le_bytes().to_vec(), UNSIGNED32, ReadOnly);

        // 0x2000:01 - Temperature Sensor (REAL32) - Dynamic
        self.add_dynamic(
            0x2000,
            0x01,
            || {
                let mut rng = rand::rng();
                let temp: f32 = rng.random_range(20.0..30.0);
                temp.to_le_bytes().to_vec()
            },
            REAL32,
        );

        // 0x2001:01 - Counter (UNSIGNED32) - Dynamic (incrementing)
        let counter = Arc::new(AtomicU32::new(0));
        self.add_dynamic(
            0x2001,
            0x01,
            move || counter.fetch_add(1, Ordering::SeqCst).to_le_bytes().to_vec(),
            UNSIGNED32,
        );

        // 0x2002:00 - Setpoint (INTEGER16)
        self.add_static(0x2002, 0x00, 0i16.to_le_bytes().to_vec(), INTEGER16, ReadWrite);
        // 0x2003:00 - Command (UNSIGNED8), write only
        self.add_static(0x2003, 0x00, vec![0], UNSIGNED8, WriteOnly);
        // 0x2004:00 - Label (VISIBLE_STRING)
        self.add_static(0x2004, 0x00, b"unnamed".to_vec(), VISIBLE_STRING, ReadWrite);

        // 0x2005:01 - RPM (INTEGER32) - Dynamic
        self.add_dynamic(
            0x2005,
            0x01,
            || {
                let mut rng = rand::rng();
                let rpm: i32 = rng.random_range(1000..3000);
                rpm.to_le_bytes().to_vec()
            },
            INTEGER32,
        );

        // 0x6000:00 - Read inputs (UNSIGNED32)
        self.add_static(0x6000, 0x00, 0x0000_00A5u32.to_le_bytes().to_vec(), UNSIGNED32, ReadOnly);
        // 0x6200:00 - Write outputs (BOOLEAN)
        self.add_static(0x6200, 0x00, vec![0], BOOLEAN, ReadWrite);
    }
}

/// Bytes for a descriptor default value, little endian
fn encode_default(data_type: u16, raw: &str, node_id: u8) -> Option<Vec<u8>> {
    match data_type {
        VISIBLE_STRING | OCTET_STRING => Some(raw.as_bytes().to_vec()),
        REAL32 => raw.trim().parse::<f32>().ok().map(|v| v.to_le_bytes().to_vec()),
        REAL64 => raw.trim().parse::<f64>().ok().map(|v| v.to_le_bytes().to_vec()),
        _ => {
            let size = fixed_size(data_type)?;
            let value = parse_integer(raw, Some(node_id))?;
            Some(value.to_le_bytes()[..size].to_vec())
        }
    }
}
