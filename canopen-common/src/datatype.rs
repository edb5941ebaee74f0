//! CANopen data type classification
//!
//! Data type codes are grouped into ranges by CiA 301. Standard codes additionally
//! have a symbolic name that is shown instead of the raw hex code.

use std::fmt;

/// Range a data type code falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataTypeCategory {
    Standard,
    PredefinedComplex,
    Reserved,
    ManufacturerComplex,
    DeviceProfileStandard,
    DeviceProfileComplex,
    MultipleDeviceModules,
    Invalid,
}

impl DataTypeCategory {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Standard => "Standard Data Type",
            Self::PredefinedComplex => "Pre-defined Complex Data Type",
            Self::Reserved => "Reserved",
            Self::ManufacturerComplex => "Manufacturer Complex Data Type",
            Self::DeviceProfileStandard => "Device Profile Standard Data Type",
            Self::DeviceProfileComplex => "Device Profile Complex Data Type",
            Self::MultipleDeviceModules => "Multiple Device Modules Data Type",
            Self::Invalid => "Invalid",
        }
    }
}

impl fmt::Display for DataTypeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Classify a data type code into its category and, for known codes, its symbolic name.
pub fn classify(code: u16) -> (DataTypeCategory, Option<&'static str>) {
    let category = match code {
        0x0001..=0x001F => DataTypeCategory::Standard,
        0x0020..=0x0023 => DataTypeCategory::PredefinedComplex,
        0x0024..=0x003F => DataTypeCategory::Reserved,
        0x0040..=0x005F => DataTypeCategory::ManufacturerComplex,
        0x0060..=0x007F => DataTypeCategory::DeviceProfileStandard,
        0x0080..=0x009F => DataTypeCategory::DeviceProfileComplex,
        0x00A0..=0x025F => DataTypeCategory::MultipleDeviceModules,
        0x0260..=0x0FFF => DataTypeCategory::Reserved,
        _ => DataTypeCategory::Invalid,
    };
    (category, symbolic_name(code))
}

/// Symbolic name of a standard or pre-defined complex data type
pub fn symbolic_name(code: u16) -> Option<&'static str> {
    let name = match code {
        0x01 => "BOOLEAN",
        0x02 => "INTEGER8",
        0x03 => "INTEGER16",
        0x04 => "INTEGER32",
        0x05 => "UNSIGNED8",
        0x06 => "UNSIGNED16",
        0x07 => "UNSIGNED32",
        0x08 => "REAL32",
        0x09 => "VISIBLE_STRING",
        0x0A => "OCTET_STRING",
        0x0B => "UNICODE_STRING",
        0x0C => "TIME_OF_DAY",
        0x0D => "TIME_DIFFERENCE",
        0x0E => "BIT_STRING",
        0x0F => "DOMAIN",
        0x10 => "INTEGER24",
        0x11 => "REAL64",
        0x12 => "INTEGER40",
        0x13 => "INTEGER48",
        0x14 => "INTEGER56",
        0x15 => "INTEGER64",
        0x16 => "UNSIGNED24",
        0x18 => "UNSIGNED40",
        0x19 => "UNSIGNED48",
        0x1A => "UNSIGNED56",
        0x1B => "UNSIGNED64",
        0x20 => "PDO_COMMUNICATION_PARAMETER",
        0x21 => "PDO_MAPPING",
        0x22 => "SDO_PARAMETER",
        0x23 => "IDENTITY",
        _ => return None,
    };
    Some(name)
}

/// Human readable type text, e.g. `UNSIGNED32 - Standard Data Type`.
/// Codes without a symbolic name fall back to `0xXXXX`.
pub fn describe(code: u16) -> String {
    let (category, name) = classify(code);
    match name {
        Some(name) => format!("{} - {}", name, category),
        None => format!("0x{:04X} - {}", code, category),
    }
}

/// Encoded width in bytes of fixed-size standard types
pub fn fixed_size(code: u16) -> Option<usize> {
    match code {
        0x01 | 0x02 | 0x05 => Some(1),
        0x03 | 0x06 => Some(2),
        0x10 | 0x16 => Some(3),
        0x04 | 0x07 | 0x08 => Some(4),
        0x12 | 0x18 => Some(5),
        0x0C | 0x0D | 0x13 | 0x19 => Some(6),
        0x14 | 0x1A => Some(7),
        0x11 | 0x15 | 0x1B => Some(8),
        _ => None,
    }
}

/// Whether values of this type are signed integers
pub fn is_signed_integer(code: u16) -> bool {
    matches!(code, 0x02 | 0x03 | 0x04 | 0x10 | 0x12 | 0x13 | 0x14 | 0x15)
}

/// Whether values of this type are IEEE floats
pub fn is_real(code: u16) -> bool {
    matches!(code, 0x08 | 0x11)
}
