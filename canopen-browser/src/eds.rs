//! Object dictionary import from EDS/DCF descriptor files.
//!
//! Descriptors are INI files. Objects live in `[XXXX]` sections (hex index),
//! sub-objects of records and arrays in `[XXXXsubY]` sections (hex subindex).
//! Section and key names are matched case-insensitively.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use canopen_common::datatype::{fixed_size, is_real, is_signed_integer};
use configparser::ini::Ini;
use tracing::{debug, info};

use crate::access::AccessType;
use crate::error::ImportError;
use crate::od::{Bound, CompositeKind, CompositeObject, DeviceInfo, ObjectDictionary, ScalarObject};

const OBJECT_TYPE_DOMAIN: u8 = 0x2;
const OBJECT_TYPE_VAR: u8 = 0x7;
const OBJECT_TYPE_ARRAY: u8 = 0x8;
const OBJECT_TYPE_RECORD: u8 = 0x9;

type Section = HashMap<String, Option<String>>;

/// Service turning a descriptor file into an object dictionary
pub trait OdImporter: Send + Sync {
    fn import(&self, path: &Path) -> Result<ObjectDictionary, ImportError>;
}

/// Importer for `.eds` and `.dcf` files
#[derive(Debug, Default, Clone, Copy)]
pub struct EdsImporter;

impl OdImporter for EdsImporter {
    fn import(&self, path: &Path) -> Result<ObjectDictionary, ImportError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if extension != "eds" && extension != "dcf" {
            return Err(ImportError::UnsupportedFormat(path.display().to_string()));
        }

        let text = fs::read_to_string(path).map_err(|source| ImportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let od = parse_eds(&text)?;
        info!(path = ?path, objects = od.len(), "Imported object dictionary");
        Ok(od)
    }
}

/// Parse descriptor text into an object dictionary
pub fn parse_eds(text: &str) -> Result<ObjectDictionary, ImportError> {
    let sections = Ini::new().read(text.to_string()).map_err(ImportError::Parse)?;

    let mut od = ObjectDictionary::new();
    parse_commissioning(&sections, &mut od)?;
    od.device = DeviceInfo {
        vendor_name: field(&sections, "deviceinfo", "vendorname").map(str::to_string),
        product_name: field(&sections, "deviceinfo", "productname").map(str::to_string),
        file_name: field(&sections, "fileinfo", "filename").map(str::to_string),
    };

    let mut objects: BTreeMap<u16, &Section> = BTreeMap::new();
    let mut members: BTreeMap<u16, BTreeMap<u8, (&str, &Section)>> = BTreeMap::new();
    for (name, section) in &sections {
        match classify_section(name) {
            Some((index, None)) => {
                objects.insert(index, section);
            }
            Some((index, Some(subindex))) => {
                members.entry(index).or_default().insert(subindex, (name.as_str(), section));
            }
            None => {}
        }
    }

    let node_id = od.node_id;
    for (index, section) in objects {
        let section_name = format!("{:04x}", index);
        let object_type = integer_field(section, &section_name, "objecttype", node_id)?
            .map(|value| narrow::<u8>(value, &section_name, "objecttype", section))
            .transpose()?
            .unwrap_or(OBJECT_TYPE_VAR);
        let name = text_field(section, "parametername").unwrap_or_default().to_string();

        match object_type {
            OBJECT_TYPE_ARRAY | OBJECT_TYPE_RECORD => {
                let kind = if object_type == OBJECT_TYPE_ARRAY {
                    CompositeKind::Array
                } else {
                    CompositeKind::Record
                };
                let mut composite = CompositeObject::new(index, name, kind);
                for (subindex, (member_name, member)) in members.remove(&index).unwrap_or_default() {
                    composite.add_member(parse_scalar(member, member_name, index, subindex, node_id)?)?;
                }
                od.add_object(composite)?;
            }
            OBJECT_TYPE_VAR | OBJECT_TYPE_DOMAIN => {
                od.add_object(parse_scalar(section, &section_name, index, 0, node_id)?)?;
            }
            other => {
                return Err(ImportError::InvalidField {
                    section: section_name,
                    key: "objecttype".to_string(),
                    value: format!("0x{:X}", other),
                });
            }
        }
    }

    for index in members.keys() {
        debug!("Ignoring sub-objects of 0x{:04X} without a parent object", index);
    }
    Ok(od)
}

fn parse_commissioning(sections: &HashMap<String, Section>, od: &mut ObjectDictionary) -> Result<(), ImportError> {
    let section_name = if sections.contains_key("devicecomissioning") {
        "devicecomissioning"
    } else {
        "devicecommissioning"
    };
    let Some(section) = sections.get(section_name) else {
        return Ok(());
    };

    if let Some(node_id) = integer_field(section, section_name, "nodeid", None)? {
        match u8::try_from(node_id) {
            Ok(node_id @ 1..=127) => od.node_id = Some(node_id),
            _ => return Err(invalid(section_name, "nodeid", node_id)),
        }
    }
    if let Some(baudrate) = integer_field(section, section_name, "baudrate", None)? {
        od.bitrate_kbps = Some(narrow::<u32>(baudrate, section_name, "baudrate", section)?);
    }
    Ok(())
}

fn parse_scalar(
    section: &Section,
    section_name: &str,
    index: u16,
    subindex: u8,
    node_id: Option<u8>,
) -> Result<ScalarObject, ImportError> {
    let name = text_field(section, "parametername").unwrap_or_default();
    let mut scalar = ScalarObject::new(index, subindex, name)
        .with_access(text_field(section, "accesstype").map(AccessType::parse).unwrap_or_default());

    if let Some(data_type) = integer_field(section, section_name, "datatype", node_id)? {
        scalar.data_type = Some(narrow::<u16>(data_type, section_name, "datatype", section)?);
    }
    scalar.min = bound_field(section, section_name, "lowlimit", scalar.data_type, node_id)?;
    scalar.max = bound_field(section, section_name, "highlimit", scalar.data_type, node_id)?;
    scalar.default = text_field(section, "defaultvalue").map(str::to_string);
    Ok(scalar)
}

/// `1018` → (0x1018, None), `1018sub2` → (0x1018, Some(2)), anything else → None
fn classify_section(name: &str) -> Option<(u16, Option<u8>)> {
    let (index, subindex) = match name.split_once("sub") {
        Some((index, subindex)) => (index, Some(subindex)),
        None => (name, None),
    };
    if index.len() != 4 {
        return None;
    }
    let index = u16::from_str_radix(index, 16).ok()?;
    match subindex {
        None => Some((index, None)),
        Some(subindex) => Some((index, Some(u8::from_str_radix(subindex, 16).ok()?))),
    }
}

fn field<'a>(sections: &'a HashMap<String, Section>, section: &str, key: &str) -> Option<&'a str> {
    sections.get(section).and_then(|section| text_field(section, key))
}

fn text_field<'a>(section: &'a Section, key: &str) -> Option<&'a str> {
    section
        .get(key)
        .and_then(|value| value.as_deref())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn integer_field(
    section: &Section,
    section_name: &str,
    key: &str,
    node_id: Option<u8>,
) -> Result<Option<i128>, ImportError> {
    match text_field(section, key) {
        None => Ok(None),
        Some(raw) => parse_integer(raw, node_id)
            .map(Some)
            .ok_or_else(|| invalid(section_name, key, raw)),
    }
}

fn bound_field(
    section: &Section,
    section_name: &str,
    key: &str,
    data_type: Option<u16>,
    node_id: Option<u8>,
) -> Result<Option<Bound>, ImportError> {
    let Some(raw) = text_field(section, key) else {
        return Ok(None);
    };
    let data_type = data_type.unwrap_or_default();

    let bound = if is_real(data_type) {
        raw.parse::<f64>()
            .ok()
            .or_else(|| parse_integer(raw, node_id).map(|value| value as f64))
            .map(Bound::Real)
    } else if is_signed_integer(data_type) {
        parse_integer(raw, node_id)
            .map(|value| sign_extend_hex(raw, value, data_type))
            .and_then(|value| i64::try_from(value).ok())
            .map(Bound::Signed)
    } else {
        parse_integer(raw, node_id)
            .and_then(|value| u64::try_from(value).ok())
            .map(Bound::Unsigned)
    };
    bound.map(Some).ok_or_else(|| invalid(section_name, key, raw))
}

/// Reads a plain hex literal as the two's complement bit pattern of `data_type`,
/// so `0x8000` is -32768 for INTEGER16
fn sign_extend_hex(raw: &str, value: i128, data_type: u16) -> i128 {
    let raw = raw.trim();
    let is_hex = raw.starts_with("0x") || raw.starts_with("0X");
    match fixed_size(data_type) {
        Some(size) if is_hex && !raw.contains('+') && (1..=8).contains(&size) => {
            let bits = size as u32 * 8;
            if (0..1i128 << bits).contains(&value) {
                let shift = 128 - bits;
                (value << shift) >> shift
            } else {
                value
            }
        }
        _ => value,
    }
}

/// Integer in decimal or `0x` hex, optionally with `$NODEID` terms joined by `+`
pub fn parse_integer(raw: &str, node_id: Option<u8>) -> Option<i128> {
    let mut total: i128 = 0;
    for term in raw.split('+') {
        let term = term.trim();
        if term.eq_ignore_ascii_case("$NODEID") {
            total += i128::from(node_id.unwrap_or(0));
        } else {
            total += parse_number(term)?;
        }
    }
    Some(total)
}

fn parse_number(term: &str) -> Option<i128> {
    let (negative, digits) = match term.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, term),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i128::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i128>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn narrow<T: TryFrom<i128>>(value: i128, section_name: &str, key: &str, section: &Section) -> Result<T, ImportError> {
    T::try_from(value).map_err(|_| {
        let raw = text_field(section, key).unwrap_or_default();
        invalid(section_name, key, raw)
    })
}

fn invalid(section: &str, key: &str, value: impl ToString) -> ImportError {
    ImportError::InvalidField {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    }
}
