//! Object Dictionary address model
//!
//! The dictionary is a two-level namespace: a 16-bit index selects an object,
//! and composite objects (records and arrays) hold sub-objects keyed by an 8-bit
//! subindex. Only scalars carry a value that can be read or written.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::access::AccessType;
use crate::error::{AddressError, AddressParseError, ImportError};

/// An (index, subindex) pair used to look up an object.
/// `subindex` is only meaningful for composite objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub index: u16,
    pub subindex: Option<u8>,
}

impl Address {
    pub fn new(index: u16, subindex: Option<u8>) -> Self {
        Self { index, subindex }
    }

    /// Address of a top-level object
    pub fn object(index: u16) -> Self {
        Self { index, subindex: None }
    }

    /// Address of a sub-object
    pub fn sub(index: u16, subindex: u8) -> Self {
        Self {
            index,
            subindex: Some(subindex),
        }
    }

    /// Subindex sent on the bus; top-level scalars live at subindex 0
    pub fn wire_subindex(&self) -> u8 {
        self.subindex.unwrap_or(0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subindex {
            Some(subindex) => write!(f, "0x{:04X}:{:02X}", self.index, subindex),
            None => write!(f, "0x{:04X}", self.index),
        }
    }
}

/// Parses `0x1018`, `1018:1` or `0x1018:0x01`; both parts are hex
impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddressParseError(s.to_string());
        let (index, subindex) = match s.trim().split_once(':') {
            Some((index, subindex)) => (index, Some(subindex)),
            None => (s.trim(), None),
        };

        let index = u16::from_str_radix(strip_hex_prefix(index), 16).map_err(|_| invalid())?;
        let subindex = subindex
            .map(|subindex| u8::from_str_radix(strip_hex_prefix(subindex), 16))
            .transpose()
            .map_err(|_| invalid())?;
        Ok(Self { index, subindex })
    }
}

fn strip_hex_prefix(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// Lower or upper limit of a value, typed by the object's data type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Unsigned(u64),
    Signed(i64),
    Real(f64),
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsigned(v) => write!(f, "{}", v),
            Self::Signed(v) => write!(f, "{}", v),
            Self::Real(v) => write!(f, "{}", v),
        }
    }
}

/// A single value entry: a top-level variable or a member of a composite
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScalarObject {
    /// For sub-objects this is the owning object's index
    pub index: u16,
    pub subindex: u8,
    pub name: String,
    pub data_type: Option<u16>,
    pub access_type: AccessType,
    pub min: Option<Bound>,
    pub max: Option<Bound>,
    pub default: Option<String>,
}

impl ScalarObject {
    pub fn new(index: u16, subindex: u8, name: impl Into<String>) -> Self {
        Self {
            index,
            subindex,
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_data_type(mut self, data_type: u16) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn with_access(mut self, access_type: AccessType) -> Self {
        self.access_type = access_type;
        self
    }

    pub fn with_limits(mut self, min: Option<Bound>, max: Option<Bound>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeKind {
    Record,
    Array,
}

/// A record or array; the value lives in its sub-objects
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeObject {
    pub index: u16,
    pub name: String,
    pub kind: CompositeKind,
    /// BTreeMap keeps sub-objects sorted by subindex
    members: BTreeMap<u8, ScalarObject>,
}

impl CompositeObject {
    pub fn new(index: u16, name: impl Into<String>, kind: CompositeKind) -> Self {
        Self {
            index,
            name: name.into(),
            kind,
            members: BTreeMap::new(),
        }
    }

    /// Add a sub-object; its index is set to this object's index
    pub fn add_member(&mut self, mut member: ScalarObject) -> Result<(), ImportError> {
        if self.members.contains_key(&member.subindex) {
            return Err(ImportError::DuplicateSubindex {
                index: self.index,
                subindex: member.subindex,
            });
        }
        member.index = self.index;
        self.members.insert(member.subindex, member);
        Ok(())
    }

    pub fn with_member(mut self, member: ScalarObject) -> Result<Self, ImportError> {
        self.add_member(member)?;
        Ok(self)
    }

    pub fn get(&self, subindex: u8) -> Option<&ScalarObject> {
        self.members.get(&subindex)
    }

    pub fn subindices(&self) -> impl Iterator<Item = u8> + '_ {
        self.members.keys().copied()
    }

    pub fn sub_objects(&self) -> impl Iterator<Item = &ScalarObject> {
        self.members.values()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// One object dictionary entry
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Scalar(ScalarObject),
    Composite(CompositeObject),
}

impl Object {
    pub fn index(&self) -> u16 {
        match self {
            Self::Scalar(object) => object.index,
            Self::Composite(object) => object.index,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Scalar(object) => &object.name,
            Self::Composite(object) => &object.name,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarObject> {
        match self {
            Self::Scalar(object) => Some(object),
            Self::Composite(_) => None,
        }
    }

    pub fn as_composite(&self) -> Option<&CompositeObject> {
        match self {
            Self::Composite(object) => Some(object),
            Self::Scalar(_) => None,
        }
    }
}

impl From<ScalarObject> for Object {
    fn from(object: ScalarObject) -> Self {
        Self::Scalar(object)
    }
}

impl From<CompositeObject> for Object {
    fn from(object: CompositeObject) -> Self {
        Self::Composite(object)
    }
}

/// Identification data carried by the descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor_name: Option<String>,
    pub product_name: Option<String>,
    pub file_name: Option<String>,
}

/// Ordered mapping from index to object, plus the descriptor's commissioning data
#[derive(Debug, Clone, Default)]
pub struct ObjectDictionary {
    objects: Vec<Object>,
    positions: HashMap<u16, usize>,
    /// Node id the descriptor is fixed to, if any
    pub node_id: Option<u8>,
    /// Nominal bitrate in kbit/s
    pub bitrate_kbps: Option<u32>,
    pub device: DeviceInfo,
}

impl ObjectDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an object; indices must be unique
    pub fn add_object(&mut self, object: impl Into<Object>) -> Result<(), ImportError> {
        let object = object.into();
        let index = object.index();
        if self.positions.contains_key(&index) {
            return Err(ImportError::DuplicateIndex(index));
        }
        self.positions.insert(index, self.objects.len());
        self.objects.push(object);
        Ok(())
    }

    pub fn get(&self, index: u16) -> Option<&Object> {
        self.positions.get(&index).map(|position| &self.objects[*position])
    }

    /// Objects in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Object> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn resolve(&self, address: Address) -> Result<ResolvedObject<'_>, AddressError> {
        resolve(self, address.index, address.subindex)
    }
}

/// Resolve an (index, subindex) pair to an object or sub-object
pub fn resolve(od: &ObjectDictionary, index: u16, subindex: Option<u8>) -> Result<ResolvedObject<'_>, AddressError> {
    let object = od.get(index).ok_or(AddressError::UnknownIndex(index))?;

    let Some(subindex) = subindex else {
        return Ok(ResolvedObject::Object(object));
    };

    match object {
        Object::Scalar(_) => Err(AddressError::NotComposite(index)),
        Object::Composite(parent) if parent.is_empty() => Err(AddressError::NotComposite(index)),
        Object::Composite(parent) => parent
            .get(subindex)
            .map(|member| ResolvedObject::SubObject { parent, member })
            .ok_or(AddressError::UnknownSubindex { index, subindex }),
    }
}

/// Result of resolving an address.
///
/// Whether the target is a sub-object follows from the variant alone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedObject<'a> {
    Object(&'a Object),
    SubObject {
        parent: &'a CompositeObject,
        member: &'a ScalarObject,
    },
}

impl<'a> ResolvedObject<'a> {
    pub fn address(&self) -> Address {
        match *self {
            Self::Object(object) => Address::object(object.index()),
            Self::SubObject { parent, member } => Address::sub(parent.index, member.subindex),
        }
    }

    pub fn index(&self) -> u16 {
        self.address().index
    }

    pub fn name(&self) -> &'a str {
        match *self {
            Self::Object(object) => object.name(),
            Self::SubObject { member, .. } => &member.name,
        }
    }

    pub fn is_sub_object(&self) -> bool {
        matches!(self, Self::SubObject { .. })
    }

    /// Owning object of a sub-object
    pub fn parent(&self) -> Option<&'a CompositeObject> {
        match *self {
            Self::SubObject { parent, .. } => Some(parent),
            Self::Object(_) => None,
        }
    }

    /// The entry holding a value, None for composites
    pub fn scalar(&self) -> Option<&'a ScalarObject> {
        match *self {
            Self::Object(object) => object.as_scalar(),
            Self::SubObject { member, .. } => Some(member),
        }
    }

    pub fn data_type(&self) -> Option<u16> {
        self.scalar().and_then(|scalar| scalar.data_type)
    }

    /// Composites have no value of their own and report `Unset`
    pub fn access_type(&self) -> AccessType {
        self.scalar()
            .map(|scalar| scalar.access_type)
            .unwrap_or(AccessType::Unset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!("0x1018".parse::<Address>().unwrap(), Address::object(0x1018));
        assert_eq!("1018:1".parse::<Address>().unwrap(), Address::sub(0x1018, 1));
        assert_eq!("0x6000:0x0A".parse::<Address>().unwrap(), Address::sub(0x6000, 0x0A));
        assert!("0x1018:".parse::<Address>().is_err());
        assert!("identity".parse::<Address>().is_err());
        assert!("0x10180".parse::<Address>().is_err());
    }

    fn identity() -> CompositeObject {
        let mut identity = CompositeObject::new(0x1018, "Identity", CompositeKind::Record);
        for (subindex, name) in [(1, "Vendor-ID"), (2, "Product code"), (3, "Revision number"), (4, "Serial number")] {
            identity
                .add_member(
                    ScalarObject::new(0, subindex, name)
                        .with_data_type(0x07)
                        .with_access(AccessType::ReadOnly),
                )
                .unwrap();
        }
        identity
    }

    fn sample_od() -> ObjectDictionary {
        let mut od = ObjectDictionary::new();
        od.add_object(ScalarObject::new(0x6000, 0, "Read inputs").with_data_type(0x07))
            .unwrap();
        od.add_object(identity()).unwrap();
        od.add_object(ScalarObject::new(0x1000, 0, "Device type")).unwrap();
        od
    }

    #[test]
    fn test_insertion_order_preserved() {
        let od = sample_od();
        let indices: Vec<u16> = od.iter().map(Object::index).collect();
        assert_eq!(indices, vec![0x6000, 0x1018, 0x1000]);
        assert_eq!(od.len(), 3);
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let mut od = sample_od();
        let err = od.add_object(ScalarObject::new(0x1000, 0, "Again")).unwrap_err();
        assert!(matches!(err, ImportError::DuplicateIndex(0x1000)));
    }

    #[test]
    fn test_duplicate_subindex_rejected() {
        let err = identity().add_member(ScalarObject::new(0, 2, "Twice")).unwrap_err();
        assert!(matches!(err, ImportError::DuplicateSubindex { index: 0x1018, subindex: 2 }));
    }

    #[test]
    fn test_resolve_top_level() {
        let od = sample_od();
        let resolved = resolve(&od, 0x6000, None).unwrap();
        assert!(!resolved.is_sub_object());
        assert_eq!(resolved.name(), "Read inputs");
        assert_eq!(resolved.data_type(), Some(0x07));
        assert_eq!(resolved.address(), Address::object(0x6000));
    }

    #[test]
    fn test_resolve_sub_object() {
        let od = sample_od();
        let resolved = resolve(&od, 0x1018, Some(2)).unwrap();
        assert!(resolved.is_sub_object());
        assert_eq!(resolved.name(), "Product code");
        assert_eq!(resolved.parent().map(|parent| parent.index), Some(0x1018));
        assert_eq!(resolved.scalar().map(|member| member.index), Some(0x1018));
        assert_eq!(resolved.address(), Address::sub(0x1018, 2));
    }

    #[test]
    fn test_resolve_composite_has_no_value() {
        let od = sample_od();
        let resolved = resolve(&od, 0x1018, None).unwrap();
        assert!(!resolved.is_sub_object());
        assert!(resolved.scalar().is_none());
        assert_eq!(resolved.access_type(), AccessType::Unset);
    }

    #[test]
    fn test_resolve_errors() {
        let od = sample_od();
        assert_eq!(resolve(&od, 0x2000, None).unwrap_err(), AddressError::UnknownIndex(0x2000));
        assert_eq!(resolve(&od, 0x2000, Some(1)).unwrap_err(), AddressError::UnknownIndex(0x2000));
        assert_eq!(
            resolve(&od, 0x1018, Some(5)).unwrap_err(),
            AddressError::UnknownSubindex { index: 0x1018, subindex: 5 }
        );
        assert_eq!(resolve(&od, 0x6000, Some(0)).unwrap_err(), AddressError::NotComposite(0x6000));
    }

    #[test]
    fn test_empty_composite_has_no_sub_objects() {
        let mut od = sample_od();
        od.add_object(CompositeObject::new(0x1600, "RPDO mapping", CompositeKind::Record))
            .unwrap();

        assert!(resolve(&od, 0x1600, None).is_ok());
        assert_eq!(resolve(&od, 0x1600, Some(0)).unwrap_err(), AddressError::NotComposite(0x1600));
        assert_eq!(resolve(&od, 0x1600, Some(1)).unwrap_err(), AddressError::NotComposite(0x1600));
        assert_eq!(
            resolve(&od, 0x1018, Some(7)).unwrap_err(),
            AddressError::UnknownSubindex { index: 0x1018, subindex: 7 }
        );
    }

    #[test]
    fn test_composite_members_sorted() {
        let mut record = CompositeObject::new(0x2000, "Sensors", CompositeKind::Array);
        record.add_member(ScalarObject::new(0, 2, "b")).unwrap();
        record.add_member(ScalarObject::new(0, 0, "count")).unwrap();
        record.add_member(ScalarObject::new(0, 1, "a")).unwrap();
        assert_eq!(record.subindices().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_address_display() {
        assert_eq!(Address::object(0x1000).to_string(), "0x1000");
        assert_eq!(Address::sub(0x1018, 1).to_string(), "0x1018:01");
        assert_eq!(Address::object(0x1000).wire_subindex(), 0);
        assert_eq!(Address::sub(0x1018, 4).wire_subindex(), 4);
    }
}
