//! Display attributes of the selected object.

use canopen_common::describe;

use crate::od::ResolvedObject;

/// Text shown for an object in the attribute panel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectAttributes {
    pub index: String,
    /// Empty unless the object is a sub-object
    pub subindex: String,
    pub name: String,
    pub data_type: String,
    pub access: String,
    pub limits: String,
}

impl ObjectAttributes {
    pub fn from_resolved(resolved: &ResolvedObject<'_>) -> Self {
        let address = resolved.address();
        let scalar = resolved.scalar();

        Self {
            index: format_index(address.index),
            subindex: address.subindex.map(format_subindex).unwrap_or_default(),
            name: resolved.name().to_string(),
            data_type: resolved.data_type().map(describe).unwrap_or_default(),
            access: resolved.access_type().to_string(),
            limits: scalar
                .map(|scalar| format_limits(scalar.min.map(|v| v.to_string()), scalar.max.map(|v| v.to_string())))
                .unwrap_or_default(),
        }
    }
}

pub fn format_index(index: u16) -> String {
    format!("0x{:04X}", index)
}

pub fn format_subindex(subindex: u8) -> String {
    format!("0x{:02X}", subindex)
}

/// `min ≤ x ≤ max`, leaving out whichever side is absent
pub fn format_limits(min: Option<String>, max: Option<String>) -> String {
    if min.is_none() && max.is_none() {
        return String::new();
    }
    [min, Some("x".to_string()), max]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" \u{2264} ")
}
