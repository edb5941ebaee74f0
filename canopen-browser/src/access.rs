//! Read/write permission derived from an object's declared access type.

use std::fmt;

/// Declared access type of an object dictionary entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessType {
    ReadOnly,
    WriteOnly,
    ReadWrite,
    Const,
    #[default]
    Unset,
}

impl AccessType {
    /// Parse a descriptor access string (`ro`, `wo`, `rw`, `rwr`, `rww`, `const`).
    /// Anything else is `Unset`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "ro" => Self::ReadOnly,
            "wo" => Self::WriteOnly,
            "rw" | "rwr" | "rww" => Self::ReadWrite,
            "const" => Self::Const,
            _ => Self::Unset,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "ro",
            Self::WriteOnly => "wo",
            Self::ReadWrite => "rw",
            Self::Const => "const",
            Self::Unset => "",
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What may be done with an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub can_read: bool,
    pub can_write: bool,
}

impl Capabilities {
    pub const NONE: Self = Self {
        can_read: false,
        can_write: false,
    };

    pub fn new(can_read: bool, can_write: bool) -> Self {
        Self { can_read, can_write }
    }

    /// Keep these capabilities only while `allowed` holds
    pub fn gated_by(self, allowed: bool) -> Self {
        Self {
            can_read: self.can_read && allowed,
            can_write: self.can_write && allowed,
        }
    }
}

/// Capabilities implied by a declared access type
pub fn capabilities(access_type: AccessType) -> Capabilities {
    match access_type {
        AccessType::ReadWrite => Capabilities::new(true, true),
        AccessType::ReadOnly | AccessType::Const => Capabilities::new(true, false),
        AccessType::WriteOnly => Capabilities::new(false, true),
        AccessType::Unset => Capabilities::NONE,
    }
}
