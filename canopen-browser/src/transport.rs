//! CAN transport abstraction.
//!
//! The session never talks to a bus driver directly. A [`CanTransport`] opens
//! a handle for one bus and performs raw SDO transfers over it; the handle is
//! exclusively owned by whoever opened it and must be given back through
//! [`CanTransport::disconnect`].

use std::fmt;

use async_trait::async_trait;

use crate::error::TransportError;

/// Bitrates offered for CANopen buses, in kbit/s, fastest first
pub const CANOPEN_BITRATES: [u32; 9] = [1000, 800, 500, 250, 125, 100, 50, 20, 10];

/// Label shown for a bitrate, e.g. `500 kbit/s`
pub fn bitrate_label(kbps: u32) -> String {
    format!("{} kbit/s", kbps)
}

/// Parameters for opening a bus connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings {
    /// Driver kind, e.g. `socketcan` or `virtual`
    pub interface: String,
    /// Driver channel, e.g. `can0`
    pub channel: String,
    /// Bitrate in bit/s
    pub bitrate: u32,
}

impl BusSettings {
    /// Settings from a bitrate given in kbit/s
    pub fn from_kbps(interface: impl Into<String>, channel: impl Into<String>, bitrate_kbps: u32) -> Self {
        Self {
            interface: interface.into(),
            channel: channel.into(),
            bitrate: bitrate_kbps.saturating_mul(1000),
        }
    }
}

impl fmt::Display for BusSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} @ {} kbit/s", self.interface, self.channel, self.bitrate / 1000)
    }
}

/// Raw CAN transport service.
///
/// Implementations enforce their own per-request timeout and report it as
/// [`TransportError::Timeout`]. A lost bus is reported as
/// [`TransportError::LinkDown`].
#[async_trait]
pub trait CanTransport: Send + Sync + 'static {
    type Handle: Send + Sync + 'static;

    async fn connect(&self, settings: &BusSettings) -> Result<Self::Handle, TransportError>;

    async fn disconnect(&self, handle: Self::Handle) -> Result<(), TransportError>;

    async fn sdo_upload(
        &self,
        handle: &Self::Handle,
        node_id: u8,
        index: u16,
        subindex: u8,
    ) -> Result<Vec<u8>, TransportError>;

    async fn sdo_download(
        &self,
        handle: &Self::Handle,
        node_id: u8,
        index: u16,
        subindex: u8,
        data: &[u8],
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitrate_conversion() {
        let settings = BusSettings::from_kbps("socketcan", "can0", 500);
        assert_eq!(settings.bitrate, 500_000);
        assert_eq!(settings.to_string(), "socketcan:can0 @ 500 kbit/s");
    }

    #[test]
    fn test_bitrate_labels() {
        let labels: Vec<String> = CANOPEN_BITRATES.iter().map(|kbps| bitrate_label(*kbps)).collect();
        assert_eq!(labels.first().map(String::as_str), Some("1000 kbit/s"));
        assert_eq!(labels.last().map(String::as_str), Some("10 kbit/s"));
    }
}
