//! # CANopen Browser
//!
//! Session and addressing core for inspecting the object dictionary of a
//! CANopen device over SDO.
//!
//! - [`od`]: the object dictionary as a two-level (index, subindex) namespace
//! - [`access`]: read/write capabilities from declared access types
//! - [`session`]: the single node binding and its connection lifecycle
//! - [`gateway`]: SDO upload/download against the open connection
//! - [`eds`]: EDS/DCF import
//! - [`bus`]: SocketCAN transport

pub mod access;
pub mod attributes;
pub mod browser;
pub mod bus;
pub mod config;
pub mod eds;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod od;
pub mod session;
pub mod transport;

pub use access::{capabilities, AccessType, Capabilities};
pub use attributes::{format_index, format_subindex, ObjectAttributes};
pub use browser::Browser;
pub use bus::{available_interfaces, BusHandle, SocketCanTransport};
pub use config::BrowserConfig;
pub use eds::{parse_eds, EdsImporter, OdImporter};
pub use error::{AddressError, AddressParseError, ConnectError, DisconnectError, ImportError, InvalidNodeId, SdoError, TransportError};
pub use gateway::SdoGateway;
pub use logging::{init_tracing, EventLog, LogEvent};
pub use od::{
    resolve, Address, Bound, CompositeKind, CompositeObject, DeviceInfo, Object, ObjectDictionary,
    ResolvedObject, ScalarObject,
};
pub use session::{resolved_node_id, validate_node_id, ConnectionState, NodeSession};
pub use transport::{BusSettings, CanTransport, CANOPEN_BITRATES};

pub use canopen_common::{classify, describe, DataTypeCategory, SdoValue};
