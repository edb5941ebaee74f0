//! # CANopen Common Library
//!
//! Shared CANopen protocol implementation used by both the object dictionary
//! browser and the mock CANopen node for testing.
//!
//! This library provides:
//! - SDO (Service Data Object) frame encoding/decoding and the client transfer state machine
//! - Data type classification (categories and standard type names)
//! - Typed decoding of raw SDO payloads

pub mod datatype;
pub mod sdo;
pub mod value;

// Re-export commonly used types for convenience
pub use datatype::{classify, describe, DataTypeCategory};
pub use sdo::{
    create_sdo_frame, frame_cob_id, get_abort_code_description, parse_sdo_request,
    request_cob_id, response_cob_id, ProtocolError, SdoClientTransfer, SdoCommand, SdoPayload,
    SdoServerRequest, TransferProgress,
};
pub use value::SdoValue;
