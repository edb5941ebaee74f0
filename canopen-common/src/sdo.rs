// sdo.rs - SDO protocol frames and the client transfer state machine
use socketcan::{CanFrame, StandardId};
use socketcan::EmbeddedFrame as Frame;
use thiserror::Error;

/// COB-ID base for client -> server requests (0x600 + node_id)
pub const SDO_REQUEST_BASE: u16 = 0x600;
/// COB-ID base for server -> client responses (0x580 + node_id)
pub const SDO_RESPONSE_BASE: u16 = 0x580;

/// Payload of every SDO frame
pub type SdoPayload = [u8; 8];

/// Max data bytes carried by one segment
const SEGMENT_SIZE: usize = 7;

/// SDO Command Specifiers (upper three bits of byte 0, pre-shifted)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SdoCommand {
    /// Client: download segment / Server: upload segment response
    Segment = 0x00,
    /// Client: initiate download / Server: download segment response
    InitiateDownload = 0x20,
    /// Client: initiate upload / Server: initiate upload response
    InitiateUpload = 0x40,
    /// Client: upload segment / Server: initiate download response
    UploadSegment = 0x60,
    /// Abort transfer (both directions)
    AbortTransfer = 0x80,
}

impl SdoCommand {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value & 0xE0 {
            0x00 => Some(Self::Segment),
            0x20 => Some(Self::InitiateDownload),
            0x40 => Some(Self::InitiateUpload),
            0x60 => Some(Self::UploadSegment),
            0x80 => Some(Self::AbortTransfer),
            _ => None,
        }
    }
}

/// Errors of the SDO protocol layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("SDO abort 0x{code:08X}: {info}")]
    Abort { code: u32, info: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Response mismatch: expected index=0x{expected_index:04X}, subindex={expected_subindex}, got index=0x{index:04X}, subindex={subindex}")]
    Mismatch {
        expected_index: u16,
        expected_subindex: u8,
        index: u16,
        subindex: u8,
    },
    #[error("Toggle bit not alternated")]
    ToggleMismatch,
    #[error("Transfer size mismatch: indicated {indicated} bytes, received {received}")]
    SizeMismatch { indicated: usize, received: usize },
    #[error("Transfer already complete")]
    AlreadyComplete,
    #[error("Invalid CAN ID 0x{0:03X}")]
    InvalidCanId(u16),
}

impl ProtocolError {
    pub fn abort(code: u32) -> Self {
        Self::Abort {
            code,
            info: get_abort_code_description(code),
        }
    }

    /// Abort code to report to the peer when this error is raised locally
    pub fn local_abort_code(&self) -> u32 {
        match self {
            Self::Abort { code, .. } => *code,
            Self::ToggleMismatch => 0x0503_0000,
            Self::SizeMismatch { .. } => 0x0607_0010,
            Self::InvalidResponse(_) | Self::Mismatch { .. } | Self::AlreadyComplete | Self::InvalidCanId(_) => {
                0x0504_0001
            }
        }
    }
}

pub fn request_cob_id(node_id: u8) -> u16 {
    SDO_REQUEST_BASE + node_id as u16
}

pub fn response_cob_id(node_id: u8) -> u16 {
    SDO_RESPONSE_BASE + node_id as u16
}

/// Wrap an SDO payload into a CAN frame
pub fn create_sdo_frame(cob_id: u16, payload: &SdoPayload) -> Result<CanFrame, ProtocolError> {
    let id = StandardId::new(cob_id).ok_or(ProtocolError::InvalidCanId(cob_id))?;
    CanFrame::new(id, payload).ok_or(ProtocolError::InvalidCanId(cob_id))
}

/// Standard COB-ID of a frame, None for extended frames
pub fn frame_cob_id(frame: &CanFrame) -> Option<u16> {
    match frame.id() {
        socketcan::Id::Standard(std_id) => Some(std_id.as_raw()),
        socketcan::Id::Extended(_) => None,
    }
}

/// Copy raw frame data into a full payload, zero padded
pub fn to_payload(data: &[u8]) -> Result<SdoPayload, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::InvalidResponse("Frame too short".to_string()));
    }
    let mut payload = [0u8; 8];
    let len = data.len().min(8);
    payload[..len].copy_from_slice(&data[..len]);
    Ok(payload)
}

fn with_address(command: u8, index: u16, subindex: u8) -> SdoPayload {
    let mut data = [0u8; 8];
    data[0] = command;
    data[1..3].copy_from_slice(&index.to_le_bytes());
    data[3] = subindex;
    data
}

fn address_of(payload: &SdoPayload) -> (u16, u8) {
    (u16::from_le_bytes([payload[1], payload[2]]), payload[3])
}

fn toggle_bit(toggle: bool) -> u8 {
    if toggle { 0x10 } else { 0x00 }
}

// Client requests

pub fn initiate_upload_request(index: u16, subindex: u8) -> SdoPayload {
    with_address(SdoCommand::InitiateUpload as u8, index, subindex)
}

pub fn upload_segment_request(toggle: bool) -> SdoPayload {
    let mut data = [0u8; 8];
    data[0] = SdoCommand::UploadSegment as u8 | toggle_bit(toggle);
    data
}

/// Initiate download; expedited for 1-4 bytes, size-indicated segmented otherwise
pub fn initiate_download_request(index: u16, subindex: u8, value: &[u8]) -> SdoPayload {
    if is_expedited(value) {
        let n = (4 - value.len()) as u8;
        let mut data = with_address(SdoCommand::InitiateDownload as u8 | (n << 2) | 0x03, index, subindex);
        data[4..4 + value.len()].copy_from_slice(value);
        data
    } else {
        let mut data = with_address(SdoCommand::InitiateDownload as u8 | 0x01, index, subindex);
        data[4..8].copy_from_slice(&(value.len() as u32).to_le_bytes());
        data
    }
}

pub fn download_segment_request(toggle: bool, chunk: &[u8], last: bool) -> SdoPayload {
    segment(SdoCommand::Segment as u8, toggle, chunk, last)
}

pub fn abort_request(index: u16, subindex: u8, code: u32) -> SdoPayload {
    let mut data = with_address(SdoCommand::AbortTransfer as u8, index, subindex);
    data[4..8].copy_from_slice(&code.to_le_bytes());
    data
}

fn is_expedited(value: &[u8]) -> bool {
    (1..=4).contains(&value.len())
}

fn segment(command: u8, toggle: bool, chunk: &[u8], last: bool) -> SdoPayload {
    let mut data = [0u8; 8];
    let n = (SEGMENT_SIZE - chunk.len()) as u8;
    data[0] = command | toggle_bit(toggle) | (n << 1) | u8::from(last);
    data[1..1 + chunk.len()].copy_from_slice(chunk);
    data
}

// Server responses

pub fn expedited_upload_response(index: u16, subindex: u8, value: &[u8]) -> SdoPayload {
    let n = (4 - value.len().min(4)) as u8;
    let mut data = with_address(SdoCommand::InitiateUpload as u8 | (n << 2) | 0x03, index, subindex);
    let len = value.len().min(4);
    data[4..4 + len].copy_from_slice(&value[..len]);
    data
}

pub fn segmented_upload_response(index: u16, subindex: u8, size: usize) -> SdoPayload {
    let mut data = with_address(SdoCommand::InitiateUpload as u8 | 0x01, index, subindex);
    data[4..8].copy_from_slice(&(size as u32).to_le_bytes());
    data
}

pub fn upload_segment_response(toggle: bool, chunk: &[u8], last: bool) -> SdoPayload {
    segment(0x00, toggle, chunk, last)
}

pub fn download_response(index: u16, subindex: u8) -> SdoPayload {
    with_address(SdoCommand::UploadSegment as u8, index, subindex)
}

pub fn download_segment_response(toggle: bool) -> SdoPayload {
    let mut data = [0u8; 8];
    data[0] = SdoCommand::InitiateDownload as u8 | toggle_bit(toggle);
    data
}

/// A client request as seen by an SDO server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdoServerRequest {
    InitiateUpload { index: u16, subindex: u8 },
    UploadSegment { toggle: bool },
    /// `data` is present for expedited downloads, `size` for size-indicated segmented ones
    InitiateDownload { index: u16, subindex: u8, data: Option<Vec<u8>>, size: Option<u32> },
    DownloadSegment { toggle: bool, data: Vec<u8>, last: bool },
    Abort { index: u16, subindex: u8, code: u32 },
}

/// Parse a client request frame (server side)
pub fn parse_sdo_request(data: &[u8]) -> Result<SdoServerRequest, ProtocolError> {
    let payload = to_payload(data)?;
    let command = payload[0];
    let (index, subindex) = address_of(&payload);
    let toggle = command & 0x10 != 0;

    match SdoCommand::from_byte(command) {
        Some(SdoCommand::InitiateUpload) => Ok(SdoServerRequest::InitiateUpload { index, subindex }),
        Some(SdoCommand::UploadSegment) => Ok(SdoServerRequest::UploadSegment { toggle }),
        Some(SdoCommand::InitiateDownload) => {
            let expedited = command & 0x02 != 0;
            let size_indicated = command & 0x01 != 0;
            if expedited {
                let n = if size_indicated { ((command >> 2) & 0x03) as usize } else { 0 };
                Ok(SdoServerRequest::InitiateDownload {
                    index,
                    subindex,
                    data: Some(payload[4..8 - n].to_vec()),
                    size: None,
                })
            } else {
                let size = size_indicated
                    .then(|| u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]));
                Ok(SdoServerRequest::InitiateDownload { index, subindex, data: None, size })
            }
        }
        Some(SdoCommand::Segment) => {
            let n = ((command >> 1) & 0x07) as usize;
            Ok(SdoServerRequest::DownloadSegment {
                toggle,
                data: payload[1..8 - n].to_vec(),
                last: command & 0x01 != 0,
            })
        }
        Some(SdoCommand::AbortTransfer) => Ok(SdoServerRequest::Abort {
            index,
            subindex,
            code: u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]),
        }),
        None => Err(ProtocolError::InvalidResponse(format!(
            "Unknown client command specifier (command=0x{:02X})",
            command
        ))),
    }
}

/// Next step of a client transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferProgress {
    /// Send this payload to the server and wait for its response
    Send(SdoPayload),
    /// Transfer finished; uploaded bytes (empty for downloads)
    Complete(Vec<u8>),
}

#[derive(Debug)]
enum ClientState {
    UploadInitiated,
    UploadSegments {
        toggle: bool,
        indicated: Option<usize>,
        buffer: Vec<u8>,
    },
    DownloadInitiated {
        data: Vec<u8>,
    },
    DownloadSegments {
        toggle: bool,
        data: Vec<u8>,
        offset: usize,
    },
    Done,
}

/// One client side SDO transfer (upload or download), driven by server responses.
///
/// The transfer is pure: it never touches the bus. The caller sends the payload
/// returned by the constructor, then feeds every response into [`on_response`]
/// until it yields [`TransferProgress::Complete`] or an error.
///
/// [`on_response`]: SdoClientTransfer::on_response
#[derive(Debug)]
pub struct SdoClientTransfer {
    index: u16,
    subindex: u8,
    state: ClientState,
}

impl SdoClientTransfer {
    pub fn upload(index: u16, subindex: u8) -> (Self, SdoPayload) {
        let transfer = Self {
            index,
            subindex,
            state: ClientState::UploadInitiated,
        };
        (transfer, initiate_upload_request(index, subindex))
    }

    pub fn download(index: u16, subindex: u8, data: Vec<u8>) -> (Self, SdoPayload) {
        let request = initiate_download_request(index, subindex, &data);
        let transfer = Self {
            index,
            subindex,
            state: ClientState::DownloadInitiated { data },
        };
        (transfer, request)
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn subindex(&self) -> u8 {
        self.subindex
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, ClientState::Done)
    }

    /// Abort payload to send when the transfer is given up because of `error`
    pub fn abort_payload(&self, error: &ProtocolError) -> SdoPayload {
        abort_request(self.index, self.subindex, error.local_abort_code())
    }

    /// Feed one server response into the transfer
    pub fn on_response(&mut self, data: &[u8]) -> Result<TransferProgress, ProtocolError> {
        let payload = to_payload(data)?;
        let command = payload[0];

        if SdoCommand::from_byte(command) == Some(SdoCommand::AbortTransfer) {
            self.state = ClientState::Done;
            let code = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
            return Err(ProtocolError::abort(code));
        }

        let result = match std::mem::replace(&mut self.state, ClientState::Done) {
            ClientState::UploadInitiated => self.on_initiate_upload(&payload),
            ClientState::UploadSegments { toggle, indicated, buffer } => {
                self.on_upload_segment(&payload, toggle, indicated, buffer)
            }
            ClientState::DownloadInitiated { data } => self.on_initiate_download(&payload, data),
            ClientState::DownloadSegments { toggle, data, offset } => {
                self.on_download_segment(&payload, toggle, data, offset)
            }
            ClientState::Done => Err(ProtocolError::AlreadyComplete),
        };

        if result.is_err() {
            self.state = ClientState::Done;
        }
        result
    }

    fn check_address(&self, payload: &SdoPayload) -> Result<(), ProtocolError> {
        let (index, subindex) = address_of(payload);
        if index != self.index || subindex != self.subindex {
            return Err(ProtocolError::Mismatch {
                expected_index: self.index,
                expected_subindex: self.subindex,
                index,
                subindex,
            });
        }
        Ok(())
    }

    fn expect_command(payload: &SdoPayload, expected: SdoCommand) -> Result<(), ProtocolError> {
        if SdoCommand::from_byte(payload[0]) != Some(expected) {
            return Err(ProtocolError::InvalidResponse(format!(
                "Unexpected server command specifier (command=0x{:02X})",
                payload[0]
            )));
        }
        Ok(())
    }

    fn on_initiate_upload(&mut self, payload: &SdoPayload) -> Result<TransferProgress, ProtocolError> {
        Self::expect_command(payload, SdoCommand::InitiateUpload)?;
        self.check_address(payload)?;

        let command = payload[0];
        let expedited = command & 0x02 != 0;
        let size_indicated = command & 0x01 != 0;

        if expedited {
            // Number of bytes in 4..8 that do NOT contain data
            let n = if size_indicated { ((command & 0x0C) >> 2) as usize } else { 0 };
            return Ok(TransferProgress::Complete(payload[4..8 - n].to_vec()));
        }

        let indicated = size_indicated
            .then(|| u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]) as usize);
        self.state = ClientState::UploadSegments {
            toggle: false,
            indicated,
            buffer: Vec::with_capacity(indicated.unwrap_or(0)),
        };
        Ok(TransferProgress::Send(upload_segment_request(false)))
    }

    fn on_upload_segment(
        &mut self,
        payload: &SdoPayload,
        toggle: bool,
        indicated: Option<usize>,
        mut buffer: Vec<u8>,
    ) -> Result<TransferProgress, ProtocolError> {
        Self::expect_command(payload, SdoCommand::Segment)?;

        let command = payload[0];
        if (command & 0x10 != 0) != toggle {
            return Err(ProtocolError::ToggleMismatch);
        }

        let n = ((command >> 1) & 0x07) as usize;
        buffer.extend_from_slice(&payload[1..8 - n]);

        if command & 0x01 == 0 {
            self.state = ClientState::UploadSegments {
                toggle: !toggle,
                indicated,
                buffer,
            };
            return Ok(TransferProgress::Send(upload_segment_request(!toggle)));
        }

        if let Some(indicated) = indicated {
            if indicated != buffer.len() {
                return Err(ProtocolError::SizeMismatch {
                    indicated,
                    received: buffer.len(),
                });
            }
        }
        Ok(TransferProgress::Complete(buffer))
    }

    fn on_initiate_download(&mut self, payload: &SdoPayload, data: Vec<u8>) -> Result<TransferProgress, ProtocolError> {
        Self::expect_command(payload, SdoCommand::UploadSegment)?;
        self.check_address(payload)?;

        if is_expedited(&data) {
            return Ok(TransferProgress::Complete(Vec::new()));
        }
        Ok(self.next_download_segment(false, data, 0))
    }

    fn on_download_segment(
        &mut self,
        payload: &SdoPayload,
        toggle: bool,
        data: Vec<u8>,
        offset: usize,
    ) -> Result<TransferProgress, ProtocolError> {
        Self::expect_command(payload, SdoCommand::InitiateDownload)?;
        if (payload[0] & 0x10 != 0) != toggle {
            return Err(ProtocolError::ToggleMismatch);
        }

        if offset >= data.len() {
            return Ok(TransferProgress::Complete(Vec::new()));
        }
        Ok(self.next_download_segment(!toggle, data, offset))
    }

    fn next_download_segment(&mut self, toggle: bool, data: Vec<u8>, offset: usize) -> TransferProgress {
        let end = (offset + SEGMENT_SIZE).min(data.len());
        let last = end >= data.len();
        let request = download_segment_request(toggle, &data[offset..end], last);
        self.state = ClientState::DownloadSegments { toggle, data, offset: end };
        TransferProgress::Send(request)
    }
}

/// Get human-readable description of SDO abort codes
pub fn get_abort_code_description(code: u32) -> String {
    match code {
        0x05030000 => "Toggle bit not alternated".to_string(),
        0x05040000 => "SDO protocol timed out".to_string(),
        0x05040001 => "Client/server command specifier not valid or unknown".to_string(),
        0x05040002 => "Invalid block size".to_string(),
        0x05040003 => "Invalid sequence number".to_string(),
        0x05040004 => "CRC error".to_string(),
        0x05040005 => "Out of memory".to_string(),
        0x06010000 => "Unsupported access to an object".to_string(),
        0x06010001 => "Attempt to read a write only object".to_string(),
        0x06010002 => "Attempt to write a read only object".to_string(),
        0x06020000 => "Object does not exist in the object dictionary".to_string(),
        0x06040041 => "Object cannot be mapped to the PDO".to_string(),
        0x06040042 => "The number and length of the objects to be mapped would exceed PDO length".to_string(),
        0x06040043 => "General parameter incompatibility reason".to_string(),
        0x06040047 => "General internal incompatibility in the device".to_string(),
        0x06060000 => "Access failed due to a hardware error".to_string(),
        0x06070010 => "Data type does not match, length of service parameter does not match".to_string(),
        0x06070012 => "Data type does not match, length of service parameter too high".to_string(),
        0x06070013 => "Data type does not match, length of service parameter too low".to_string(),
        0x06090011 => "Sub-index does not exist".to_string(),
        0x06090030 => "Value range of parameter exceeded (only for write access)".to_string(),
        0x06090031 => "Value of parameter written too high".to_string(),
        0x06090032 => "Value of parameter written too low".to_string(),
        0x06090036 => "Maximum value is less than minimum value".to_string(),
        0x060A0023 => "Resource not available: SDO connection".to_string(),
        0x08000000 => "General error".to_string(),
        0x08000020 => "Data cannot be transferred or stored to the application".to_string(),
        0x08000021 => "Data cannot be transferred or stored to the application because of local control".to_string(),
        0x08000022 => "Data cannot be transferred or stored to the application because of the present device state".to_string(),
        0x08000023 => "Object dictionary dynamic generation fails or no object dictionary is present".to_string(),
        0x08000024 => "No data available".to_string(),
        _ => format!("Unknown abort code: 0x{:08X}", code),
    }
}
