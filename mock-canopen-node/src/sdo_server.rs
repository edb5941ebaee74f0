//! SDO Server implementation for responding to SDO upload and download requests

use socketcan::{CanFrame, EmbeddedFrame};
use tracing::{debug, warn};

use canopen_common::sdo::{
    abort_request, download_response, download_segment_response, expedited_upload_response,
    segmented_upload_response, upload_segment_response,
};
use canopen_common::{
    create_sdo_frame, frame_cob_id, parse_sdo_request, request_cob_id, response_cob_id, SdoPayload,
    SdoServerRequest,
};

use crate::object_dictionary::{ObjectDictionary, ABORT_LENGTH};

/// Client/server command specifier not valid or unknown
const ABORT_COMMAND: u32 = 0x0504_0001;
/// Toggle bit not alternated
const ABORT_TOGGLE: u32 = 0x0503_0000;

const SEGMENT_SIZE: usize = 7;

/// Segmented upload in progress
struct UploadState {
    index: u16,
    subindex: u8,
    data: Vec<u8>,
    offset: usize,
    toggle: bool,
}

/// Segmented download in progress
struct DownloadState {
    index: u16,
    subindex: u8,
    size: Option<usize>,
    data: Vec<u8>,
    toggle: bool,
}

pub struct SdoServer {
    node_id: u8,
    object_dict: ObjectDictionary,
    upload: Option<UploadState>,
    download: Option<DownloadState>,
}

impl SdoServer {
    pub fn new(node_id: u8, object_dict: ObjectDictionary) -> Self {
        Self {
            node_id,
            object_dict,
            upload: None,
            download: None,
        }
    }

    /// Handle an incoming CAN frame
    /// Returns Some(response_frame) if this was an SDO request for us
    pub fn handle_frame(&mut self, frame: &CanFrame) -> Option<CanFrame> {
        if frame_cob_id(frame) != Some(request_cob_id(self.node_id)) {
            return None; // Not for us
        }

        let response = match parse_sdo_request(frame.data()) {
            Ok(request) => self.handle_request(request)?,
            Err(e) => {
                warn!(error = %e, "Malformed SDO request");
                abort_request(0, 0, ABORT_COMMAND)
            }
        };

        match create_sdo_frame(response_cob_id(self.node_id), &response) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(error = %e, "Failed to build SDO response");
                None
            }
        }
    }

    /// Response payload for one client request; None when no answer is due
    pub fn handle_request(&mut self, request: SdoServerRequest) -> Option<SdoPayload> {
        match request {
            SdoServerRequest::InitiateUpload { index, subindex } => {
                debug!("SDO upload request 0x{:04X}:{:02X}", index, subindex);
                self.upload = None;
                Some(self.initiate_upload(index, subindex))
            }
            SdoServerRequest::UploadSegment { toggle } => Some(self.upload_segment(toggle)),
            SdoServerRequest::InitiateDownload {
                index,
                subindex,
                data,
                size,
            } => {
                debug!("SDO download request 0x{:04X}:{:02X}", index, subindex);
                self.download = None;
                Some(self.initiate_download(index, subindex, data, size))
            }
            SdoServerRequest::DownloadSegment { toggle, data, last } => {
                Some(self.download_segment(toggle, data, last))
            }
            SdoServerRequest::Abort { index, subindex, code } => {
                debug!("SDO transfer 0x{:04X}:{:02X} aborted by client (0x{:08X})", index, subindex, code);
                self.upload = None;
                self.download = None;
                None
            }
        }
    }

    fn initiate_upload(&mut self, index: u16, subindex: u8) -> SdoPayload {
        let data = match self.object_dict.read(index, subindex) {
            Ok(data) => data,
            Err(code) => {
                warn!("Upload of 0x{:04X}:{:02X} refused (0x{:08X})", index, subindex, code);
                return abort_request(index, subindex, code);
            }
        };

        if (1..=4).contains(&data.len()) {
            return expedited_upload_response(index, subindex, &data);
        }

        let response = segmented_upload_response(index, subindex, data.len());
        self.upload = Some(UploadState {
            index,
            subindex,
            data,
            offset: 0,
            toggle: false,
        });
        response
    }

    fn upload_segment(&mut self, toggle: bool) -> SdoPayload {
        let Some(mut state) = self.upload.take() else {
            return abort_request(0, 0, ABORT_COMMAND);
        };
        if toggle != state.toggle {
            return abort_request(state.index, state.subindex, ABORT_TOGGLE);
        }

        let end = (state.offset + SEGMENT_SIZE).min(state.data.len());
        let last = end == state.data.len();
        let response = upload_segment_response(toggle, &state.data[state.offset..end], last);

        if !last {
            state.offset = end;
            state.toggle = !toggle;
            self.upload = Some(state);
        }
        response
    }

    fn initiate_download(&mut self, index: u16, subindex: u8, data: Option<Vec<u8>>, size: Option<u32>) -> SdoPayload {
        let result = match data {
            Some(data) => self.object_dict.write(index, subindex, data),
            None => self.object_dict.check_writable(index, subindex).map(|()| {
                self.download = Some(DownloadState {
                    index,
                    subindex,
                    size: size.map(|size| size as usize),
                    data: Vec::new(),
                    toggle: false,
                });
            }),
        };

        match result {
            Ok(()) => download_response(index, subindex),
            Err(code) => {
                warn!("Download to 0x{:04X}:{:02X} refused (0x{:08X})", index, subindex, code);
                abort_request(index, subindex, code)
            }
        }
    }

    fn download_segment(&mut self, toggle: bool, data: Vec<u8>, last: bool) -> SdoPayload {
        let Some(mut state) = self.download.take() else {
            return abort_request(0, 0, ABORT_COMMAND);
        };
        if toggle != state.toggle {
            return abort_request(state.index, state.subindex, ABORT_TOGGLE);
        }

        state.data.extend_from_slice(&data);
        if !last {
            state.toggle = !toggle;
            self.download = Some(state);
            return download_segment_response(toggle);
        }

        if state.size.is_some_and(|size| size != state.data.len()) {
            return abort_request(state.index, state.subindex, ABORT_LENGTH);
        }
        match self.object_dict.write(state.index, state.subindex, state.data) {
            Ok(()) => download_segment_response(toggle),
            Err(code) => abort_request(state.index, state.subindex, code),
        }
    }
}
