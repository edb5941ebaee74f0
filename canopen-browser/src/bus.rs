// bus.rs - SocketCAN implementation of the CAN transport
use socketcan::{CanSocket, Socket, CanFrame, EmbeddedFrame};
use std::io;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use canopen_common::{
    create_sdo_frame, frame_cob_id, request_cob_id, response_cob_id, ProtocolError,
    SdoClientTransfer, SdoPayload, TransferProgress,
};
use canopen_common::sdo::abort_request;

use crate::error::TransportError;
use crate::transport::{BusSettings, CanTransport};

/// Default time a device gets to answer one SDO frame
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

/// Abort code sent to the device when it stops answering
const ABORT_TIMED_OUT: u32 = 0x0504_0000;

type TransferResult = Result<Vec<u8>, TransportError>;

/// Internal message types for the connection manager
#[derive(Debug)]
enum ConnectionMessage {
    Transfer {
        node_id: u8,
        transfer: SdoClientTransfer,
        request: SdoPayload,
        response_tx: oneshot::Sender<TransferResult>,
    },
    Shutdown {
        response_tx: oneshot::Sender<()>,
    },
}

/// The transfer currently waiting for a device response
struct ActiveTransfer {
    node_id: u8,
    transfer: SdoClientTransfer,
    response_tx: oneshot::Sender<TransferResult>,
    deadline: Instant,
}

impl ActiveTransfer {
    fn finish(self, result: TransferResult) {
        // The requester may have given up; nothing to report to then
        let _ = self.response_tx.send(result);
    }
}

/// Open connection to one SocketCAN channel
#[derive(Debug)]
pub struct BusHandle {
    channel: String,
    command_tx: mpsc::UnboundedSender<ConnectionMessage>,
    manager: JoinHandle<()>,
}

impl BusHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    async fn submit(&self, node_id: u8, transfer: SdoClientTransfer, request: SdoPayload) -> TransferResult {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(ConnectionMessage::Transfer {
                node_id,
                transfer,
                request,
                response_tx,
            })
            .map_err(|_| TransportError::LinkDown("Connection manager died".to_string()))?;

        response_rx
            .await
            .map_err(|_| TransportError::LinkDown("Failed to get response".to_string()))?
    }
}

/// CAN transport over Linux SocketCAN
#[derive(Debug, Clone)]
pub struct SocketCanTransport {
    request_timeout: Duration,
}

impl SocketCanTransport {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for SocketCanTransport {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

#[async_trait]
impl CanTransport for SocketCanTransport {
    type Handle = BusHandle;

    async fn connect(&self, settings: &BusSettings) -> Result<BusHandle, TransportError> {
        match settings.interface.as_str() {
            "socketcan" | "virtual" => {}
            other => return Err(TransportError::Unsupported(other.to_string())),
        }

        let socket = CanSocket::open(&settings.channel)
            .map_err(|e| TransportError::Socket(e.to_string()))?;

        // Set non-blocking mode for the socket
        socket.set_nonblocking(true)
            .map_err(|e| TransportError::Socket(e.to_string()))?;

        // SocketCAN bitrates are set on the host interface (ip link set ... bitrate)
        info!(
            channel = %settings.channel,
            bitrate = settings.bitrate,
            "Opened CAN socket; bitrate must match the host interface configuration"
        );

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let manager = tokio::spawn(connection_manager_task(socket, command_rx, self.request_timeout));

        Ok(BusHandle {
            channel: settings.channel.clone(),
            command_tx,
            manager,
        })
    }

    async fn disconnect(&self, handle: BusHandle) -> Result<(), TransportError> {
        let (response_tx, response_rx) = oneshot::channel();
        if handle.command_tx.send(ConnectionMessage::Shutdown { response_tx }).is_ok() {
            let _ = response_rx.await;
        }

        handle.manager
            .await
            .map_err(|e| TransportError::Socket(format!("Connection manager failed: {}", e)))?;
        info!(channel = %handle.channel, "Closed CAN socket");
        Ok(())
    }

    async fn sdo_upload(
        &self,
        handle: &BusHandle,
        node_id: u8,
        index: u16,
        subindex: u8,
    ) -> Result<Vec<u8>, TransportError> {
        let (transfer, request) = SdoClientTransfer::upload(index, subindex);
        handle.submit(node_id, transfer, request).await
    }

    async fn sdo_download(
        &self,
        handle: &BusHandle,
        node_id: u8,
        index: u16,
        subindex: u8,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let (transfer, request) = SdoClientTransfer::download(index, subindex, data.to_vec());
        handle.submit(node_id, transfer, request).await.map(|_| ())
    }
}

/// Background task that owns the socket and runs one SDO transfer at a time
async fn connection_manager_task(
    socket: CanSocket,
    mut command_rx: mpsc::UnboundedReceiver<ConnectionMessage>,
    request_timeout: Duration,
) {
    let socket = Arc::new(Mutex::new(socket));
    let mut active: Option<ActiveTransfer> = None;
    let mut link_error: Option<String> = None;

    // Spawn the CAN frame reader task
    let socket_clone = socket.clone();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Result<CanFrame, String>>();
    tokio::spawn(frame_reader_task(socket_clone, frame_tx));

    // Main event loop
    loop {
        tokio::select! {
            // Handle commands from the API
            command = command_rx.recv() => {
                match command {
                    Some(ConnectionMessage::Transfer { node_id, transfer, request, response_tx }) => {
                        if let Some(message) = &link_error {
                            let _ = response_tx.send(Err(TransportError::LinkDown(message.clone())));
                            continue;
                        }
                        if active.is_some() {
                            let _ = response_tx.send(Err(TransportError::Protocol(
                                "Another SDO transfer is in progress".to_string()
                            )));
                            continue;
                        }

                        debug!(node_id, index = transfer.index(), subindex = transfer.subindex(), "Starting SDO transfer");
                        match write_payload(&socket, request_cob_id(node_id), &request) {
                            Ok(()) => {
                                active = Some(ActiveTransfer {
                                    node_id,
                                    transfer,
                                    response_tx,
                                    deadline: Instant::now() + request_timeout,
                                });
                            }
                            Err(e) => {
                                let _ = response_tx.send(Err(e));
                            }
                        }
                    }

                    Some(ConnectionMessage::Shutdown { response_tx }) => {
                        if let Some(pending) = active.take() {
                            pending.finish(Err(TransportError::LinkDown("Connection closed".to_string())));
                        }
                        let _ = response_tx.send(());
                        break;
                    }

                    None => break, // Channel closed
                }
            }

            // Handle incoming CAN frames
            frame = frame_rx.recv(), if link_error.is_none() => {
                match frame {
                    Some(Ok(frame)) => {
                        active = handle_can_frame(&socket, active, &frame, request_timeout);
                    }
                    Some(Err(message)) => {
                        warn!(error = %message, "CAN link lost");
                        if let Some(pending) = active.take() {
                            pending.finish(Err(TransportError::LinkDown(message.clone())));
                        }
                        link_error = Some(message);
                    }
                    None => {
                        link_error = Some("CAN reader stopped".to_string());
                    }
                }
            }

            // Check for timeouts periodically
            _ = tokio::time::sleep(Duration::from_millis(10)) => {
                if active.as_ref().is_some_and(|pending| Instant::now() > pending.deadline) {
                    if let Some(pending) = active.take() {
                        warn!(node_id = pending.node_id, index = pending.transfer.index(), "SDO request timeout");
                        let abort = abort_request(pending.transfer.index(), pending.transfer.subindex(), ABORT_TIMED_OUT);
                        let _ = write_payload(&socket, request_cob_id(pending.node_id), &abort);
                        pending.finish(Err(TransportError::Timeout));
                    }
                }
            }
        }
    }
}

/// Feed a received frame into the active transfer; returns the transfer if it continues
fn handle_can_frame(
    socket: &Arc<Mutex<CanSocket>>,
    active: Option<ActiveTransfer>,
    frame: &CanFrame,
    request_timeout: Duration,
) -> Option<ActiveTransfer> {
    let mut pending = active?;

    // Only the SDO response channel of the addressed node is relevant
    if frame_cob_id(frame) != Some(response_cob_id(pending.node_id)) {
        return Some(pending);
    }

    match pending.transfer.on_response(frame.data()) {
        Ok(TransferProgress::Send(request)) => {
            match write_payload(socket, request_cob_id(pending.node_id), &request) {
                Ok(()) => {
                    pending.deadline = Instant::now() + request_timeout;
                    Some(pending)
                }
                Err(e) => {
                    pending.finish(Err(e));
                    None
                }
            }
        }
        Ok(TransferProgress::Complete(data)) => {
            debug!(node_id = pending.node_id, bytes = data.len(), "SDO transfer complete");
            pending.finish(Ok(data));
            None
        }
        Err(error) => {
            if !matches!(error, ProtocolError::Abort { .. }) {
                let abort = pending.transfer.abort_payload(&error);
                let _ = write_payload(socket, request_cob_id(pending.node_id), &abort);
            }
            pending.finish(Err(error.into()));
            None
        }
    }
}

async fn frame_reader_task(socket: Arc<Mutex<CanSocket>>, frame_tx: mpsc::UnboundedSender<Result<CanFrame, String>>) {
    loop {
        if frame_tx.is_closed() {
            break;
        }

        let frame = match socket.lock() {
            Ok(socket) => socket.read_frame(),
            Err(_) => {
                let _ = frame_tx.send(Err("CAN socket lock poisoned".to_string()));
                break;
            }
        };

        match frame {
            Ok(frame) => {
                if frame_tx.send(Ok(frame)).is_err() {
                    break; // Channel closed
                }
            }
            Err(e) if is_transient(&e) => {
                // No frame available, sleep briefly
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            Err(e) => {
                let _ = frame_tx.send(Err(e.to_string()));
                break;
            }
        }
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

fn write_payload(socket: &Arc<Mutex<CanSocket>>, cob_id: u16, payload: &SdoPayload) -> Result<(), TransportError> {
    let frame = create_sdo_frame(cob_id, payload)?;
    let socket = socket
        .lock()
        .map_err(|_| TransportError::Socket("CAN socket lock poisoned".to_string()))?;
    socket
        .write_frame(&frame)
        .map_err(|e| TransportError::Socket(e.to_string()))
}

/// CAN network interfaces present on this host (`can*` and `vcan*`)
pub fn available_interfaces() -> Vec<String> {
    let output = match Command::new("ip").arg("link").arg("show").output() {
        Ok(output) => output,
        Err(_) => {
            // If the command fails (e.g., on Windows), return an empty list.
            return Vec::new();
        }
    };

    parse_ip_link(&String::from_utf8_lossy(&output.stdout))
}

fn parse_ip_link(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.contains(": can") || line.contains(": vcan"))
        .filter_map(|line| {
            // The interface name is the second word
            line.split_whitespace()
                .nth(1)
                .map(|name| name.trim_end_matches(':').to_string())
        })
        .collect()
}
