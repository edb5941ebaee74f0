//! SDO transfer gateway.
//!
//! Performs one upload or download against the session's open handle and
//! classifies the outcome. Permissions are not checked here; the caller is
//! expected to have consulted `NodeSession::action_permissions` first.
//!
//! Transfers are serialized through the handle slot. A transfer holds the
//! slot's lock for its whole lifetime, on a spawned task, so neither a caller
//! that stops waiting nor the gateway's own time bound frees the bus before
//! the transport call has returned.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch, Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{SdoError, TransportError};
use crate::logging::{EventLog, LogEvent};
use crate::od::Address;
use crate::session::ConnectionState;
use crate::transport::CanTransport;

/// Added to the configured SDO timeout before the gateway gives up on the transport
pub const TIMEOUT_MARGIN: Duration = Duration::from_millis(500);

/// Open transport handle shared by the session and its gateway
pub(crate) type HandleSlot<H> = Arc<Mutex<Option<H>>>;

#[derive(Debug, Clone)]
enum Request {
    Upload,
    Download(Vec<u8>),
}

pub struct SdoGateway<T: CanTransport> {
    transport: Arc<T>,
    handle: HandleSlot<T::Handle>,
    state: Arc<watch::Sender<ConnectionState>>,
    node_id: u8,
    timeout: Duration,
    event_log: EventLog,
}

impl<T: CanTransport> SdoGateway<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        handle: HandleSlot<T::Handle>,
        state: Arc<watch::Sender<ConnectionState>>,
        node_id: u8,
        sdo_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            handle,
            state,
            node_id,
            timeout: sdo_timeout + TIMEOUT_MARGIN,
            event_log: EventLog::new(),
        }
    }

    pub(crate) fn set_sdo_timeout(&mut self, sdo_timeout: Duration) {
        self.timeout = sdo_timeout + TIMEOUT_MARGIN;
    }

    pub(crate) fn set_event_log(&mut self, event_log: EventLog) {
        self.event_log = event_log;
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    /// Upper bound on a single transfer
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Upload the value at `address`
    pub async fn read(&self, address: Address) -> Result<Vec<u8>, SdoError> {
        let result = self.transfer(address, Request::Upload).await;
        match &result {
            Ok(data) => self.event_log.log(LogEvent::SdoRead {
                address,
                value: format!("{:02X?}", data),
            }),
            Err(e) => self.log_error(address, e),
        }
        result
    }

    /// Download `data` unchanged to `address`
    pub async fn write(&self, address: Address, data: &[u8]) -> Result<(), SdoError> {
        let result = self.transfer(address, Request::Download(data.to_vec())).await;
        match &result {
            Ok(_) => self.event_log.log(LogEvent::SdoWrite {
                address,
                value: format!("{:02X?}", data),
            }),
            Err(e) => self.log_error(address, e),
        }
        result.map(|_| ())
    }

    fn log_error(&self, address: Address, error: &SdoError) {
        warn!(%address, error = %error, "SDO transfer failed");
        self.event_log.log(LogEvent::SdoError {
            address,
            error: error.to_string(),
        });
    }

    async fn transfer(&self, address: Address, request: Request) -> Result<Vec<u8>, SdoError> {
        let guard = self
            .handle
            .clone()
            .try_lock_owned()
            .map_err(|_| SdoError::Busy)?;
        if guard.is_none() {
            return Err(SdoError::NotConnected);
        }

        debug!(node_id = self.node_id, %address, ?request, "SDO transfer");
        let (reply_tx, reply_rx) = oneshot::channel();
        tokio::spawn(run_transfer(
            self.transport.clone(),
            guard,
            self.state.clone(),
            self.node_id,
            address,
            request,
            self.timeout,
            reply_tx,
        ));

        reply_rx
            .await
            .unwrap_or_else(|_| Err(SdoError::Transport("SDO transfer task failed".to_string())))
    }
}

/// Runs one transfer while holding the handle slot.
///
/// When `limit` passes, the caller is answered with a timeout but the slot
/// stays locked until the transport call itself returns.
#[allow(clippy::too_many_arguments)]
async fn run_transfer<T: CanTransport>(
    transport: Arc<T>,
    mut guard: OwnedMutexGuard<Option<T::Handle>>,
    state: Arc<watch::Sender<ConnectionState>>,
    node_id: u8,
    address: Address,
    request: Request,
    limit: Duration,
    reply: oneshot::Sender<Result<Vec<u8>, SdoError>>,
) {
    let Some(handle) = guard.as_ref() else {
        let _ = reply.send(Err(SdoError::NotConnected));
        return;
    };

    let index = address.index;
    let subindex = address.wire_subindex();
    let mut reply = Some(reply);
    let outcome = {
        let call = async {
            match &request {
                Request::Upload => transport.sdo_upload(handle, node_id, index, subindex).await,
                Request::Download(data) => transport
                    .sdo_download(handle, node_id, index, subindex, data)
                    .await
                    .map(|()| Vec::new()),
            }
        };
        tokio::pin!(call);

        match tokio::time::timeout(limit, &mut call).await {
            Ok(outcome) => outcome,
            Err(_) => {
                if let Some(reply) = reply.take() {
                    let _ = reply.send(Err(SdoError::Transport(TransportError::Timeout.to_string())));
                }
                warn!(node_id, %address, "SDO transfer exceeded {:?}, holding the bus until it ends", limit);
                call.await
            }
        }
    };

    let result = match outcome {
        Ok(data) => Ok(data),
        Err(TransportError::LinkDown(message)) => {
            warn!(node_id, error = %message, "CAN link lost, closing connection");
            if let Some(handle) = guard.take() {
                if let Err(e) = transport.disconnect(handle).await {
                    warn!(error = %e, "Failed to release lost connection");
                }
            }
            state.send_replace(ConnectionState::Disconnected);
            Err(SdoError::Transport(message))
        }
        Err(e) => Err(e.into()),
    };

    match reply {
        Some(reply) => {
            let _ = reply.send(result);
        }
        None => debug!(node_id, %address, ?result, "Late SDO transfer finished"),
    }
}
