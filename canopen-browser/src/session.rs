//! Binding of one object dictionary to one node on one bus connection.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use canopen_common::SdoValue;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::access::{capabilities, Capabilities};
use crate::attributes::ObjectAttributes;
use crate::error::{AddressError, ConnectError, DisconnectError, InvalidNodeId, SdoError};
use crate::gateway::{HandleSlot, SdoGateway};
use crate::logging::{EventLog, LogEvent};
use crate::od::{Address, ObjectDictionary, ResolvedObject};
use crate::transport::{BusSettings, CanTransport};

pub const DEFAULT_SDO_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("Disconnected"),
            Self::Connected => f.write_str("Connected"),
        }
    }
}

/// Accepts node ids in the CANopen range 1-127
pub fn validate_node_id(node_id: u8) -> Result<u8, InvalidNodeId> {
    match node_id {
        1..=127 => Ok(node_id),
        _ => Err(InvalidNodeId(node_id)),
    }
}

/// Node id to bind to: a node id fixed by the descriptor overrides the requested one
pub fn resolved_node_id(requested_id: u8, od: &ObjectDictionary) -> u8 {
    match od.node_id {
        Some(node_id) if node_id != requested_id => {
            warn!(requested_id, node_id, "Descriptor fixes the node id, overriding requested value");
            node_id
        }
        _ => requested_id,
    }
}

/// The single active device binding.
///
/// Holds the object dictionary (declared metadata) and, while connected, the
/// transport handle through which [`SdoGateway`] reaches the live values.
pub struct NodeSession<T: CanTransport> {
    node_id: u8,
    od: ObjectDictionary,
    transport: Arc<T>,
    handle: HandleSlot<T::Handle>,
    state: Arc<watch::Sender<ConnectionState>>,
    selection: watch::Sender<Option<Address>>,
    gateway: SdoGateway<T>,
    event_log: EventLog,
}

impl<T: CanTransport> NodeSession<T> {
    pub fn new(od: ObjectDictionary, node_id: u8, transport: Arc<T>) -> Result<Self, InvalidNodeId> {
        let node_id = validate_node_id(node_id)?;
        let handle: HandleSlot<T::Handle> = Arc::new(Mutex::new(None));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let state = Arc::new(state);
        let (selection, _) = watch::channel(None);
        let gateway = SdoGateway::new(
            transport.clone(),
            handle.clone(),
            state.clone(),
            node_id,
            DEFAULT_SDO_TIMEOUT,
        );

        Ok(Self {
            node_id,
            od,
            transport,
            handle,
            state,
            selection,
            gateway,
            event_log: EventLog::new(),
        })
    }

    pub fn with_sdo_timeout(mut self, sdo_timeout: Duration) -> Self {
        self.gateway.set_sdo_timeout(sdo_timeout);
        self
    }

    pub fn with_event_log(mut self, event_log: EventLog) -> Self {
        self.gateway.set_event_log(event_log.clone());
        self.event_log = event_log;
        self
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    /// Declared metadata view
    pub fn object_dictionary(&self) -> &ObjectDictionary {
        &self.od
    }

    /// Live, SDO-backed view
    pub fn sdo(&self) -> &SdoGateway<T> {
        &self.gateway
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Open the bus. An open connection is closed first.
    pub async fn connect(&self, interface: &str, channel: &str, bitrate_kbps: u32) -> Result<(), ConnectError> {
        let settings = BusSettings::from_kbps(interface, channel, bitrate_kbps);
        let mut slot = self.handle.lock().await;

        if let Some(old) = slot.take() {
            info!("Closing previous connection before reconnecting");
            if let Err(e) = self.transport.disconnect(old).await {
                warn!(error = %e, "Failed to close previous connection");
            }
            self.state.send_replace(ConnectionState::Disconnected);
            self.event_log.log(LogEvent::Disconnected);
        }

        match self.transport.connect(&settings).await {
            Ok(handle) => {
                *slot = Some(handle);
                self.state.send_replace(ConnectionState::Connected);
                info!(%settings, node_id = self.node_id, "Connected");
                self.event_log.log(LogEvent::Connected {
                    settings: settings.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                warn!(%settings, error = %e, "Connection failed");
                self.event_log.log(LogEvent::ConnectionFailed(e.to_string()));
                Err(ConnectError::Transport(e.to_string()))
            }
        }
    }

    /// Close the bus. Closing a closed session succeeds.
    pub async fn disconnect(&self) -> Result<(), DisconnectError> {
        let mut slot = self.handle.lock().await;
        let Some(handle) = slot.take() else {
            return Ok(());
        };

        let result = self.transport.disconnect(handle).await;
        self.state.send_replace(ConnectionState::Disconnected);
        info!(node_id = self.node_id, "Disconnected");
        self.event_log.log(LogEvent::Disconnected);
        result.map_err(|e| DisconnectError::Transport(e.to_string()))
    }

    /// Nominal bitrate declared by the descriptor, in kbit/s
    pub fn effective_bitrate_from_od(&self) -> Option<u32> {
        self.od.bitrate_kbps
    }

    pub fn resolve(&self, address: Address) -> Result<ResolvedObject<'_>, AddressError> {
        self.od.resolve(address)
    }

    /// Declared capabilities of the object at `address`, all false unless connected
    pub fn action_permissions(&self, address: Address) -> Result<Capabilities, AddressError> {
        let resolved = self.od.resolve(address)?;
        Ok(capabilities(resolved.access_type()).gated_by(self.is_connected()))
    }

    /// Make `address` the current selection and notify subscribers.
    /// An address that does not resolve clears the selection.
    pub fn select(&self, address: Address) -> Result<ResolvedObject<'_>, AddressError> {
        match self.od.resolve(address) {
            Ok(resolved) => {
                self.selection.send_replace(Some(address));
                Ok(resolved)
            }
            Err(e) => {
                self.selection.send_replace(None);
                Err(e)
            }
        }
    }

    pub fn clear_selection(&self) {
        self.selection.send_replace(None);
    }

    pub fn selection(&self) -> Option<Address> {
        *self.selection.borrow()
    }

    pub fn subscribe_selection(&self) -> watch::Receiver<Option<Address>> {
        self.selection.subscribe()
    }

    pub fn selected_attributes(&self) -> Option<ObjectAttributes> {
        let address = self.selection()?;
        self.od
            .resolve(address)
            .ok()
            .map(|resolved| ObjectAttributes::from_resolved(&resolved))
    }

    /// Read the live value of the current selection; `None` when nothing is selected
    pub async fn read_selected(&self) -> Result<Option<SdoValue>, SdoError> {
        let Some(address) = self.selection() else {
            return Ok(None);
        };
        let data_type = self.od.resolve(address).ok().and_then(|resolved| resolved.data_type());
        let data = self.gateway.read(address).await?;
        Ok(Some(SdoValue::decode(data_type, &data)))
    }
}

impl<T: CanTransport> fmt::Debug for NodeSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSession")
            .field("node_id", &self.node_id)
            .field("objects", &self.od.len())
            .field("state", &self.connection_state())
            .field("selection", &self.selection())
            .finish()
    }
}
