//! Owner of the single live node session.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::eds::OdImporter;
use crate::error::ImportError;
use crate::logging::EventLog;
use crate::session::{resolved_node_id, validate_node_id, NodeSession, DEFAULT_SDO_TIMEOUT};
use crate::transport::CanTransport;

/// Owner of the one live [`NodeSession`]
pub struct Browser<T: CanTransport, I: OdImporter> {
    transport: Arc<T>,
    importer: I,
    session: Option<NodeSession<T>>,
    sdo_timeout: Duration,
    event_log: EventLog,
}

impl<T: CanTransport, I: OdImporter> Browser<T, I> {
    pub fn new(transport: T, importer: I) -> Self {
        Self {
            transport: Arc::new(transport),
            importer,
            session: None,
            sdo_timeout: DEFAULT_SDO_TIMEOUT,
            event_log: EventLog::new(),
        }
    }

    /// SDO timeout applied to sessions created from now on
    pub fn with_sdo_timeout(mut self, sdo_timeout: Duration) -> Self {
        self.sdo_timeout = sdo_timeout;
        self
    }

    pub fn with_event_log(mut self, event_log: EventLog) -> Self {
        self.event_log = event_log;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Import a descriptor and bind a new session to it.
    ///
    /// On import failure, or when the resolved node id is outside 1-127, the
    /// current session is kept as it was. On success the current session is
    /// disconnected and replaced.
    pub async fn load(&mut self, path: &Path, requested_node_id: u8) -> Result<&mut NodeSession<T>, ImportError> {
        let od = self.importer.import(path)?;
        let node_id = validate_node_id(resolved_node_id(requested_node_id, &od))?;

        self.close().await;

        info!(path = ?path, node_id, objects = od.len(), "Created node session");
        let session = NodeSession::new(od, node_id, self.transport.clone())?
            .with_sdo_timeout(self.sdo_timeout)
            .with_event_log(self.event_log.clone());
        Ok(self.session.insert(session))
    }

    pub fn session(&self) -> Option<&NodeSession<T>> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut NodeSession<T>> {
        self.session.as_mut()
    }

    /// Disconnect and drop the current session, if any
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.disconnect().await {
                warn!(error = %e, "Failed to disconnect closing session");
            }
        }
    }
}
