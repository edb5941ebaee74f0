use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Local;
use csv::Writer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::error::EventLogError;
use crate::od::Address;

/// Install the global fmt subscriber. `RUST_LOG` takes precedence over `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A subscriber may already be installed (tests, embedding applications)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    Connected {
        settings: String,
    },
    ConnectionFailed(String),
    Disconnected,
    SdoRead {
        address: Address,
        value: String,
    },
    SdoWrite {
        address: Address,
        value: String,
    },
    SdoError {
        address: Address,
        error: String,
    },
}

impl LogEvent {
    fn record(self) -> [String; 4] {
        match self {
            LogEvent::Connected { settings } => [
                "CONNECTION_SUCCESS".to_string(),
                String::new(),
                settings,
                "Connected to CAN bus".to_string(),
            ],
            LogEvent::ConnectionFailed(err) => [
                "CONNECTION_FAILED".to_string(),
                String::new(),
                String::new(),
                err,
            ],
            LogEvent::Disconnected => [
                "DISCONNECTED".to_string(),
                String::new(),
                String::new(),
                String::new(),
            ],
            LogEvent::SdoRead { address, value } => [
                "SDO_READ".to_string(),
                log_address(address),
                value,
                String::new(),
            ],
            LogEvent::SdoWrite { address, value } => [
                "SDO_WRITE".to_string(),
                log_address(address),
                value,
                String::new(),
            ],
            LogEvent::SdoError { address, error } => [
                "SDO_ERROR".to_string(),
                log_address(address),
                String::new(),
                error,
            ],
        }
    }
}

fn log_address(address: Address) -> String {
    format!("{:04X}:{:02X}", address.index, address.wire_subindex())
}

/// CSV log of session events. Cloning shares the underlying file.
#[derive(Clone, Default)]
pub struct EventLog {
    writer: Arc<Mutex<Option<Writer<File>>>>,
    log_file_path: Option<PathBuf>,
}

impl EventLog {
    /// Create a new, disabled event log
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new timestamped log file in `log_directory`
    pub fn create(log_directory: &Path) -> Result<Self, EventLogError> {
        // Create log directory if it doesn't exist
        fs::create_dir_all(log_directory)?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let log_path = log_directory.join(format!("canopen_log_{}.csv", timestamp));

        let file = File::create(&log_path)?;
        let mut writer = Writer::from_writer(file);
        writer.write_record(["Timestamp", "Event Type", "Address", "Value", "Message"])?;
        writer.flush()?;

        info!(path = ?log_path, "Event logging enabled");
        Ok(Self {
            writer: Arc::new(Mutex::new(Some(writer))),
            log_file_path: Some(log_path),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.lock().map(|writer| writer.is_some()).unwrap_or(false)
    }

    /// Get the current log file path
    pub fn log_file_path(&self) -> Option<&Path> {
        self.log_file_path.as_deref()
    }

    /// Close the file; later events are dropped
    pub fn disable(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            *writer = None;
        }
    }

    pub fn log(&self, event: LogEvent) {
        let Ok(mut writer_guard) = self.writer.lock() else {
            return;
        };
        let Some(writer) = writer_guard.as_mut() else {
            return;
        };

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();
        let [event_type, address, value, message] = event.record();

        if let Err(e) = writer.write_record([&timestamp, &event_type, &address, &value, &message]) {
            error!(error = %e, "Failed to write log entry");
        }
        if let Err(e) = writer.flush() {
            error!(error = %e, "Failed to flush log file");
        }
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("enabled", &self.is_enabled())
            .field("log_file_path", &self.log_file_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_written_as_csv() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::create(dir.path()).unwrap();
        assert!(log.is_enabled());

        log.log(LogEvent::SdoRead {
            address: Address::sub(0x1018, 1),
            value: "Unsigned(42)".to_string(),
        });
        log.log(LogEvent::SdoError {
            address: Address::object(0x6000),
            error: "Not connected".to_string(),
        });

        let contents = fs::read_to_string(log.log_file_path().unwrap()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "Timestamp,Event Type,Address,Value,Message");
        assert!(lines[1].ends_with(",SDO_READ,1018:01,Unsigned(42),"));
        assert!(lines[2].ends_with(",SDO_ERROR,6000:00,,Not connected"));
    }

    #[test]
    fn test_disabled_log_drops_events() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::create(dir.path()).unwrap();
        let shared = log.clone();
        shared.disable();
        assert!(!log.is_enabled());

        log.log(LogEvent::Disconnected);
        let contents = fs::read_to_string(log.log_file_path().unwrap()).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn test_new_log_is_disabled() {
        let log = EventLog::new();
        assert!(!log.is_enabled());
        log.log(LogEvent::Disconnected);
        assert!(log.log_file_path().is_none());
    }
}
