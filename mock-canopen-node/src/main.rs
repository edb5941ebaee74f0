//! # Mock CANopen Node
//!
//! A CANopen node simulator for testing the object dictionary browser.
//!
//! This mock node:
//! - Answers SDO upload and download requests on the CAN bus
//! - Serves values from a descriptor's defaults or from built-in test objects
//! - Honors the declared access type of every object
//! - Can simulate dynamic changing values (like sensor readings)
//!
//! ## Usage
//!
//! ```bash
//! # Start the mock node on vcan0 with node ID 4
//! cargo run -p mock-canopen-node -- --interface vcan0 --node-id 4
//!
//! # Serve the default values of a descriptor
//! cargo run -p mock-canopen-node -- --interface vcan0 --eds device.eds
//! ```

mod object_dictionary;
mod sdo_server;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use canopen_browser::{init_tracing, resolved_node_id, validate_node_id, EdsImporter, OdImporter};
use canopen_common::request_cob_id;
use clap::Parser;
use socketcan::{CanSocket, Socket};
use tracing::{error, info, warn};

use object_dictionary::ObjectDictionary;
use sdo_server::SdoServer;

/// Simulated CANopen device serving an object dictionary over SDO
#[derive(Parser, Debug)]
#[command(name = "mock-node", version)]
struct Cli {
    /// CAN interface to listen on
    #[arg(short, long, default_value = "vcan0")]
    interface: String,

    /// Node ID 1-127 (a descriptor with a fixed node ID overrides it)
    #[arg(short, long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(1..=127))]
    node_id: u8,

    /// Descriptor whose default values seed the object dictionary
    #[arg(long)]
    eds: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    info!("Mock CANopen Node Starting...");

    // Create object dictionary
    let (node_id, object_dict) = match &cli.eds {
        Some(path) => match EdsImporter.import(path) {
            Ok(descriptor) => match validate_node_id(resolved_node_id(cli.node_id, &descriptor)) {
                Ok(node_id) => (node_id, ObjectDictionary::from_descriptor(&descriptor, node_id)),
                Err(e) => {
                    error!("Descriptor fixes an unusable node id: {}", e);
                    return ExitCode::FAILURE;
                }
            },
            Err(e) => {
                error!("Failed to load descriptor: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => {
            let mut object_dict = ObjectDictionary::new();
            object_dict.add_test_objects_for_node(cli.node_id);
            (cli.node_id, object_dict)
        }
    };

    info!(interface = %cli.interface, node_id, "Configuration");

    // Open CAN socket
    let socket = match CanSocket::open(&cli.interface) {
        Ok(sock) => sock,
        Err(e) => {
            error!("Failed to open CAN socket: {}", e);
            error!("Troubleshooting:");
            error!("  1. Create virtual CAN interface:");
            error!("     sudo modprobe vcan");
            error!("     sudo ip link add dev vcan0 type vcan");
            error!("     sudo ip link set up vcan0");
            error!("  2. Check interface exists: ip link show");
            return ExitCode::FAILURE;
        }
    };

    // Set read timeout to avoid busy-waiting
    if let Err(e) = socket.set_read_timeout(Duration::from_millis(10)) {
        error!("Failed to set socket timeout: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Object dictionary loaded with {} entries", object_dict.len());
    object_dict.print_summary();

    let mut sdo_server = SdoServer::new(node_id, object_dict);

    info!("Mock node is running, waiting for SDO requests on COB-ID 0x{:03X}", request_cob_id(node_id));

    // Main loop: listen for CAN frames and respond to SDO requests
    loop {
        match socket.read_frame() {
            Ok(frame) => {
                if let Some(response_frame) = sdo_server.handle_frame(&frame) {
                    if let Err(e) = socket.write_frame(&response_frame) {
                        warn!("Failed to send response: {}", e);
                    }
                }
            }
            Err(err) => {
                // Timeout or no data - this is normal, just continue
                if err.kind() != io::ErrorKind::WouldBlock && err.kind() != io::ErrorKind::TimedOut {
                    warn!("CAN read error: {}", err);
                }
            }
        }
    }
}
