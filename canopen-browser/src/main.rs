// main.rs - command line front end for the browser core

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use canopen_browser::transport::bitrate_label;
use canopen_browser::{
    available_interfaces, describe, format_index, format_subindex, init_tracing, Address, Browser,
    BrowserConfig, EdsImporter, EventLog, NodeSession, Object, ObjectAttributes, OdImporter,
    SocketCanTransport, CANOPEN_BITRATES,
};
use clap::{Args, Parser, Subcommand};
use tracing::error;

/// Browse the object dictionary of a CANopen device over SDO
#[derive(Parser, Debug)]
#[command(name = "canopen-browser", version, propagate_version = true)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List CAN interfaces and the supported bitrates
    Interfaces,

    /// Show the objects of a descriptor, or the attributes of one object
    Show {
        eds: PathBuf,
        address: Option<Address>,
    },

    /// Read an object from the device
    Read {
        #[command(flatten)]
        bus: BusArgs,
        address: Address,
    },

    /// Write raw bytes (hex, e.g. "E8 03") to an object on the device
    Write {
        #[command(flatten)]
        bus: BusArgs,
        address: Address,
        data: String,
    },
}

/// Overrides for the configured connection
#[derive(Args, Debug)]
struct BusArgs {
    /// Descriptor file (.eds or .dcf)
    #[arg(long)]
    eds: Option<PathBuf>,

    /// Interface kind (socketcan, virtual)
    #[arg(long)]
    interface: Option<String>,

    /// CAN channel, e.g. can0
    #[arg(long)]
    channel: Option<String>,

    /// Bitrate in kbit/s
    #[arg(long)]
    bitrate: Option<u32>,

    /// Node ID 1-127 (a descriptor with a fixed node ID overrides it)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=127))]
    node_id: Option<u8>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = match &cli.config {
        Some(path) => BrowserConfig::load_from(path)?,
        None => BrowserConfig::load(),
    };

    match cli.command {
        Commands::Interfaces => {
            let interfaces = available_interfaces();
            if interfaces.is_empty() {
                println!("No CAN interfaces found");
            }
            for interface in interfaces {
                println!("{}", interface);
            }
            let bitrates: Vec<String> = CANOPEN_BITRATES.iter().map(|kbps| bitrate_label(*kbps)).collect();
            println!("Bitrates: {}", bitrates.join(", "));
            Ok(())
        }
        Commands::Show { eds, address } => show(&eds, address),
        Commands::Read { bus, address } => transfer(config, bus, address, None).await,
        Commands::Write { bus, address, data } => {
            let data = parse_hex_bytes(&data)?;
            transfer(config, bus, address, Some(data)).await
        }
    }
}

fn show(eds: &Path, address: Option<Address>) -> Result<(), Box<dyn Error>> {
    let od = EdsImporter.import(eds)?;

    if let Some(address) = address {
        let attributes = ObjectAttributes::from_resolved(&od.resolve(address)?);
        print_attributes(&attributes);
        return Ok(());
    }

    if let (Some(vendor), Some(product)) = (&od.device.vendor_name, &od.device.product_name) {
        println!("{} - {}", vendor, product);
    }
    for object in od.iter() {
        match object {
            Object::Scalar(scalar) => println!(
                "{}  {:<40} {}",
                format_index(scalar.index),
                scalar.name,
                scalar.data_type.map(describe).unwrap_or_default()
            ),
            Object::Composite(composite) => {
                println!("{}  {}", format_index(composite.index), composite.name);
                for member in composite.sub_objects() {
                    println!("  {}  {}", format_subindex(member.subindex), member.name);
                }
            }
        }
    }
    Ok(())
}

async fn transfer(
    mut config: BrowserConfig,
    bus: BusArgs,
    address: Address,
    data: Option<Vec<u8>>,
) -> Result<(), Box<dyn Error>> {
    if let Some(interface) = bus.interface {
        config.interface = interface;
    }
    if let Some(channel) = bus.channel {
        config.channel = channel;
    }
    let eds = bus
        .eds
        .or_else(|| config.eds_file_path.as_ref().map(PathBuf::from))
        .ok_or("No descriptor given (--eds or eds_file_path in the config file)")?;

    let event_log = match (config.enable_logging, config.get_log_directory()) {
        (true, Some(directory)) => EventLog::create(&directory)?,
        _ => EventLog::new(),
    };

    let mut browser = Browser::new(SocketCanTransport::new(config.sdo_timeout()), EdsImporter)
        .with_sdo_timeout(config.sdo_timeout())
        .with_event_log(event_log);
    let session = browser.load(&eds, bus.node_id.unwrap_or(config.node_id)).await?;

    let bitrate = bus
        .bitrate
        .or_else(|| session.effective_bitrate_from_od())
        .unwrap_or(config.bitrate_kbps);
    session.connect(&config.interface, &config.channel, bitrate).await?;

    let result = exchange(session, address, data).await;
    browser.close().await;
    result
}

async fn exchange(
    session: &NodeSession<SocketCanTransport>,
    address: Address,
    data: Option<Vec<u8>>,
) -> Result<(), Box<dyn Error>> {
    let permissions = session.action_permissions(address)?;
    let resolved = session.select(address)?;
    print_attributes(&ObjectAttributes::from_resolved(&resolved));

    match data {
        None if permissions.can_read => {
            if let Some(value) = session.read_selected().await? {
                println!("Value: {}", value);
            }
            Ok(())
        }
        Some(data) if permissions.can_write => {
            session.sdo().write(address, &data).await?;
            println!("Written: {:02X?}", data);
            Ok(())
        }
        None => Err(format!("{} is not readable", address).into()),
        Some(_) => Err(format!("{} is not writable", address).into()),
    }
}

fn print_attributes(attributes: &ObjectAttributes) {
    println!("Index:     {}", attributes.index);
    if !attributes.subindex.is_empty() {
        println!("Subindex:  {}", attributes.subindex);
    }
    println!("Name:      {}", attributes.name);
    println!("Data type: {}", attributes.data_type);
    println!("Access:    {}", attributes.access);
    if !attributes.limits.is_empty() {
        println!("Limits:    {}", attributes.limits);
    }
}

fn parse_hex_bytes(text: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);
    if digits.len() % 2 != 0 {
        return Err(format!("Odd number of hex digits in {:?}", text).into());
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|byte| u8::from_str_radix(byte, 16).ok())
                .ok_or_else(|| format!("Invalid hex byte in {:?}", text).into())
        })
        .collect()
}
