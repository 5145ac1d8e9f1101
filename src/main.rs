//! ilink - query laboratory instruments from the command line
//!
//! Usage:
//!   ilink parse <DESCRIPTOR>              Print resolved parameters as JSON
//!   ilink query <DESCRIPTOR> <MESSAGE>    Send a message, print the reply
//!   ilink ports                           List serial ports

mod cli;
mod logging;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use instrument_link::{descriptor, factory, LinkConfig, Transport};
use serialport::SerialPortType;
use std::fs;
use std::path::Path;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => LinkConfig::default(),
    };

    match cli.command {
        Command::Parse { descriptor } => run_parse(&config, descriptor.as_deref()),
        Command::Query {
            descriptor,
            message,
            terminator,
            timeout,
        } => {
            let timeout = match timeout {
                Some(secs) => Some(
                    Duration::try_from_secs_f64(secs)
                        .with_context(|| format!("Invalid --timeout {}", secs))?,
                ),
                None => config.timeout(),
            };
            run_query(
                &config,
                &descriptor,
                message.as_bytes(),
                &cli::unescape(&terminator),
                timeout,
            )
        }
        Command::Ports => run_ports(),
    }
}

fn load_config(path: &Path) -> Result<LinkConfig> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    LinkConfig::from_toml_str(&content).with_context(|| format!("Invalid config {}", path.display()))
}

fn run_parse(config: &LinkConfig, explicit: Option<&str>) -> Result<()> {
    let descriptor = config
        .descriptor(explicit)
        .ok_or_else(|| anyhow!("No descriptor given and none in config"))?;
    let (interface, params) = descriptor::parse_any(descriptor, config.defaults())?;

    let json = serde_json::json!({
        "interface": interface.name(),
        "params": params,
        "descriptor": params.to_descriptor(interface),
    });
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn run_query(
    config: &LinkConfig,
    descriptor: &str,
    message: &[u8],
    terminator: &[u8],
    timeout: Option<Duration>,
) -> Result<()> {
    let mut transport = factory::create(descriptor, config.defaults())?;
    transport
        .open()
        .with_context(|| format!("Cannot open {}", descriptor))?;

    let result = exchange(&mut transport, message, terminator, timeout);
    transport.close()?;

    let reply = result?;
    let text = String::from_utf8_lossy(&reply);
    println!("{}", text.trim_end_matches(['\r', '\n']));
    Ok(())
}

fn exchange(
    transport: &mut impl Transport,
    message: &[u8],
    terminator: &[u8],
    timeout: Option<Duration>,
) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(message.len() + terminator.len());
    frame.extend_from_slice(message);
    frame.extend_from_slice(terminator);

    transport.discard_read()?;
    transport.write(&frame)?;
    let reply = transport.read_until(terminator, timeout)?;
    Ok(reply.to_vec())
}

fn run_ports() -> Result<()> {
    let ports = serialport::available_ports().context("Cannot enumerate serial ports")?;
    if ports.is_empty() {
        eprintln!("No serial ports found.");
        return Ok(());
    }
    for port in ports {
        match &port.port_type {
            SerialPortType::UsbPort(usb) => println!(
                "{}  usb {:04x}:{:04x}  {}",
                port.port_name,
                usb.vid,
                usb.pid,
                usb.product.as_deref().unwrap_or("")
            ),
            SerialPortType::PciPort => println!("{}  pci", port.port_name),
            SerialPortType::BluetoothPort => println!("{}  bluetooth", port.port_name),
            SerialPortType::Unknown => println!("{}", port.port_name),
        }
    }
    Ok(())
}
