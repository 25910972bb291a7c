use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use solar_modbus::util::{format_hex_compact, parse_hex_lenient};
use serde_json::json;
use solar_modbus::{
    init_logger, log_debug, log_info, log_warn, CommandValue, Device, DeviceConfig,
    PluginRegistry, ProtocolDescriptor, WriteTarget,
};

#[derive(Parser)]
#[command(name = "solar-cli")]
#[command(about = "Decode and encode register frames of solar/power devices")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode one frame and print the logical values.
    Decode {
        /// Protocol descriptor (JSON)
        descriptor: PathBuf,
        /// Frame bytes in hex; spaces and 0x prefixes are ignored
        frame: String,
        #[arg(short, long, default_value = "PZEMV04")]
        model: String,
    },
    /// Encode a write command.
    Encode {
        descriptor: PathBuf,
        /// Register name or numeric key
        target: String,
        /// Value: number, true/false, HH:MM or enum label
        value: String,
        #[arg(short, long, default_value = "PZEMV04")]
        model: String,
    },
    /// List the entities a device model exposes.
    Entities {
        descriptor: PathBuf,
        #[arg(short, long, default_value = "PZEMV04")]
        model: String,
    },
    /// List the built-in device models.
    Models,
}

fn load_device(path: &PathBuf, model: &str, registry: &PluginRegistry) -> anyhow::Result<Device> {
    let descriptor = ProtocolDescriptor::from_file(path)
        .with_context(|| format!("loading descriptor {}", path.display()))?;
    let config = DeviceConfig::new("cli", model);
    Ok(Device::new(&config, Arc::new(descriptor), registry)?)
}

fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();
    let registry = PluginRegistry::with_defaults()?;

    match cli.command {
        Commands::Decode {
            descriptor,
            frame,
            model,
        } => {
            let bytes = parse_hex_lenient(&frame).context("frame is not valid hex")?;
            let device = load_device(&descriptor, &model, &registry)?;
            let outcome = device.ingest(&bytes)?;
            if !outcome.diagnostics.is_empty() {
                log_warn(&format!("{} registers skipped", outcome.diagnostics.len()));
            }
            log_info(&format!("{} values changed", outcome.changed.len()));
            let diagnostics: Vec<String> = outcome.diagnostics.iter().map(ToString::to_string).collect();
            let report = json!({
                "values": device.snapshot(),
                "diagnostics": diagnostics,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Encode {
            descriptor,
            target,
            value,
            model,
        } => {
            let device = load_device(&descriptor, &model, &registry)?;
            let target = WriteTarget::from(target.as_str());
            let value: CommandValue = value.parse()?;
            let command = device.command(&target, &value)?;
            log_debug(&format!("Changed: {:?}", command.changed));
            println!("{}", format_hex_compact(&command.frame));
        }
        Commands::Entities { descriptor, model } => {
            let device = load_device(&descriptor, &model, &registry)?;
            println!("{}", serde_json::to_string_pretty(device.entities())?);
        }
        Commands::Models => {
            for model in registry.models() {
                let protocol = registry.protocol_for(&model)?;
                println!("{model}\t{protocol}");
            }
        }
    }

    Ok(())
}
