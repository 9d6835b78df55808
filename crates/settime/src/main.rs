//! onlykey-settime
//!
//! Sets the clock of an OnlyKey from the host's time, either once or every
//! time one is plugged in.

use anyhow::{Context, Result, bail};
use clap::Parser;
use common::{UsbBridge, UsbCommand, UsbEvent, create_usb_bridge, setup_logging};
use protocol::{UsbDeviceDescriptor, is_inaccessible_candidate, is_target_device};
use serde::Serialize;
use settime::usb::{WorkerOptions, spawn_usb_worker};
use settime::{
    Outcome, PermissionPolicy, SetTimeConfig, SetTimeWorkflow, Transport, Trigger, UsbTransport,
    service,
};
use tokio::signal;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "onlykey-settime")]
#[command(author, version, about = "Set the time on a connected OnlyKey")]
#[command(long_about = "
Writes the host's current Unix time to an OnlyKey over its vendor USB interface.

EXAMPLES:
    # Set the time on the first connected OnlyKey
    onlykey-settime

    # Stay running and set the time whenever an OnlyKey is plugged in
    onlykey-settime --watch

    # Ask for confirmation before writing
    onlykey-settime --confirm

    # Show connected USB devices and which ones are OnlyKeys
    onlykey-settime --list-devices

CONFIGURATION:
    Configuration files are looked up in this order:
    1. Path specified with --config
    2. ~/.config/onlykey-settime/config.toml
    3. /etc/onlykey-settime/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Keep running and handle every OnlyKey that gets plugged in
    #[arg(long)]
    watch: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Print the device list as JSON
    #[arg(long, requires = "list_devices")]
    json: bool,

    /// Ask on the terminal before writing to a device
    #[arg(long)]
    confirm: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = SetTimeConfig::default();
        let path = SetTimeConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        SetTimeConfig::load(Some(SetTimeConfig::expand_path(path)))
            .context("Failed to load configuration")?
    } else {
        SetTimeConfig::load_or_default()
    };

    if args.confirm {
        config.agent.permission = PermissionPolicy::Prompt;
    }

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.agent.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("onlykey-settime v{}", env!("CARGO_PKG_VERSION"));
    debug!("Configuration: {:?}", config);

    let (usb_bridge, worker) = create_usb_bridge();
    let options = WorkerOptions {
        write_timeout: config.usb.write_timeout(),
        hotplug: args.watch && config.usb.hotplug,
    };
    let usb_worker_handle = spawn_usb_worker(worker, options);

    let result = if args.list_devices {
        list_devices_mode(&usb_bridge, args.json).await
    } else {
        let transport = UsbTransport::new(usb_bridge.clone(), config.agent.permission);
        let workflow = SetTimeWorkflow::new(transport);
        if args.watch {
            run_watch(&workflow, &usb_bridge).await
        } else {
            run_once(&workflow).await
        }
    };

    info!("Shutting down USB subsystem...");
    if let Err(e) = usb_bridge.send_command(UsbCommand::Shutdown).await {
        debug!("USB worker already gone: {}", e);
    }
    match usb_worker_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("USB worker failed: {}", e),
        Err(e) => error!("USB worker thread panicked: {:?}", e),
    }

    result
}

/// Device line for `--list-devices --json`
#[derive(Serialize)]
struct ListedDevice<'a> {
    #[serde(flatten)]
    descriptor: &'a UsbDeviceDescriptor,
    onlykey: bool,
}

/// List USB devices and exit
async fn list_devices_mode(usb_bridge: &UsbBridge, json: bool) -> Result<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    usb_bridge
        .send_command(UsbCommand::ListDevices { response: tx })
        .await
        .context("Failed to send ListDevices command")?;

    let devices = rx
        .await
        .context("Failed to receive device list")?
        .context("Failed to enumerate USB devices")?;

    if json {
        let listed: Vec<_> = devices
            .iter()
            .map(|descriptor| ListedDevice {
                descriptor,
                onlykey: is_target_device(descriptor),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listed)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in &devices {
        println!(
            "  {:04x}:{:04x}  Bus {:03} Device {:03}  interfaces: {}{}",
            device.vendor_id,
            device.product_id,
            device.bus_number,
            device.device_address,
            device.interface_count,
            if is_target_device(device) {
                "  [OnlyKey]"
            } else if is_inaccessible_candidate(device) {
                "  [OnlyKey?, no access]"
            } else {
                ""
            }
        );
        if let Some(serial) = &device.serial_number {
            println!("      Serial: {}", serial);
        }
    }

    Ok(())
}

/// Scan once and set the time on the first OnlyKey
async fn run_once<T: Transport>(workflow: &SetTimeWorkflow<T>) -> Result<()> {
    match workflow.run(Trigger::Manual).await {
        Outcome::TimeSet { unix_seconds, .. } => {
            println!("OnlyKey time set to {}", unix_seconds);
            Ok(())
        }
        Outcome::NoMatch => {
            println!("No OnlyKey found.");
            Ok(())
        }
        Outcome::PermissionDenied { device } if device.access_denied => bail!(
            "Cannot open possible OnlyKey at {:03}:{:03}: permission denied (check udev rules)",
            device.bus_number,
            device.device_address
        ),
        Outcome::PermissionDenied { device } => bail!(
            "Permission denied for OnlyKey at {:03}:{:03}",
            device.bus_number,
            device.device_address
        ),
        Outcome::TransportFailed(e) => Err(e).context("Failed to set OnlyKey time"),
    }
}

/// Handle every plugged-in OnlyKey until Ctrl+C
async fn run_watch<T: Transport>(
    workflow: &SetTimeWorkflow<T>,
    usb_bridge: &UsbBridge,
) -> Result<()> {
    info!("Watching for OnlyKey devices, press Ctrl+C to stop");

    // Devices already connected get the time too
    match workflow.run_until(Trigger::Manual, signal::ctrl_c()).await {
        Some(outcome) => log_outcome(&outcome),
        None => {
            info!("Received Ctrl+C, stopping");
            return Ok(());
        }
    }

    if service::is_systemd() {
        info!("Running under systemd");
    }
    service::notify_ready().context("Failed to notify systemd ready")?;

    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Error waiting for Ctrl+C: {}", e);
                }
                info!("Received Ctrl+C, stopping");
                break;
            }
            event = usb_bridge.recv_event() => match event {
                Ok(UsbEvent::DeviceArrived { device }) => {
                    let Some(outcome) = workflow
                        .run_until(Trigger::Attached(device), signal::ctrl_c())
                        .await
                    else {
                        info!("Received Ctrl+C, stopping");
                        break;
                    };
                    log_outcome(&outcome);
                    if let Outcome::TimeSet { unix_seconds, .. } = outcome
                        && let Err(e) = service::notify_status(&format!("Last set: {}", unix_seconds))
                    {
                        warn!("{:#}", e);
                    }
                }
                Ok(UsbEvent::DeviceLeft { bus_number, device_address }) => {
                    debug!("Device {:03}:{:03} removed", bus_number, device_address);
                }
                Err(e) => {
                    error!("USB event stream closed: {}", e);
                    break;
                }
            },
        }
    }

    service::notify_stopping().context("Failed to notify systemd stopping")?;
    Ok(())
}

fn log_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::TimeSet { device, .. } => debug!(
            "Finished with {:03}:{:03}",
            device.bus_number, device.device_address
        ),
        Outcome::NoMatch => debug!("No OnlyKey to update"),
        Outcome::PermissionDenied { .. } | Outcome::TransportFailed(_) => {
            warn!("OnlyKey time not set")
        }
    }
}
