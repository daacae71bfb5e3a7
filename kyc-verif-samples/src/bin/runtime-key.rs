//! Print this host's runtime license key.
//!
//! Usage:
//!     runtime-key --assets ./assets [--json true] [--type aws-instance] [--usbserial S]

use clap::{ArgAction, Parser};
use kyc_verif::{DeliveryMode, Engine};
use kyc_verif_samples::{check, exit_with, parse_or_exit, SampleError};
use serde_json::json;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "runtime-key")]
#[command(about = "Derive the runtime license key of this host")]
#[command(version)]
struct Args {
    /// Folder holding the model assets
    #[arg(long)]
    assets: String,

    /// Wrap the key in a JSON object
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    json: bool,

    /// Host type: aws-instance, aws-byol, azure-instance or azure-byol
    #[arg(long = "type")]
    host_type: Option<String>,

    /// USB dongle serial
    #[arg(long)]
    usbserial: Option<String>,
}

fn config(args: &Args) -> String {
    let mut config = json!({
        "debug_level": "info",
        "assets_folder": args.assets.replace('\\', "/"),
    });
    if let Some(host_type) = args.host_type.as_deref().filter(|t| !t.is_empty()) {
        config["license_host_type"] = host_type.into();
    }
    if let Some(serial) = args.usbserial.as_deref().filter(|s| !s.is_empty()) {
        config["license_usbserial"] = serial.into();
    }
    config.to_string()
}

fn run(args: &Args) -> Result<(), SampleError> {
    let engine = Engine::new();
    check("init", engine.init(&config(args), DeliveryMode::Sequential))?;

    let key = check(
        "request_runtime_license_key",
        engine.request_runtime_license_key(!args.json),
    )?;
    info!("Runtime license key: {}", key.json());
    println!("{}", key.json());

    check("de_init", engine.de_init())?;
    Ok(())
}

fn main() {
    kyc_verif::logging::init();
    let args: Args = parse_or_exit();
    if let Err(e) = run(&args) {
        exit_with(e);
    }
}
