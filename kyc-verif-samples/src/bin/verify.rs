//! Verify a single document image.
//!
//! Usage:
//!     verify --image passport.jpg --assets ./assets [--parallel true]

use std::time::Duration;

use clap::{ArgAction, Parser};
use kyc_verif::{DeliveryMode, Engine};
use kyc_verif_samples::{
    build_config, check, display_json, exit_with, parse_or_exit, read_file, ConfigOptions,
    SampleError, SINGLE_DELIVERY_TIMEOUT_MS,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "verify")]
#[command(about = "Verify a KYC document image (JPEG/PNG/BMP)")]
#[command(version)]
struct Args {
    /// Image with the document to verify
    #[arg(long)]
    image: String,

    /// Folder holding the model assets
    #[arg(long)]
    assets: String,

    /// Deliver the result asynchronously
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    parallel: bool,

    /// OpenVINO activation: auto, on or off
    #[arg(long = "vino_activation", default_value = "auto")]
    vino_activation: String,

    /// License token file
    #[arg(long)]
    tokenfile: Option<String>,

    /// Inline license token (base64)
    #[arg(long)]
    tokendata: Option<String>,
}

fn run(args: &Args) -> Result<(), SampleError> {
    let image = read_file(&args.image)?;
    let config = build_config(&ConfigOptions {
        assets_folder: &args.assets,
        vino_activation: &args.vino_activation,
        token_file: args.tokenfile.as_deref(),
        token_data: args.tokendata.as_deref(),
        gpu_ctrl_memory: None,
    });

    let engine = Engine::new();
    let (mode, deliveries) = if args.parallel {
        let (mode, deliveries) = DeliveryMode::channel();
        (mode, Some(deliveries))
    } else {
        (DeliveryMode::Sequential, None)
    };
    info!("Initializing engine (parallel: {})", args.parallel);
    check("init", engine.init(&config, mode))?;

    let result = check("process", engine.process_encoded(&image))?;
    let result = match deliveries {
        Some(deliveries) => deliveries
            .recv_timeout(Duration::from_millis(SINGLE_DELIVERY_TIMEOUT_MS))
            .ok_or_else(|| SampleError::Delivery("timed out waiting for the result".into()))
            .and_then(|delivered| check("delivery", delivered))?,
        None => result,
    };
    info!(
        "Result ({}, {}, {} targets): {}",
        result.code(),
        result.phrase(),
        result.num_vizs(),
        display_json(&result)
    );

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
