//! Measure sustained throughput on one image.
//!
//! Usage:
//!     benchmark --image passport.jpg --assets ./assets [--loops 20] [--parallel true]

use std::time::{Duration, Instant};

use clap::{ArgAction, Parser};
use kyc_verif::{DeliveryMode, Engine, ImageType, PackedImage};
use kyc_verif_samples::{
    build_config, check, display_json, exit_with, parse_or_exit, read_file, ConfigOptions,
    SampleError, BATCH_DELIVERY_TIMEOUT_MS,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "benchmark")]
#[command(about = "Benchmark the KYC verification engine")]
#[command(version)]
struct Args {
    /// Image with the document to verify
    #[arg(long)]
    image: String,

    /// Folder holding the model assets
    #[arg(long)]
    assets: String,

    /// Number of timed process calls
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..))]
    loops: u32,

    /// Deliver results asynchronously
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    parallel: bool,

    /// Enable GPU memory control
    #[arg(long = "gpu_ctrl_mem", default_value_t = false, action = ArgAction::Set)]
    gpu_ctrl_mem: bool,

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
    let bytes = read_file(&args.image)?;
    let rgb = image::load_from_memory(&bytes)
        .map_err(|e| SampleError::Decode {
            path: args.image.clone(),
            reason: e.to_string(),
        })?
        .to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    let pixels = rgb.into_raw();

    let config = build_config(&ConfigOptions {
        assets_folder: &args.assets,
        vino_activation: &args.vino_activation,
        token_file: args.tokenfile.as_deref(),
        token_data: args.tokendata.as_deref(),
        gpu_ctrl_memory: Some(args.gpu_ctrl_mem),
    });

    let engine = Engine::new();
    let (mode, deliveries) = if args.parallel {
        let (mode, deliveries) = DeliveryMode::channel();
        (mode, Some(deliveries))
    } else {
        (DeliveryMode::Sequential, None)
    };
    check("init", engine.init(&config, mode))?;

    let frame = PackedImage::new(ImageType::Rgb24, &pixels, width, height);
    let wait = Duration::from_millis(BATCH_DELIVERY_TIMEOUT_MS);

    // Warm up: first call loads models
    check("warm-up", engine.process_packed(frame))?;
    if let Some(deliveries) = &deliveries {
        if deliveries.wait_for(1, wait).len() != 1 {
            return Err(SampleError::Delivery("warm-up result never delivered".into()));
        }
    }

    let loops = args.loops as usize;
    let started = Instant::now();
    let mut last = None;
    for _ in 0..loops {
        last = Some(check("process", engine.process_packed(frame))?);
    }
    if let Some(deliveries) = &deliveries {
        let delivered = deliveries.wait_for(loops, wait);
        if delivered.len() != loops {
            return Err(SampleError::Delivery(format!(
                "{} of {} results delivered",
                delivered.len(),
                loops
            )));
        }
        last = delivered.into_iter().last();
    }
    let elapsed = started.elapsed();

    let fps = loops as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    info!(
        "Elapsed time (KYC) = [[[ {:.2} millis ]]], estimated frame rate: {:.2} fps",
        elapsed.as_secs_f64() * 1000.0,
        fps
    );
    if let Some(result) = last {
        info!("Last result: {}", display_json(&result));
    }

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loops_default_and_bounds() {
        let args = Args::try_parse_from(["benchmark", "--image", "i", "--assets", "a"]).unwrap();
        assert_eq!(args.loops, 20);
        assert!(!args.gpu_ctrl_mem);

        assert!(
            Args::try_parse_from(["benchmark", "--image", "i", "--assets", "a", "--loops", "0"])
                .is_err()
        );
        let args = Args::try_parse_from([
            "benchmark", "--image", "i", "--assets", "a", "--loops", "3", "--gpu_ctrl_mem", "true",
        ])
        .unwrap();
        assert_eq!(args.loops, 3);
        assert!(args.gpu_ctrl_mem);
    }
}
