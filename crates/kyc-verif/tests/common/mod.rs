//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use image::{ImageFormat, RgbImage};
use kyc_verif::{BoundingBox, Frame, KycConfig, KycError, Result, VerificationBackend, Viz};

pub const MINIMAL_CONFIG: &str = r#"{"assets_folder": "."}"#;

/// Backend whose behavior is fixed up front.
#[derive(Default)]
pub struct ScriptedBackend {
    pub targets: usize,
    pub delay: Duration,
    pub fail: bool,
    pub panic: bool,
    pub evaluated: AtomicUsize,
    pub released: AtomicUsize,
}

impl ScriptedBackend {
    pub fn with_targets(targets: usize) -> Self {
        Self {
            targets,
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }
}

impl VerificationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn evaluate(&self, frame: &Frame, _config: &KycConfig) -> Result<Vec<Viz>> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.evaluated.fetch_add(1, Ordering::SeqCst);
        if self.panic {
            panic!("scripted panic");
        }
        if self.fail {
            return Err(KycError::Backend("scripted failure".to_string()));
        }
        Ok((0..self.targets)
            .map(|i| {
                Viz::new(
                    "id_card",
                    0.9,
                    BoundingBox::new(i as f32 * 1000.0, 0.0, frame.width as f32, 10.0),
                )
            })
            .collect())
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn encode(format: ImageFormat, width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7) as u8, (y * 13) as u8, 128])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    out.into_inner()
}

/// JPEG with an EXIF APP1 carrying `orientation`, inserted after SOI.
pub fn jpeg_with_exif(width: u32, height: u32, orientation: u16) -> Vec<u8> {
    let jpeg = encode(ImageFormat::Jpeg, width, height);

    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"II");
    tiff.extend_from_slice(&42u16.to_le_bytes());
    tiff.extend_from_slice(&8u32.to_le_bytes());
    tiff.extend_from_slice(&1u16.to_le_bytes());
    tiff.extend_from_slice(&0x0112u16.to_le_bytes());
    tiff.extend_from_slice(&3u16.to_le_bytes());
    tiff.extend_from_slice(&1u32.to_le_bytes());
    tiff.extend_from_slice(&orientation.to_le_bytes());
    tiff.extend_from_slice(&[0, 0]);
    tiff.extend_from_slice(&0u32.to_le_bytes());

    let mut out = jpeg[..2].to_vec();
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(&tiff);
    out.extend_from_slice(&jpeg[2..]);
    out
}
