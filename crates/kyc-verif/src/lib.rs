//! KYC Verification Engine
//!
//! Know-Your-Customer document/face verification facade. The inference
//! pipeline (detection, OCR, rectification) sits behind the
//! [`VerificationBackend`] trait; this crate owns everything around it:
//! lifecycle, input validation, configuration schema, parallel result
//! delivery and runtime license keys.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐     ┌───────────┐
//! │ ImageInput  │────▶│    Engine    │────▶│   Backend    │────▶│ KycResult │
//! │ (borrowed)  │     │ (lifecycle)  │     │ (evaluation) │     │  (owned)  │
//! └─────────────┘     └──────┬───────┘     └──────────────┘     └─────┬─────┘
//!                            │ parallel mode                          │
//!                            ▼                                        ▼
//!                     ┌──────────────┐     ┌──────────────┐     ┌───────────┐
//!                     │ worker pool  │────▶│ delivery ctx │────▶│ channel / │
//!                     │ (kyc-worker) │     │(kyc-delivery)│     │ callback  │
//!                     └──────────────┘     └──────────────┘     └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kyc_verif::{DeliveryMode, Engine, ImageInput};
//!
//! let engine = Engine::new();
//! let (mode, deliveries) = DeliveryMode::channel();
//! assert!(engine.init(r#"{"assets_folder": "./assets"}"#, mode).is_ok());
//!
//! let ack = engine.process(ImageInput::encoded(&jpeg_bytes));
//! assert!(ack.is_ok());
//! if let Some(result) = deliveries.recv_timeout(std::time::Duration::from_secs(2)) {
//!     println!("{} targets: {}", result.num_vizs(), result.json());
//! }
//!
//! engine.de_init();
//! ```

pub mod backend;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod exif;
pub mod input;
pub mod license;
pub mod logging;
mod pipeline;
pub mod result;

// Re-export main types
pub use backend::{BaselineBackend, BoundingBox, VerificationBackend, Viz};
pub use config::{ConfigError, KycConfig};
pub use delivery::{Deliveries, DeliveryMode, ParallelDeliveryCallback};
pub use engine::Engine;
pub use error::{KycError, Result};
pub use input::{EncodedImage, Frame, ImageInput, ImageType, PackedImage, PlanarImage, Plane};
pub use result::KycResult;

/// SDK version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
