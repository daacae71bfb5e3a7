//! Verification engine facade
//!
//! Lifecycle: `Uninitialized --init--> Ready --de_init--> Uninitialized`.
//! Every processing call requires `Ready`. In sequential mode `process`
//! blocks and returns the evaluation result; in parallel mode it returns
//! [`KycResult::accepted`] and the result arrives later on the
//! [`DeliveryMode`] sink.
//!
//! `de_init` waits, bounded by the drain timeout, until every call that
//! already entered the engine has finished and every accepted parallel
//! input has been delivered.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::backend::{BaselineBackend, VerificationBackend};
use crate::config::{ConfigError, KycConfig};
use crate::delivery::{Dispatcher, DeliveryMode};
use crate::error::{KycError, Result};
use crate::exif;
use crate::input::{ImageInput, PackedImage, PlanarImage};
use crate::license;
use crate::logging::prefix;
use crate::pipeline::Pipeline;
use crate::result::KycResult;

/// Default bound on how long `de_init` waits for outstanding work.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// State of one `init`..`de_init` session.
struct Session {
    pipeline: Arc<Pipeline>,
    dispatcher: Option<Dispatcher>,
    licensed: bool,
    /// Held shared by every call inside the engine; `false` once closed
    gate: RwLock<bool>,
}

/// Thread-safe verification engine
pub struct Engine {
    backend: Arc<dyn VerificationBackend>,
    drain_timeout: Duration,
    /// Serializes init/de_init
    lifecycle: Mutex<()>,
    session: RwLock<Option<Arc<Session>>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Engine backed by [`BaselineBackend`].
    pub fn new() -> Self {
        Self::with_backend(Arc::new(BaselineBackend))
    }

    pub fn with_backend(backend: Arc<dyn VerificationBackend>) -> Self {
        Self {
            backend,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            lifecycle: Mutex::new(()),
            session: RwLock::new(None),
        }
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn is_ready(&self) -> bool {
        self.session.read().is_some()
    }

    /// Whether the active session delivers results asynchronously.
    pub fn is_parallel(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .is_some_and(|s| s.dispatcher.is_some())
    }

    /// Configuration of the active session.
    pub fn config(&self) -> Option<KycConfig> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.pipeline.config().clone())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Validate `json_config` and start a session.
    pub fn init(&self, json_config: &str, mode: DeliveryMode) -> KycResult {
        self.try_init(json_config, mode).into()
    }

    /// Same as [`init`](Self::init) from an already typed configuration.
    pub fn init_with_config(&self, config: &KycConfig, mode: DeliveryMode) -> KycResult {
        match config.to_json() {
            Ok(json) => self.init(&json, mode),
            Err(e) => KycError::from(ConfigError::Malformed(e.to_string())).into(),
        }
    }

    fn try_init(&self, json_config: &str, mode: DeliveryMode) -> Result<KycResult> {
        let _lifecycle = self.lifecycle.lock();
        if self.session.read().is_some() {
            return Err(KycError::AlreadyInitialized);
        }

        let config = KycConfig::from_json(json_config)?;
        let licensed = config.load_license_token()?.is_some();
        if !licensed {
            info!("{} No license token provided, running in trial mode", prefix::LICENSE);
        }

        self.backend.prepare(&config)?;
        let threads = config.resolved_threads();
        let pipeline = Arc::new(Pipeline::new(Arc::clone(&self.backend), config));

        let dispatcher = match mode {
            DeliveryMode::Sequential => None,
            DeliveryMode::Parallel(sink) => {
                match Dispatcher::start(Arc::clone(&pipeline), threads, sink) {
                    Ok(dispatcher) => Some(dispatcher),
                    Err(e) => {
                        self.backend.release();
                        return Err(e);
                    }
                }
            }
        };

        info!(
            "{} Engine initialized (backend: {}, mode: {}, threads: {})",
            prefix::OPEN,
            self.backend.name(),
            if dispatcher.is_some() { "parallel" } else { "sequential" },
            threads
        );

        *self.session.write() = Some(Arc::new(Session {
            pipeline,
            dispatcher,
            licensed,
            gate: RwLock::new(true),
        }));
        Ok(KycResult::bodyless_ok())
    }

    /// End the session, draining outstanding work first.
    ///
    /// No-op success when not initialized.
    pub fn de_init(&self) -> KycResult {
        let _lifecycle = self.lifecycle.lock();
        let Some(session) = self.session.write().take() else {
            debug!("de_init on uninitialized engine");
            return KycResult::bodyless_ok();
        };

        let deadline = Instant::now() + self.drain_timeout;
        match session.gate.try_write_until(deadline) {
            Some(mut open) => *open = false,
            None => error!(
                "{} Calls still running after {:?}, continuing shutdown",
                prefix::CLOSE,
                self.drain_timeout
            ),
        }

        if let Some(dispatcher) = &session.dispatcher {
            dispatcher.shutdown(deadline);
        }
        self.backend.release();

        info!(
            "{} Engine de-initialized (licensed: {})",
            prefix::CLOSE,
            session.licensed
        );
        KycResult::bodyless_ok()
    }

    // ========================================================================
    // Processing
    // ========================================================================

    /// Verify one image.
    pub fn process<'a>(&self, input: impl Into<ImageInput<'a>>) -> KycResult {
        self.try_process(input.into()).into()
    }

    pub fn process_packed(&self, image: PackedImage<'_>) -> KycResult {
        self.process(image)
    }

    pub fn process_planar(&self, image: PlanarImage<'_>) -> KycResult {
        self.process(image)
    }

    /// Verify an encoded JPEG/PNG/BMP buffer.
    pub fn process_encoded(&self, bytes: &[u8]) -> KycResult {
        self.process(ImageInput::encoded(bytes))
    }

    fn try_process(&self, input: ImageInput<'_>) -> Result<KycResult> {
        let session = self.active()?;
        let open = session.gate.read();
        if !*open {
            return Err(KycError::NotInitialized);
        }

        let source = input.to_source()?;
        match &session.dispatcher {
            None => Ok(session.pipeline.run(source)),
            Some(dispatcher) => {
                dispatcher.submit(source)?;
                Ok(KycResult::accepted())
            }
        }
    }

    // ========================================================================
    // Utilities
    // ========================================================================

    /// EXIF orientation (1-8) of a JPEG buffer. Needs no session.
    pub fn exif_orientation(bytes: &[u8]) -> Result<u8> {
        exif::orientation(bytes)
    }

    /// Derive this host's runtime license key.
    ///
    /// `raw` puts the bare key in `json`; otherwise `json` is `{"key": ...}`.
    pub fn request_runtime_license_key(&self, raw: bool) -> KycResult {
        match self.active() {
            Ok(session) => {
                license::key_result(license::runtime_key(session.pipeline.config()), raw)
            }
            Err(e) => e.into(),
        }
    }

    fn active(&self) -> Result<Arc<Session>> {
        self.session
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(KycError::NotInitialized)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.session.get_mut().is_some() {
            self.de_init();
        }
    }
}
