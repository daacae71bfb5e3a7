//! Single-frame evaluation shared by the sequential path and the workers.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::backend::{postprocess, VerificationBackend};
use crate::config::KycConfig;
use crate::error::{KycError, Result};
use crate::input::FrameSource;
use crate::result::KycResult;

pub(crate) struct Pipeline {
    backend: Arc<dyn VerificationBackend>,
    config: KycConfig,
    frame_count: AtomicU64,
}

impl Pipeline {
    pub(crate) fn new(backend: Arc<dyn VerificationBackend>, config: KycConfig) -> Self {
        Self {
            backend,
            config,
            frame_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn config(&self) -> &KycConfig {
        &self.config
    }

    /// Evaluate one input into its terminal result. Never panics.
    pub(crate) fn run(&self, source: FrameSource) -> KycResult {
        let index = self.frame_count.fetch_add(1, Ordering::Relaxed);

        if let Some(dir) = self.config.debug_dump_dir() {
            if let Err(e) = source.dump(&dir, index) {
                warn!("Failed to dump input frame {}: {}", index, e);
            }
        }

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.evaluate(source)))
            .unwrap_or_else(|payload| {
                Err(KycError::Backend(format!(
                    "backend '{}' panicked: {}",
                    self.backend.name(),
                    panic_message(payload.as_ref())
                )))
            });

        match &outcome {
            Ok(result) => debug!(
                frame = index,
                targets = result.num_vizs(),
                elapsed_us = started.elapsed().as_micros() as u64,
                "Frame evaluated"
            ),
            Err(e) => warn!(frame = index, "Frame evaluation failed: {}", e),
        }
        KycResult::from(outcome)
    }

    fn evaluate(&self, source: FrameSource) -> Result<KycResult> {
        let frame = source.into_frame()?;
        let vizs = self.backend.evaluate(&frame, &self.config)?;
        let vizs = postprocess(vizs, self.config.detect_threshold);
        KycResult::from_vizs(&vizs)
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
