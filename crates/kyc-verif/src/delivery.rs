//! Parallel delivery
//!
//! In parallel mode `process` only validates and enqueues its input. A
//! pool of `kyc-worker` threads evaluates queued frames and pushes each
//! terminal result onto a bounded pending queue; a single `kyc-delivery`
//! thread pops them and hands them to the caller, either through a
//! [`Deliveries`] channel the caller drains or through a
//! [`ParallelDeliveryCallback`].
//!
//! ```text
//! process() ──▶ [job queue] ──▶ kyc-worker-N ──▶ [pending queue] ──▶ kyc-delivery ──▶ sink
//! ```
//!
//! Every accepted input yields exactly one delivery. Shutdown closes the
//! job queue and waits, bounded, until every thread has drained and exited.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::error::{KycError, Result};
use crate::input::FrameSource;
use crate::logging::prefix;
use crate::pipeline::{panic_message, Pipeline};
use crate::result::KycResult;

/// Inputs waiting for a worker.
pub const JOB_QUEUE_CAPACITY: usize = 64;
/// Results waiting for the delivery thread.
pub const PENDING_QUEUE_CAPACITY: usize = 64;

/// Receives results on the delivery thread.
///
/// Runs on the shared delivery context: a slow callback delays every
/// later delivery.
pub trait ParallelDeliveryCallback: Send + Sync {
    fn on_new_result(&self, result: &KycResult);
}

impl<F> ParallelDeliveryCallback for F
where
    F: Fn(&KycResult) + Send + Sync,
{
    fn on_new_result(&self, result: &KycResult) {
        self(result)
    }
}

/// Where parallel-mode results go.
#[derive(Clone)]
pub enum DeliverySink {
    Channel(Sender<KycResult>),
    Callback(Arc<dyn ParallelDeliveryCallback>),
}

impl DeliverySink {
    fn deliver(&self, result: KycResult) {
        match self {
            DeliverySink::Channel(tx) => {
                if tx.send(result).is_err() {
                    warn!("{} Delivery receiver dropped, discarding result", prefix::DELIVERY);
                }
            }
            DeliverySink::Callback(cb) => {
                let call = panic::catch_unwind(AssertUnwindSafe(|| cb.on_new_result(&result)));
                if let Err(payload) = call {
                    error!(
                        "{} Delivery callback panicked: {}",
                        prefix::DELIVERY,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
    }
}

/// How `process` hands back its results.
#[derive(Clone, Default)]
pub enum DeliveryMode {
    /// `process` blocks and returns the result itself
    #[default]
    Sequential,
    /// `process` returns an acknowledgement; results arrive on the sink
    Parallel(DeliverySink),
}

impl DeliveryMode {
    /// Parallel mode delivering into a channel the caller drains.
    pub fn channel() -> (Self, Deliveries) {
        let (tx, rx) = unbounded();
        (
            DeliveryMode::Parallel(DeliverySink::Channel(tx)),
            Deliveries { rx },
        )
    }

    /// Parallel mode invoking `callback` on the delivery thread.
    pub fn callback(callback: impl ParallelDeliveryCallback + 'static) -> Self {
        DeliveryMode::Parallel(DeliverySink::Callback(Arc::new(callback)))
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, DeliveryMode::Parallel(_))
    }
}

impl fmt::Debug for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Sequential => f.write_str("Sequential"),
            DeliveryMode::Parallel(DeliverySink::Channel(_)) => f.write_str("Parallel(channel)"),
            DeliveryMode::Parallel(DeliverySink::Callback(_)) => f.write_str("Parallel(callback)"),
        }
    }
}

/// Caller side of a channel delivery sink.
///
/// Disconnects once the session that owned the sender has been
/// de-initialized and every pending result was handed over.
#[derive(Debug, Clone)]
pub struct Deliveries {
    rx: Receiver<KycResult>,
}

impl Deliveries {
    /// Block until the next result. `None` once the session is gone.
    pub fn recv(&self) -> Option<KycResult> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<KycResult> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<KycResult> {
        self.rx.try_recv().ok()
    }

    /// Collect up to `count` results, giving up after `timeout`.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<KycResult> {
        let deadline = Instant::now() + timeout;
        let mut results = Vec::with_capacity(count);
        while results.len() < count {
            match self.rx.recv_deadline(deadline) {
                Ok(result) => results.push(result),
                Err(_) => break,
            }
        }
        results
    }

    pub fn iter(&self) -> impl Iterator<Item = KycResult> + '_ {
        self.rx.iter()
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Worker pool plus delivery thread of one parallel session.
pub(crate) struct Dispatcher {
    jobs: Mutex<Option<Sender<FrameSource>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    /// Never receives; disconnects when the last thread exits
    done: Receiver<()>,
    in_flight: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub(crate) fn start(pipeline: Arc<Pipeline>, workers: usize, sink: DeliverySink) -> Result<Self> {
        let (job_tx, job_rx) = bounded::<FrameSource>(JOB_QUEUE_CAPACITY);
        let (pending_tx, pending_rx) = bounded::<KycResult>(PENDING_QUEUE_CAPACITY);
        let (done_tx, done_rx) = bounded::<()>(0);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let mut threads = Vec::with_capacity(workers + 1);

        for id in 0..workers.max(1) {
            let job_rx = job_rx.clone();
            let pending_tx = pending_tx.clone();
            let pipeline = Arc::clone(&pipeline);
            let done_tx = done_tx.clone();

            let handle = thread::Builder::new()
                .name(format!("kyc-worker-{}", id))
                .spawn(move || {
                    let _done = done_tx;
                    for source in job_rx.iter() {
                        let result = pipeline.run(source);
                        if pending_tx.send(result).is_err() {
                            error!("Delivery thread gone, worker {} stopping", id);
                            break;
                        }
                    }
                    debug!("Worker {} exiting", id);
                })?;
            threads.push(handle);
        }
        // Only workers may feed the pending queue
        drop(pending_tx);

        let delivery_in_flight = Arc::clone(&in_flight);
        let handle = thread::Builder::new()
            .name("kyc-delivery".to_string())
            .spawn(move || {
                let _done = done_tx;
                for result in pending_rx.iter() {
                    sink.deliver(result);
                    delivery_in_flight.fetch_sub(1, Ordering::AcqRel);
                }
                debug!("{} Delivery thread exiting", prefix::DELIVERY);
            })?;
        threads.push(handle);

        Ok(Self {
            jobs: Mutex::new(Some(job_tx)),
            threads: Mutex::new(threads),
            done: done_rx,
            in_flight,
        })
    }

    /// Enqueue one input. Blocks while the job queue is full.
    pub(crate) fn submit(&self, source: FrameSource) -> Result<()> {
        // Clone so a blocked send never holds the lock shutdown needs
        let sender = self.jobs.lock().clone().ok_or(KycError::ShuttingDown)?;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        sender.send(source).map_err(|_| {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            KycError::ShuttingDown
        })
    }

    /// Accepted inputs not yet delivered.
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Close the job queue and wait until every accepted input has been
    /// delivered. Returns `false` if `deadline` passed first; the
    /// remaining threads are then detached.
    pub(crate) fn shutdown(&self, deadline: Instant) -> bool {
        self.jobs.lock().take();
        debug!(
            "{} Draining {} in-flight deliveries",
            prefix::DELIVERY,
            self.in_flight()
        );

        match self.done.recv_deadline(deadline) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                for handle in self.threads.lock().drain(..) {
                    if handle.join().is_err() {
                        error!("Dispatcher thread panicked");
                    }
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                error!(
                    "{} Drain deadline exceeded with {} deliveries outstanding, detaching threads",
                    prefix::DELIVERY,
                    self.in_flight()
                );
                self.threads.lock().clear();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BaselineBackend;
    use crate::config::KycConfig;
    use crate::input::{ImageInput, ImageType};

    fn source() -> FrameSource {
        let data = [0u8; 4];
        ImageInput::packed(ImageType::Y, &data, 2, 2)
            .to_source()
            .unwrap()
    }

    fn pipeline() -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            Arc::new(BaselineBackend),
            KycConfig::with_assets("."),
        ))
    }

    #[test]
    fn test_channel_delivers_each_submission_once() {
        let (mode, deliveries) = DeliveryMode::channel();
        let DeliveryMode::Parallel(sink) = mode else {
            panic!("channel mode must be parallel");
        };
        let dispatcher = Dispatcher::start(pipeline(), 3, sink).unwrap();

        for _ in 0..10 {
            dispatcher.submit(source()).unwrap();
        }
        assert!(dispatcher.shutdown(Instant::now() + Duration::from_secs(10)));
        assert_eq!(dispatcher.in_flight(), 0);

        let results: Vec<KycResult> = deliveries.iter().collect();
        assert_eq!(results.len(), 10);
        assert!(results.iter().all(KycResult::is_ok));
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let (mode, _deliveries) = DeliveryMode::channel();
        let DeliveryMode::Parallel(sink) = mode else {
            panic!("channel mode must be parallel");
        };
        let dispatcher = Dispatcher::start(pipeline(), 1, sink).unwrap();
        assert!(dispatcher.shutdown(Instant::now() + Duration::from_secs(10)));
        assert_eq!(dispatcher.submit(source()), Err(KycError::ShuttingDown));
    }

    #[test]
    fn test_panicking_callback_does_not_stop_delivery() {
        let (tx, rx) = unbounded();
        let mode = DeliveryMode::callback(move |result: &KycResult| {
            tx.send(result.clone()).unwrap();
            panic!("consumer bug");
        });
        let DeliveryMode::Parallel(sink) = mode else {
            panic!("callback mode must be parallel");
        };
        let dispatcher = Dispatcher::start(pipeline(), 2, sink).unwrap();
        for _ in 0..3 {
            dispatcher.submit(source()).unwrap();
        }
        assert!(dispatcher.shutdown(Instant::now() + Duration::from_secs(10)));
        assert_eq!(rx.try_iter().count(), 3);
    }

    #[test]
    fn test_wait_for_times_out_short() {
        let (mode, deliveries) = DeliveryMode::channel();
        assert!(mode.is_parallel());
        let started = Instant::now();
        let results = deliveries.wait_for(2, Duration::from_millis(50));
        assert!(results.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(50));
        drop(mode);
    }

    #[test]
    fn test_mode_debug() {
        assert_eq!(format!("{:?}", DeliveryMode::Sequential), "Sequential");
        assert_eq!(
            format!("{:?}", DeliveryMode::callback(|_: &KycResult| {})),
            "Parallel(callback)"
        );
    }
}
