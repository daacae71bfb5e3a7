//! Parallel-mode delivery tests for Engine

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{encode, ScriptedBackend, MINIMAL_CONFIG};
use image::ImageFormat;
use kyc_verif::{DeliveryMode, Engine, ImageInput, ImageType, KycResult};
use parking_lot::Mutex;

fn parallel_config(threads: i32) -> String {
    serde_json::json!({ "assets_folder": ".", "num_threads": threads }).to_string()
}

#[test]
fn test_every_accepted_call_delivered_before_deinit_returns() {
    let backend = Arc::new(ScriptedBackend::slow(Duration::from_millis(5)));
    let engine = Engine::with_backend(backend.clone());
    let (mode, deliveries) = DeliveryMode::channel();
    assert!(engine.init(&parallel_config(4), mode).is_ok());
    assert!(engine.is_parallel());

    let pixels = [0u8; 64];
    for _ in 0..100 {
        let ack = engine.process(ImageInput::packed(ImageType::Y, &pixels, 8, 8));
        assert_eq!(ack.code(), 1);
        assert!(ack.is_ok());
    }
    assert!(engine.de_init().is_ok());

    // Everything already sits in the channel
    let mut delivered = 0;
    while deliveries.try_recv().is_some() {
        delivered += 1;
    }
    assert_eq!(delivered, 100);
    assert_eq!(backend.evaluated.load(Ordering::SeqCst), 100);
    assert!(deliveries.recv().is_none());
}

#[test]
fn test_callback_runs_off_caller_thread() {
    let caller = thread::current().id();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let names = Arc::new(Mutex::new(HashSet::new()));

    let engine = Engine::with_backend(Arc::new(ScriptedBackend::with_targets(2)));
    let mode = {
        let seen = Arc::clone(&seen);
        let names = Arc::clone(&names);
        DeliveryMode::callback(move |result: &KycResult| {
            assert_ne!(thread::current().id(), caller);
            if let Some(name) = thread::current().name() {
                names.lock().insert(name.to_string());
            }
            seen.lock().push(result.clone());
        })
    };
    assert!(engine.init(&parallel_config(2), mode).is_ok());

    let jpeg = encode(ImageFormat::Jpeg, 16, 16);
    for _ in 0..10 {
        assert_eq!(engine.process_encoded(&jpeg).code(), 1);
    }
    engine.de_init();

    let seen = seen.lock();
    assert_eq!(seen.len(), 10);
    assert!(seen.iter().all(|r| r.code() == 0 && r.num_vizs() == 2));
    assert_eq!(*names.lock(), HashSet::from(["kyc-delivery".to_string()]));
}

#[test]
fn test_concurrent_submitters() {
    let engine = Arc::new(Engine::with_backend(Arc::new(ScriptedBackend::slow(
        Duration::from_millis(1),
    ))));
    let counter = Arc::new(AtomicUsize::new(0));
    let mode = {
        let counter = Arc::clone(&counter);
        DeliveryMode::callback(move |_: &KycResult| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    };
    assert!(engine.init(&parallel_config(3), mode).is_ok());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let pixels = [0u8; 16];
                (0..50)
                    .filter(|_| {
                        engine
                            .process(ImageInput::packed(ImageType::Y, &pixels, 4, 4))
                            .code()
                            == 1
                    })
                    .count()
            })
        })
        .collect();
    let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(accepted, 200);

    engine.de_init();
    assert_eq!(counter.load(Ordering::SeqCst), accepted);
}

#[test]
fn test_failures_are_delivered_too() {
    let backend = Arc::new(ScriptedBackend {
        fail: true,
        ..Default::default()
    });
    let engine = Engine::with_backend(backend);
    let (mode, deliveries) = DeliveryMode::channel();
    assert!(engine.init(MINIMAL_CONFIG, mode).is_ok());

    let pixels = [0u8; 4];
    assert_eq!(
        engine
            .process(ImageInput::packed(ImageType::Y, &pixels, 2, 2))
            .code(),
        1
    );
    let result = deliveries.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(result.code(), -9);
    engine.de_init();
}

#[test]
fn test_drain_timeout_bounds_deinit() {
    let backend = Arc::new(ScriptedBackend::slow(Duration::from_millis(500)));
    let engine = Engine::with_backend(backend).with_drain_timeout(Duration::from_millis(50));
    let (mode, _deliveries) = DeliveryMode::channel();
    assert!(engine.init(&parallel_config(1), mode).is_ok());

    let pixels = [0u8; 4];
    for _ in 0..5 {
        engine.process(ImageInput::packed(ImageType::Y, &pixels, 2, 2));
    }

    let started = Instant::now();
    assert!(engine.de_init().is_ok());
    assert!(started.elapsed() < Duration::from_millis(450));
    assert!(!engine.is_ready());
}

#[test]
fn test_deliveries_wait_for() {
    let engine = Engine::new();
    let (mode, deliveries) = DeliveryMode::channel();
    assert!(engine.init(&parallel_config(2), mode).is_ok());

    let pixels = [0u8; 4];
    for _ in 0..3 {
        engine.process(ImageInput::packed(ImageType::Y, &pixels, 2, 2));
    }
    let results = deliveries.wait_for(3, Duration::from_secs(5));
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.code() == 0 && r.json().is_empty()));
    engine.de_init();
}

#[test]
fn test_process_racing_deinit_is_accepted_or_rejected() {
    const SUBMITTERS: usize = 4;
    let backend = Arc::new(ScriptedBackend::slow(Duration::from_millis(1)));
    let engine = Arc::new(Engine::with_backend(backend.clone()));
    let (mode, deliveries) = DeliveryMode::channel();
    assert!(engine.init(&parallel_config(2), mode).is_ok());

    let submitters: Vec<_> = (0..SUBMITTERS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let pixels = [0u8; 16];
                let mut accepted = 0usize;
                for _ in 0..10_000 {
                    let input = ImageInput::packed(ImageType::Y, &pixels, 4, 4);
                    let result = engine.process(input);
                    match result.code() {
                        1 => accepted += 1,
                        -1 => break,
                        other => panic!("unexpected code {} ({})", other, result.phrase()),
                    }
                }
                accepted
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    assert!(engine.de_init().is_ok());

    let accepted: usize = submitters.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(accepted > 0);

    let mut delivered = 0;
    while let Some(result) = deliveries.try_recv() {
        assert_eq!(result.code(), 0);
        delivered += 1;
    }
    assert_eq!(delivered, accepted);
    assert_eq!(backend.evaluated.load(Ordering::SeqCst), accepted);
}
