//! Integration tests for Bootbridge
//!
//! These tests drive the full bootstrap sequence through the facade crate:
//! - bootbridge-core: bus, readiness, loader, bridge, overlay
//! - bootbridge-wasm: wasmtime runtime (with the `wasm` feature)
//! - bootbridge: configuration loading

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bootbridge::testing::{ScriptedRuntime, StaticFetcher};
use bootbridge::{
    BootstrapConfig, Bootstrapper, Bridge, CollectingReporter, Error, EventBus, LoadingState,
    Message, MessageKind, Overlay, ReadinessSignal, ReplayPolicy,
};
use serde_json::{json, Value};

#[derive(Default)]
struct RecordingOverlay {
    events: Mutex<Vec<String>>,
}

impl Overlay for RecordingOverlay {
    fn show(&self) {
        self.events.lock().unwrap().push("show".to_string());
    }

    fn dismiss(&self) {
        self.events.lock().unwrap().push("dismiss".to_string());
    }

    fn fail(&self, error: &Error) {
        self.events.lock().unwrap().push(format!("fail:{}", error.code()));
    }
}

fn ready_immediately() -> ScriptedRuntime {
    ScriptedRuntime::new(|ctx| {
        ctx.signal_ready();
        Ok(())
    })
}

// ============================================================================
// Event Bus
// ============================================================================

#[test]
fn test_publish_reaches_subscribers_in_order_once() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    for name in ["a", "b", "c"] {
        let seen = Arc::clone(&seen);
        bus.subscribe("updates", move |args: &[Value]| {
            seen.lock().unwrap().push((name, args.to_vec()));
        });
    }

    assert_eq!(bus.publish("updates", &[json!(1), json!("two")]), 3);

    let seen = seen.lock().unwrap();
    assert_eq!(
        seen.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
        vec!["a", "b", "c"]
    );
    assert!(seen.iter().all(|(_, args)| *args == vec![json!(1), json!("two")]));
}

#[test]
fn test_panicking_subscriber_does_not_stop_delivery() {
    let bus = EventBus::new();
    let count = Arc::new(AtomicUsize::new(0));
    bus.subscribe("updates", |_args: &[Value]| panic!("subscriber failure"));
    let c = Arc::clone(&count);
    bus.subscribe("updates", move |_args: &[Value]| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    bus.publish("updates", &[]);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Readiness Signal
// ============================================================================

#[test]
fn test_fire_twice_runs_each_subscriber_once() {
    let signal = ReadinessSignal::new(EventBus::new(), "ready", ReplayPolicy::Latch);
    let count = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let c = Arc::clone(&count);
        signal.subscribe(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert!(signal.fire());
    assert!(!signal.fire());
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn test_late_subscriber_latch_and_event() {
    for (policy, expected) in [(ReplayPolicy::Latch, 1), (ReplayPolicy::Event, 0)] {
        let signal = ReadinessSignal::new(EventBus::new(), "ready", policy);
        signal.fire();

        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        signal.subscribe(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), expected, "{:?}", policy);
    }
}

// ============================================================================
// Message Bridge
// ============================================================================

#[test]
fn test_ping_message_delivered_verbatim() {
    let bridge = Bridge::new(EventBus::new(), "messages");
    let received = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&received);
    bridge.on_message(move |kind, payload| {
        r.lock().unwrap().push(Message::new(kind, payload.clone()));
    });

    bridge.send_message("ping", json!({"n": 1}));

    assert_eq!(
        *received.lock().unwrap(),
        vec![Message::new("ping", json!({"n": 1}))]
    );
}

#[test]
fn test_warning_reaches_only_warning_listeners() {
    let bridge = Bridge::new(EventBus::new(), "messages");
    let warnings = Arc::new(Mutex::new(Vec::new()));
    let w = Arc::clone(&warnings);
    bridge.on_kind(MessageKind::Warning, move |text| {
        w.lock().unwrap().push(text.to_string());
    });

    bridge.send_info("loading");
    bridge.send_warning("slow network");

    assert_eq!(*warnings.lock().unwrap(), vec!["slow network".to_string()]);
}

// ============================================================================
// Bootstrap sequence
// ============================================================================

#[tokio::test]
async fn test_end_to_end_prior_subscribers_notified_once_in_order() {
    let overlay = Arc::new(RecordingOverlay::default());
    let bootstrapper = Bootstrapper::new(
        BootstrapConfig::with_source("https://cdn.test/app.wasm"),
        ready_immediately(),
        (),
    )
    .unwrap()
    .with_fetcher(Arc::new(StaticFetcher::ok(vec![0, 97, 115, 109])))
    .with_overlay(overlay.clone());

    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..3 {
        let order = Arc::clone(&order);
        bootstrapper.readiness().subscribe(move || order.lock().unwrap().push(i));
    }

    let session = bootstrapper.start().await.unwrap();
    tokio_test::assert_ok!(session.wait_ready().await);

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(session.state(), LoadingState::Ready);
    assert_eq!(*overlay.events.lock().unwrap(), vec!["show", "dismiss"]);
    assert!(session.shutdown().await);
}

#[tokio::test]
async fn test_fetch_failure_never_fires_and_keeps_overlay() {
    let overlay = Arc::new(RecordingOverlay::default());
    let reporter = Arc::new(CollectingReporter::new());
    let bootstrapper = Bootstrapper::new(
        BootstrapConfig::with_source("https://cdn.test/app.wasm"),
        ready_immediately(),
        (),
    )
    .unwrap()
    .with_fetcher(Arc::new(StaticFetcher::failing("404 Not Found")))
    .with_overlay(overlay.clone())
    .with_reporter(reporter.clone());

    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    bootstrapper.readiness().subscribe(move || {
        f.fetch_add(1, Ordering::SeqCst);
    });
    let state = bootstrapper.state().clone();

    let err = bootstrapper.start().await.unwrap_err();

    assert!(matches!(err, Error::Fetch { .. }));
    assert_eq!(state.get(), LoadingState::Failed);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(
        *overlay.events.lock().unwrap(),
        vec!["show".to_string(), "fail:fetch_error".to_string()]
    );
    assert_eq!(reporter.errors().len(), 1);
}

#[tokio::test]
async fn test_file_source_through_default_fetcher() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.bin");
    std::fs::write(&path, b"payload").unwrap();

    let session = Bootstrapper::new(
        BootstrapConfig::with_source(path.to_string_lossy()),
        ready_immediately(),
        (),
    )
    .unwrap()
    .start()
    .await
    .unwrap();

    tokio_test::assert_ok!(session.wait_ready().await);
}

#[tokio::test]
async fn test_missing_file_source_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.wasm");

    let err = Bootstrapper::new(
        BootstrapConfig::with_source(path.to_string_lossy()),
        ready_immediately(),
        (),
    )
    .unwrap()
    .start()
    .await
    .unwrap_err();

    assert_eq!(err.code(), "fetch_error");
}

// ============================================================================
// WebAssembly
// ============================================================================

#[cfg(feature = "wasm")]
#[tokio::test]
async fn test_wasm_module_round_trip() {
    use bootbridge::{WasmConfig, WasmImports, WasmRuntime};

    let wat = r#"
        (module
          (import "bootbridge" "send_message" (func $send (param i32 i32 i32 i32)))
          (import "bootbridge" "ready" (func $ready))
          (memory (export "memory") 1)
          (data (i32.const 0) "hello")
          (data (i32.const 16) "[1,2,3]")
          (func (export "_start")
            (call $send (i32.const 0) (i32.const 5) (i32.const 16) (i32.const 7))
            (call $ready)))
    "#;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.wat");
    std::fs::write(&path, wat).unwrap();

    let config = WasmConfig::default();
    let bootstrapper = Bootstrapper::new(
        BootstrapConfig::with_source(path.to_string_lossy()),
        WasmRuntime::new(&config).unwrap(),
        WasmImports::from_config(&config),
    )
    .unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&received);
    Bridge::new(
        bootstrapper.bus().clone(),
        BootstrapConfig::default().channels.messages,
    )
    .on_message(move |kind, payload| {
        r.lock().unwrap().push((kind.to_string(), payload.clone()));
    });

    let session = bootstrapper.start().await.unwrap();
    tokio_test::assert_ok!(session.wait_ready().await);

    assert_eq!(
        *received.lock().unwrap(),
        vec![("hello".to_string(), json!([1, 2, 3]))]
    );
}
