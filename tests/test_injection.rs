//! Parameter injection into handlers of a running App


use bridgekit::config::Settings;
use bridgekit::{
    AdapterSource, AppContext, AppSettings, BridgeError, Clock, DeviceContext, DeviceLogger,
    HandlerResult, ShutdownSignal, State,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::*;
use tokio::sync::Mutex;

trait Valve: Send + Sync {
    fn label(&self) -> &'static str;
}

struct HardwareValve;

impl Valve for HardwareValve {
    fn label(&self) -> &'static str {
        "hardware"
    }
}

struct SimulatedValve;

impl Valve for SimulatedValve {
    fn label(&self) -> &'static str {
        "simulated"
    }
}

type ValvePort = Arc<dyn Valve>;

fn hardware() -> ValvePort {
    Arc::new(HardwareValve)
}

fn simulated() -> ValvePort {
    Arc::new(SimulatedValve)
}

struct GreenhouseSettings {
    base: Settings,
    vent_limit: f64,
}

impl AppSettings for GreenhouseSettings {
    fn base(&self) -> &Settings {
        &self.base
    }
}

fn labelled(label: &str) -> State {
    let mut state = State::new();
    state.insert("valve".to_string(), json!(label));
    state
}

/// Registers a device that publishes the label of whatever valve it was given
fn valve_reporter(app: &mut bridgekit::App) {
    app.device("valve", |ctx: DeviceContext, valve: ValvePort| async move {
        ctx.publish_state(&labelled(valve.label())).await?;
        HandlerResult::Ok(())
    })
    .unwrap();
}

#[tokio::test]
async fn test_user_and_base_settings_are_both_injected() {
    let (mut app, mut harness) = test_app();
    app.settings(GreenhouseSettings {
        base: Settings::default(),
        vent_limit: 0.75,
    });
    app.device(
        "vent",
        |ctx: DeviceContext, custom: Arc<GreenhouseSettings>, base: Arc<Settings>| async move {
            let mut state = State::new();
            state.insert("limit".to_string(), json!(custom.vent_limit));
            state.insert("dry_run".to_string(), json!(base.app.dry_run));
            ctx.publish_state(&state).await?;
            HandlerResult::Ok(())
        },
    )
    .unwrap();

    let handle = spawn_app(app);
    harness.wait_running().await;
    assert!(harness.wait_for(&topic("vent/state"), 1).await);
    harness.stop(handle).await.unwrap();

    assert_eq!(
        harness.json_on(&topic("vent/state")).await,
        vec![json!({"limit": 0.75, "dry_run": false})]
    );
}

#[tokio::test]
async fn test_adapter_is_injected() {
    let (mut app, mut harness) = test_app();
    app.adapter_with_dry_run(hardware(), simulated()).unwrap();
    valve_reporter(&mut app);

    let handle = spawn_app(app);
    harness.wait_running().await;
    assert!(harness.wait_for(&topic("valve/state"), 1).await);
    harness.stop(handle).await.unwrap();

    assert_eq!(
        harness.json_on(&topic("valve/state")).await,
        vec![json!({"valve": "hardware"})]
    );
}

#[tokio::test]
async fn test_dry_run_swaps_adapter_variant() {
    let (mut app, mut harness) = test_app();
    app.dry_run(true);
    app.adapter_with_dry_run(hardware(), simulated()).unwrap();
    valve_reporter(&mut app);

    let handle = spawn_app(app);
    harness.wait_running().await;
    assert!(harness.wait_for(&topic("valve/state"), 1).await);
    harness.stop(handle).await.unwrap();

    assert_eq!(
        harness.json_on(&topic("valve/state")).await,
        vec![json!({"valve": "simulated"})]
    );
}

#[tokio::test]
async fn test_dry_run_without_variant_keeps_primary() {
    let (mut app, mut harness) = test_app();
    app.dry_run(true);
    app.adapter(hardware()).unwrap();
    valve_reporter(&mut app);

    let handle = spawn_app(app);
    harness.wait_running().await;
    assert!(harness.wait_for(&topic("valve/state"), 1).await);
    harness.stop(handle).await.unwrap();

    assert_eq!(
        harness.json_on(&topic("valve/state")).await,
        vec![json!({"valve": "hardware"})]
    );
}

#[tokio::test]
async fn test_catalog_adapter_resolves_by_name() {
    let (mut app, mut harness) = test_app();
    app.catalog("valve.sim", || Ok(simulated())).unwrap();
    app.adapter_source(AdapterSource::<ValvePort>::catalog("valve.sim"), None)
        .unwrap();
    valve_reporter(&mut app);

    let handle = spawn_app(app);
    harness.wait_running().await;
    assert!(harness.wait_for(&topic("valve/state"), 1).await);
    harness.stop(handle).await.unwrap();

    assert_eq!(
        harness.json_on(&topic("valve/state")).await,
        vec![json!({"valve": "simulated"})]
    );
}

#[tokio::test]
async fn test_failing_adapter_factory_stops_bootstrap() {
    let (mut app, harness) = test_app();
    app.adapter_factory(|| -> Result<ValvePort, bridgekit::HandlerError> {
        Err("valve controller not found".into())
    })
    .unwrap();

    let result = app.run().await;
    assert!(matches!(result, Err(BridgeError::Adapter { .. })));
    assert!(harness.mqtt.get_published_messages().await.is_empty());
}

#[tokio::test]
async fn test_missing_provider_is_published_as_injection_error() {
    let (mut app, mut harness) = test_app();
    valve_reporter(&mut app);

    let handle = spawn_app(app);
    harness.wait_running().await;
    assert!(harness.wait_for(&topic("valve/error"), 1).await);
    harness.stop(handle).await.unwrap();

    let errors = harness.json_on(&topic("error")).await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["error_type"], "injection_error");
    assert_eq!(errors[0]["device"], "valve");
    assert!(harness
        .mqtt
        .get_published_to(&topic("valve/state"))
        .await
        .is_empty());
}

#[tokio::test]
async fn test_startup_hook_cannot_ask_for_device_context() {
    let (mut app, harness) = test_app();
    app.on_startup(|_ctx: DeviceContext| async { HandlerResult::Ok(()) })
        .unwrap();

    let result = app.run().await;
    assert!(matches!(result, Err(BridgeError::StartupHook(_))));
    assert_eq!(
        harness.mqtt.get_retained(&topic("status")).await.as_deref(),
        Some("offline")
    );
}

#[tokio::test]
async fn test_hooks_receive_app_context_and_adapters() {
    let (mut app, mut harness) = test_app();
    let seen = Arc::new(Mutex::new(Vec::new()));
    app.adapter(hardware()).unwrap();

    let sink = seen.clone();
    app.on_startup(move |ctx: AppContext, valve: ValvePort| {
        let sink = sink.clone();
        async move {
            sink.lock()
                .await
                .push(format!("{}:{}", ctx.name(), valve.label()));
            HandlerResult::Ok(())
        }
    })
    .unwrap();

    let handle = spawn_app(app);
    harness.wait_running().await;
    harness.stop(handle).await.unwrap();

    assert_eq!(seen.lock().await.clone(), vec!["home:hardware".to_string()]);
}

#[tokio::test]
async fn test_runtime_services_are_injected() {
    let (mut app, mut harness) = test_app();
    app.telemetry(
        "clock",
        Duration::from_secs(3600),
        |clock: Arc<dyn Clock>, logger: DeviceLogger, shutdown: ShutdownSignal| async move {
            logger.info("polling");
            let mut state = State::new();
            state.insert("now".to_string(), json!(clock.now()));
            state.insert("logger".to_string(), json!(logger.name()));
            state.insert("stopping".to_string(), json!(shutdown.is_triggered()));
            HandlerResult::Ok(state)
        },
    )
    .unwrap();

    let handle = spawn_app(app);
    harness.wait_running().await;
    assert!(harness.wait_for(&topic("clock/state"), 1).await);
    harness.stop(handle).await.unwrap();

    assert_eq!(
        harness.json_on(&topic("clock/state")).await,
        vec![json!({"now": 1000.0, "logger": "clock", "stopping": false})]
    );
}
