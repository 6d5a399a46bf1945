//! End-to-end tests: the control surface over a real TCP socket, the
//! liveness-driven unload path, and the ordered shutdown guarantee.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use component_host::{
    Component, ComponentContext, ComponentFactory, ControlResponse, HostConfig, LivenessConfig,
    LoadParams, Loader,
};

/// Component that logs lifecycle events and schedules observable work.
struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
    tasks_on_init: usize,
}

#[async_trait]
impl Component for Recorder {
    async fn initialize(&mut self, context: ComponentContext) -> anyhow::Result<()> {
        self.events.lock().push(format!("init:{}", context.name));
        for _ in 0..self.tasks_on_init {
            let events = Arc::clone(&self.events);
            context.st_queue.push(async move {
                sleep(Duration::from_millis(2)).await;
                events.lock().push("task".to_string());
            });
        }
        Ok(())
    }

    async fn disable(&mut self) {
        self.events.lock().push("disable".to_string());
    }
}

fn recorder_factory(tasks_on_init: usize) -> (Arc<ComponentFactory>, Arc<Mutex<Vec<String>>>) {
    let factory = Arc::new(ComponentFactory::new());
    let events = Arc::new(Mutex::new(Vec::new()));

    let events_clone = Arc::clone(&events);
    factory.register("driver::Camera", move || {
        Ok(Box::new(Recorder {
            events: Arc::clone(&events_clone),
            tasks_on_init,
        }))
    });

    (factory, events)
}

fn control_config() -> HostConfig {
    let mut config = HostConfig::default();
    config.worker_threads = Some(2);
    config.control.bind_address = "127.0.0.1:0".to_string();
    config.liveness = LivenessConfig {
        heartbeat_timeout_ms: 250,
        check_interval_ms: 25,
    };
    config
}

async fn connect(loader: &Loader) -> (Lines<BufReader<OwnedReadHalf>>, OwnedWriteHalf) {
    let addr = loader.control_addr().expect("control surface not enabled");
    let stream = TcpStream::connect(addr).await.expect("connect failed");
    let (reader, writer) = stream.into_split();
    (BufReader::new(reader).lines(), writer)
}

async fn roundtrip(
    reader: &mut Lines<BufReader<OwnedReadHalf>>,
    writer: &mut OwnedWriteHalf,
    request: serde_json::Value,
) -> ControlResponse {
    let mut line = request.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await.expect("write failed");

    let response = timeout(Duration::from_secs(5), reader.next_line())
        .await
        .expect("response timed out")
        .expect("read failed")
        .expect("connection closed");
    serde_json::from_str(&response).expect("malformed response")
}

#[tokio::test]
async fn control_scenario_over_tcp() {
    let (factory, _) = recorder_factory(0);
    let mut loader = Loader::new(factory, control_config()).await.unwrap();
    let (mut reader, mut writer) = connect(&loader).await;

    let response = roundtrip(&mut reader, &mut writer, json!({"op": "list"})).await;
    assert!(response.success);
    assert_eq!(response.names, Some(vec![]));

    let response = roundtrip(
        &mut reader,
        &mut writer,
        json!({"op": "load", "name": "cam", "type": "driver::Camera"}),
    )
    .await;
    assert!(response.success);

    let response = roundtrip(&mut reader, &mut writer, json!({"op": "list"})).await;
    assert_eq!(response.names, Some(vec!["cam".to_string()]));

    let response = roundtrip(&mut reader, &mut writer, json!({"op": "unload", "name": "cam"})).await;
    assert!(response.success);

    let response = roundtrip(&mut reader, &mut writer, json!({"op": "list"})).await;
    assert_eq!(response.names, Some(vec![]));

    let response = roundtrip(&mut reader, &mut writer, json!({"op": "unload", "name": "cam"})).await;
    assert!(!response.success);
    assert!(response.error.unwrap().contains("cam"));

    loader.shutdown().await;
}

#[tokio::test]
async fn duplicate_load_fails_over_tcp() {
    let (factory, _) = recorder_factory(0);
    let mut loader = Loader::new(factory, control_config()).await.unwrap();
    let (mut reader, mut writer) = connect(&loader).await;

    let load = json!({"op": "load", "name": "cam", "type": "driver::Camera"});
    assert!(roundtrip(&mut reader, &mut writer, load.clone()).await.success);

    let response = roundtrip(&mut reader, &mut writer, load).await;
    assert!(!response.success);
    assert!(response.error.unwrap().contains("already loaded"));

    loader.shutdown().await;
}

#[tokio::test]
async fn remap_length_mismatch_does_not_fail_the_load() {
    let (factory, _) = recorder_factory(0);
    let mut loader = Loader::new(factory, control_config()).await.unwrap();
    let (mut reader, mut writer) = connect(&loader).await;

    let response = roundtrip(
        &mut reader,
        &mut writer,
        json!({
            "op": "load",
            "name": "cam",
            "type": "driver::Camera",
            "remap_source": ["a", "b"],
            "remap_target": ["x"]
        }),
    )
    .await;
    assert!(response.success);

    let response = roundtrip(&mut reader, &mut writer, json!({"op": "list"})).await;
    assert_eq!(response.names, Some(vec!["cam".to_string()]));

    loader.shutdown().await;
}

#[tokio::test]
async fn malformed_request_keeps_connection_alive() {
    let (factory, _) = recorder_factory(0);
    let mut loader = Loader::new(factory, control_config()).await.unwrap();
    let (mut reader, mut writer) = connect(&loader).await;

    writer.write_all(b"{\"op\": \"nonsense\"\n").await.unwrap();
    let response = timeout(Duration::from_secs(5), reader.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let response: ControlResponse = serde_json::from_str(&response).unwrap();
    assert!(!response.success);
    assert!(response.error.unwrap().contains("malformed"));

    // Connection still usable afterwards.
    let response = roundtrip(&mut reader, &mut writer, json!({"op": "list"})).await;
    assert!(response.success);

    loader.shutdown().await;
}

#[tokio::test]
async fn liveness_over_control_auto_unloads() {
    let (factory, _) = recorder_factory(0);
    let mut loader = Loader::new(factory, control_config()).await.unwrap();
    let (mut reader, mut writer) = connect(&loader).await;

    let response = roundtrip(
        &mut reader,
        &mut writer,
        json!({
            "op": "load",
            "name": "cam",
            "type": "driver::Camera",
            "liveness_id": "client-1"
        }),
    )
    .await;
    assert!(response.success);

    // Heartbeats hold the instance well past the timeout window.
    for _ in 0..8 {
        sleep(Duration::from_millis(50)).await;
        let response = roundtrip(
            &mut reader,
            &mut writer,
            json!({"op": "heartbeat", "liveness_id": "client-1"}),
        )
        .await;
        assert!(response.success);
    }
    assert_eq!(loader.list().await, vec!["cam".to_string()]);

    // Client "disappears": no more heartbeats, no explicit unload.
    timeout(Duration::from_secs(5), async {
        while !loader.list().await.is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("liveness-triggered unload never happened");

    loader.shutdown().await;
}

#[tokio::test]
async fn shutdown_never_runs_tasks_after_disable() {
    let (factory, events) = recorder_factory(20);
    let mut config = control_config();
    config.control.enabled = false;
    let mut loader = Loader::new(factory, config).await.unwrap();

    loader
        .load(LoadParams::new("cam", "driver::Camera"))
        .await
        .unwrap();

    loader.shutdown().await;

    let events = events.lock();
    let disable_at = events
        .iter()
        .position(|event| event == "disable")
        .expect("disable never recorded");
    assert!(
        events[disable_at..].iter().all(|event| event != "task"),
        "a queued task ran after instance teardown began: {events:?}"
    );
    // The pool drained the queue before teardown, so every task ran.
    assert_eq!(events.iter().filter(|event| *event == "task").count(), 20);
}

#[tokio::test]
async fn concurrent_loads_of_same_name_yield_one_instance() {
    let (factory, _) = recorder_factory(0);
    let mut config = control_config();
    config.control.enabled = false;
    let loader = Arc::new(Loader::new(factory, config).await.unwrap());

    let successes = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let loader = Arc::clone(&loader);
        let successes = Arc::clone(&successes);
        handles.push(tokio::spawn(async move {
            if loader
                .load(LoadParams::new("cam", "driver::Camera"))
                .await
                .is_ok()
            {
                successes.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(loader.list().await, vec!["cam".to_string()]);
}
