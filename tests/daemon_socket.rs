mod util;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use speakcache::config::Config;
use speakcache::daemon::protocol::{QueueStatusResult, QueuedResult, Status};
use speakcache::daemon::{
    ClientResponse, DaemonClient, DaemonConfig, DaemonState, Method, Phase, Response,
    RuntimePaths, SpeechDaemon,
};
use speakcache::pipeline::Pipeline;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use util::{SlowAudio, echo_pipeline};

struct Running {
    socket: PathBuf,
    state: Arc<DaemonState>,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

fn daemon_config(dir: &Path) -> DaemonConfig {
    let mut config = Config::default();
    config.tts.provider = "echo".into();
    DaemonConfig::new(RuntimePaths::new(dir), &config)
}

async fn start(dir: &Path, pipeline: Arc<Pipeline>) -> Running {
    let config = daemon_config(dir);
    let socket = config.paths.socket_path();
    let daemon = SpeechDaemon::new(config, pipeline);
    let state = daemon.state().clone();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(daemon.run_until(async {
        let _ = stopped.await;
    }));

    let deadline = Instant::now() + Duration::from_secs(5);
    while state.phase() != Phase::Serving {
        assert!(Instant::now() < deadline, "daemon did not start");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Running {
        socket,
        state,
        stop,
        handle,
    }
}

async fn raw(socket: &Path, line: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket).await.unwrap();
    stream.write_all(line).await.unwrap();
    stream.write_all(b"\n").await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    serde_json::from_slice(&buf).unwrap()
}

async fn call(socket: &Path, method: &str, params: Value) -> Response {
    let line = serde_json::to_vec(&json!({"id": 7, "method": method, "params": params})).unwrap();
    raw(socket, &line).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_and_protocol_errors() {
    let tmp = TempDir::new().unwrap();
    let (pipeline, _) = echo_pipeline(Arc::new(SlowAudio::new(Duration::ZERO)));
    let daemon = start(tmp.path(), pipeline).await;

    let status = call(&daemon.socket, "status", Value::Null).await;
    assert_eq!(status.status, Status::Success);
    assert_eq!(status.id, json!(7));
    assert_eq!(status.result["pid"], json!(std::process::id()));
    assert_eq!(status.result["models_loaded"], json!(true));

    let malformed = raw(&daemon.socket, b"{not json").await;
    assert_eq!(malformed.status, Status::Error);
    assert!(malformed.id.is_null());
    assert!(malformed.error_message().unwrap().starts_with("Invalid JSON"));

    let unknown = call(&daemon.socket, "sing", Value::Null).await;
    assert_eq!(unknown.status, Status::Error);
    assert_eq!(unknown.error_message(), Some("Unknown method: sing"));

    let empty = call(&daemon.socket, "speak", json!({"text": "   "})).await;
    assert_eq!(empty.status, Status::Error);
    assert_eq!(empty.result["kind"], json!("validation"));

    let missing = call(&daemon.socket, "speak", json!({"text": "hi", "provider": "nope"})).await;
    assert_eq!(missing.result["kind"], json!("not_found"));
    assert!(missing.error_message().unwrap().contains("Available: echo"));

    daemon.stop.send(()).unwrap();
    daemon.handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_requests_play_one_at_a_time() {
    let tmp = TempDir::new().unwrap();
    let audio = Arc::new(SlowAudio::new(Duration::from_millis(150)));
    let (pipeline, provider) = echo_pipeline(audio.clone());
    let daemon = start(tmp.path(), pipeline).await;

    let mut positions = Vec::new();
    for text in ["queued one", "queued two", "queued three"] {
        let resp = call(&daemon.socket, "speak", json!({"text": text})).await;
        assert_eq!(resp.status, Status::Success, "{:?}", resp.result);
        let queued: QueuedResult = serde_json::from_value(resp.result).unwrap();
        assert!(queued.queued);
        positions.push(queued.queue_position);
    }
    assert_eq!(positions.first(), Some(&1));
    assert!(positions.windows(2).all(|w| w[1] == w[0] + 1));

    let socket = daemon.socket.clone();
    let immediate = tokio::spawn(async move {
        call(&socket, "speak", json!({"text": "right now", "queue": false})).await
    });

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut last_waiting = usize::MAX;
    loop {
        let resp = call(&daemon.socket, "queue_status", Value::Null).await;
        let snap: QueueStatusResult = serde_json::from_value(resp.result).unwrap();
        assert!(snap.waiting.len() <= last_waiting, "waiting list grew");
        last_waiting = snap.waiting.len();
        assert_eq!(
            snap.queue_size,
            snap.waiting.len() + usize::from(snap.current.is_some())
        );
        let listed = snap.current.iter().chain(&snap.waiting);
        for item in listed {
            assert_ne!(item.text, "right now");
            assert_eq!(item.provider, "echo");
        }
        if snap.queue_size == 0 {
            break;
        }
        assert!(Instant::now() < deadline, "queue never drained");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let immediate = immediate.await.unwrap();
    assert_eq!(immediate.status, Status::Success);
    assert_eq!(immediate.result["played"], json!(true));
    assert_eq!(immediate.result["cached"], json!(false));

    let queued = audio.matching("queued");
    assert_eq!(queued.len(), 3);
    assert!(queued[0].clip.ends_with("queued one"));
    assert!(queued[2].clip.ends_with("queued three"));
    for pair in queued.windows(2) {
        assert!(pair[0].ended <= pair[1].started, "queued playback overlapped");
    }
    assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 4);

    daemon.stop.send(()).unwrap();
    daemon.handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_daemon_in_same_directory_is_refused() {
    let tmp = TempDir::new().unwrap();
    let (pipeline, _) = echo_pipeline(Arc::new(SlowAudio::new(Duration::ZERO)));
    let daemon = start(tmp.path(), pipeline.clone()).await;

    let second = SpeechDaemon::new(daemon_config(tmp.path()), pipeline);
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        second.run_until(std::future::pending()),
    )
    .await
    .expect("second daemon should fail fast")
    .unwrap_err();
    assert!(err.to_string().contains("already running"), "{err}");

    // The first daemon is unaffected.
    let status = call(&daemon.socket, "status", Value::Null).await;
    assert_eq!(status.status, Status::Success);

    daemon.stop.send(()).unwrap();
    daemon.handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_removes_socket_and_releases_lock() {
    let tmp = TempDir::new().unwrap();
    let (pipeline, _) = echo_pipeline(Arc::new(SlowAudio::new(Duration::ZERO)));
    let daemon = start(tmp.path(), pipeline.clone()).await;
    let socket = daemon.socket.clone();
    let state = daemon.state.clone();

    daemon.stop.send(()).unwrap();
    daemon.handle.await.unwrap().unwrap();
    assert!(!socket.exists());
    assert_eq!(state.phase(), Phase::Stopped);

    // Lock is free again.
    let again = start(tmp.path(), pipeline).await;
    again.stop.send(()).unwrap();
    again.handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_client_round_trip() {
    let tmp = TempDir::new().unwrap();
    let (pipeline, _) = echo_pipeline(Arc::new(SlowAudio::new(Duration::ZERO)));
    let daemon = start(tmp.path(), pipeline).await;

    let socket = daemon.socket.clone();
    let (status, rejected) = tokio::task::spawn_blocking(move || {
        let client = DaemonClient::new(&socket).with_timeout(Duration::from_secs(5));
        (
            client.send(Method::Status, Value::Null),
            client.send(Method::Speak, json!({"text": ""})),
        )
    })
    .await
    .unwrap();

    match status {
        ClientResponse::Success(result) => {
            assert_eq!(result["pid"], json!(std::process::id()))
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(rejected.kind(), Some("validation"));

    daemon.stop.send(()).unwrap();
    daemon.handle.await.unwrap().unwrap();
}
