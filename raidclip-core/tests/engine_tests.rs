// File: raidclip-core/tests/engine_tests.rs
//
// Full engine over the local command port, with an OBS endpoint that refuses
// every connection.

mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use raidclip_common::models::EngineConfig;
use raidclip_core::config_store::{ConfigStore, FileConfigStore};
use raidclip_core::engine::{Engine, EngineBuilder};
use raidclip_obs::LinkState;
use test_utils::RefusingConnector;

struct Running {
    engine: Arc<Engine>,
    base: String,
    dir: TempDir,
    http: reqwest::Client,
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("0.0.0.0:0").unwrap().local_addr().unwrap().port()
}

async fn start() -> Running {
    launch(None).await
}

/// Listens on `server_port` from the config, or on any free port through the
/// builder override when `None`.
async fn launch(server_port: Option<u16>) -> Running {
    let dir = tempfile::tempdir().unwrap();
    let store = FileConfigStore::new(dir.path().join("config.yaml"));
    let mut cfg = EngineConfig {
        log_dest: dir.path().display().to_string(),
        stop_stream_after_raided: false,
        ..Default::default()
    };
    if let Some(port) = server_port {
        cfg.local_server_port_number = port;
    }
    store.save(&cfg).await.unwrap();

    let mut builder = EngineBuilder::new(Arc::new(store), Arc::new(RefusingConnector));
    if server_port.is_none() {
        builder = builder.port_override(0);
    }
    let engine = builder.start().await.unwrap();
    let port = engine.overlay().local_addr().await.unwrap().port();

    Running {
        engine,
        base: format!("http://127.0.0.1:{}", port),
        dir,
        http: reqwest::Client::new(),
    }
}

impl Running {
    async fn command(&self, body: Value) -> (u16, Value) {
        let resp = self
            .http
            .post(format!("{}/api/command", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

#[tokio::test]
async fn test_playback_commands_over_http() {
    let r = start().await;

    let (status, reply) = r
        .command(json!({ "command": "start-clip", "url": "https://cdn.example/b.mp4", "duration": 12 }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(reply["outcome"], "ok");
    assert_eq!(reply["reply"]["type"], "done");
    let session = r.engine.overlay().current().unwrap();
    assert_eq!(session.url, "https://cdn.example/b.mp4");
    assert_eq!(session.duration_cap, Some(12.0));

    let (status, reply) = r.command(json!({ "command": "start-clip", "url": "  " })).await;
    assert_eq!(status, 400);
    assert_eq!(reply["kind"], "playback");

    let (status, _) = r.command(json!({ "command": "stop-clip" })).await;
    assert_eq!(status, 200);
    assert!(!r.engine.overlay().is_playing());

    // Idempotent when idle.
    let (status, _) = r.command(json!({ "command": "stop-clip" })).await;
    assert_eq!(status, 200);

    r.engine.shutdown().await;
}

#[tokio::test]
async fn test_stream_commands_need_a_ready_link() {
    let r = start().await;

    let (status, reply) = r.command(json!({ "command": "stop-stream" })).await;
    assert_eq!(status, 422);
    assert_eq!(reply["kind"], "link");

    let (status, reply) = r.command(json!({ "command": "test-connection" })).await;
    assert_eq!(status, 422);
    assert_eq!(reply["kind"], "link");

    assert_ne!(r.engine.link().state(), LinkState::Ready);
    r.engine.shutdown().await;
}

#[tokio::test]
async fn test_desktop_commands_are_unsupported_headless() {
    let r = start().await;

    let (status, reply) = r
        .command(json!({ "command": "open-file-dialog", "previous": "", "filter": "*.wav" }))
        .await;
    assert_eq!(status, 501);
    assert_eq!(reply["kind"], "unsupported");

    // Provider-backed debug raids need credentials.
    let (status, _) = r.command(json!({ "command": "inject-debug-raid", "from": "alice" })).await;
    assert_eq!(status, 501);

    r.engine.shutdown().await;
}

#[tokio::test]
async fn test_debug_raid_plays_and_is_journaled() {
    let r = start().await;

    let (status, reply) = r
        .command(json!({
            "command": "inject-debug-raid",
            "from": "alice",
            "clips": [
                { "Id": "c1", "Url": "https://clips.example/c1", "Title": "small", "Thumbnail": "", "ViewCount": 5, "Duration": 10.0, "Mp4": "a.mp4" },
                { "Id": "c2", "Url": "https://clips.example/c2", "Title": "big", "Thumbnail": "", "ViewCount": 50, "Duration": 20.0, "Mp4": "b.mp4" }
            ]
        }))
        .await;
    assert_eq!(status, 200, "{}", reply);
    assert_eq!(r.engine.overlay().current().map(|s| s.url).as_deref(), Some("b.mp4"));

    let journal = r.dir.path().join("raids.txt");
    let mut contents = String::new();
    for _ in 0..100 {
        contents = tokio::fs::read_to_string(&journal).await.unwrap_or_default();
        if contents.contains("Id[c2]") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(contents.starts_with("-- @alice clips --\n"), "{:?}", contents);
    assert!(contents.contains("   views[50] / title[big] / URL[https://clips.example/c2] / Id[c2]\n"));

    let (status, reply) = r.command(json!({ "command": "inject-debug-raid", "from": "nobody", "clips": [] })).await;
    assert_eq!(status, 501, "{}", reply);

    let (_, reply) = r.command(json!({ "command": "inject-debug-entry" })).await;
    assert_eq!(reply["outcome"], "ok");

    let (_, reply) = r.command(json!({ "command": "status" })).await;
    assert_eq!(reply["reply"]["type"], "engine");
    let status = &reply["reply"]["value"];
    assert_eq!(status["raid"]["raids_handled"], 1);
    assert_eq!(status["raid"]["recent_clips"], 1);
    assert_eq!(status["playing"]["url"], "b.mp4");
    assert_eq!(status["clip_provider"], false);

    r.engine.shutdown().await;
}

#[tokio::test]
async fn test_save_and_load_config() {
    let r = start().await;

    let (_, reply) = r.command(json!({ "command": "load-config" })).await;
    assert_eq!(reply["reply"]["type"], "config");
    let mut cfg: EngineConfig = serde_json::from_value(reply["reply"]["value"].clone()).unwrap();
    assert!(!cfg.stop_stream_after_raided);

    cfg.chat_targets = vec!["user2".into(), "user3".into()];
    cfg.obs_port = 4460;
    let (status, reply) = r.command(json!({ "command": "save-config", "config": cfg })).await;
    assert_eq!(status, 200, "{}", reply);
    assert_eq!(r.engine.config().current().chat_targets, cfg.chat_targets);

    let on_disk = FileConfigStore::new(r.dir.path().join("config.yaml")).load().await.unwrap();
    assert_eq!(on_disk, cfg);

    cfg.clip_player_width = 0;
    let (status, reply) = r.command(json!({ "command": "save-config", "config": cfg })).await;
    assert_eq!(status, 400);
    assert_eq!(reply["kind"], "config");
    assert_eq!(r.engine.config().current().clip_player_width, 640);

    r.engine.shutdown().await;
}

#[tokio::test]
async fn test_test_overlay_and_shutdown() {
    let r = start().await;

    let (status, reply) = r.command(json!({ "command": "test-overlay" })).await;
    assert_eq!(status, 200, "{}", reply);
    assert_eq!(reply["reply"]["type"], "status");

    let status = r.engine.status().await.unwrap();
    assert!(status.listening_port.is_some());
    assert!(status.raid.recent_clips == 0);

    r.engine.shutdown().await;
    assert_eq!(r.engine.link().state(), LinkState::Disconnected);
    assert!(r.engine.overlay().local_addr().await.is_none());
    assert!(reqwest::get(format!("{}/api/ping", r.base)).await.is_err());
}

#[tokio::test]
async fn test_port_change_to_busy_port_keeps_serving() {
    let first = free_port();
    let r = launch(Some(first)).await;
    let busy = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let busy_port = busy.local_addr().unwrap().port();

    let mut cfg = (*r.engine.config().current()).clone();
    cfg.local_server_port_number = busy_port;
    let (status, reply) = r.command(json!({ "command": "save-config", "config": cfg })).await;
    assert_eq!(status, 422, "{}", reply);
    assert_eq!(reply["kind"], "engine");

    assert_eq!(r.engine.config().current().local_server_port_number, first);
    let on_disk = FileConfigStore::new(r.dir.path().join("config.yaml")).load().await.unwrap();
    assert_eq!(on_disk.local_server_port_number, first);

    let ping = r.http.get(format!("{}/api/ping", r.base)).send().await.unwrap();
    assert!(ping.status().is_success());
    assert_eq!(r.engine.overlay().local_addr().await.map(|a| a.port()), Some(first));

    r.engine.shutdown().await;
    drop(busy);
}

#[tokio::test]
async fn test_port_change_moves_command_server() {
    let r = launch(Some(free_port())).await;
    let next = free_port();

    let mut cfg = (*r.engine.config().current()).clone();
    cfg.local_server_port_number = next;
    let (status, reply) = r.command(json!({ "command": "save-config", "config": cfg })).await;
    assert_eq!(status, 200, "{}", reply);

    assert_eq!(r.engine.overlay().local_addr().await.map(|a| a.port()), Some(next));
    let ping = r
        .http
        .get(format!("http://127.0.0.1:{}/api/ping", next))
        .send()
        .await
        .unwrap();
    assert!(ping.status().is_success());
    assert_eq!(r.engine.status().await.unwrap().listening_port, Some(next));

    r.engine.shutdown().await;
}
