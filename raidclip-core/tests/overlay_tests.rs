// File: raidclip-core/tests/overlay_tests.rs

mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use raidclip_common::models::{EngineConfig, StopReason};
use raidclip_core::config_store::ConfigHandle;
use raidclip_core::eventbus::EventBus;
use raidclip_core::orchestrator::{RaidOrchestrator, RaidPhase};
use raidclip_core::overlay::{probe_overlay, OverlayCommand, OverlayServer, PlaybackEvent};
use tokio_util::sync::CancellationToken;

use test_utils::{alice_raid, RecordingStream};

fn overlay(cfg: EngineConfig) -> OverlayServer {
    OverlayServer::new(ConfigHandle::new(cfg))
}

async fn wait_for_phase(orch: &RaidOrchestrator, want: RaidPhase) {
    for _ in 0..100 {
        if orch.status().await.unwrap().phase == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("orchestrator never reached {:?}", want);
}

#[tokio::test]
async fn test_new_clip_stops_previous_first() {
    let overlay = overlay(EngineConfig::default());
    let mut events = overlay.subscribe_events();

    overlay.start_clip("https://cdn.example/a.mp4", None).unwrap();
    let (snapshot, mut commands) = overlay.subscribe();
    let first_id = match snapshot {
        Some(OverlayCommand::Start { id, session }) => {
            assert_eq!(session.url, "https://cdn.example/a.mp4");
            id
        }
        other => panic!("expected a start snapshot, got {:?}", other),
    };

    overlay.start_clip("https://cdn.example/b.mp4", None).unwrap();

    assert_eq!(commands.recv().await.unwrap(), OverlayCommand::Stop { id: first_id });
    match commands.recv().await.unwrap() {
        OverlayCommand::Start { id, session } => {
            assert!(id > first_id);
            assert_eq!(session.url, "https://cdn.example/b.mp4");
        }
        other => panic!("expected start, got {:?}", other),
    }

    assert_eq!(
        events.recv().await.unwrap(),
        PlaybackEvent::Started { url: "https://cdn.example/a.mp4".into() }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        PlaybackEvent::Stopped {
            url: "https://cdn.example/a.mp4".into(),
            reason: StopReason::Superseded
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        PlaybackEvent::Started { url: "https://cdn.example/b.mp4".into() }
    );
    assert_eq!(overlay.current().map(|s| s.url).as_deref(), Some("https://cdn.example/b.mp4"));
}

#[tokio::test(start_paused = true)]
async fn test_duration_cap_stops_only_its_own_session() {
    let overlay = overlay(EngineConfig::default());
    let mut events = overlay.subscribe_events();

    overlay.start_clip("a.mp4", Some(5.0)).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    overlay.start_clip("b.mp4", None).unwrap();

    // a's cap would have expired at 5s; b has no cap and keeps playing.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(overlay.current().map(|s| s.url).as_deref(), Some("b.mp4"));

    let mut seen = Vec::new();
    while let Ok(ev) = events.try_recv() {
        seen.push(ev);
    }
    assert!(!seen.iter().any(|e| matches!(
        e,
        PlaybackEvent::Stopped { reason: StopReason::DurationCap, .. }
    )));
}

#[tokio::test]
async fn test_orchestrator_follows_overlay_back_to_idle() {
    let overlay = overlay(EngineConfig {
        stop_stream_after_raided: false,
        ..Default::default()
    });
    let (orch, _task) = RaidOrchestrator::spawn(
        Arc::new(overlay.clone()),
        Arc::new(RecordingStream::default()),
        overlay.config().clone(),
        EventBus::new(),
        Some(overlay.subscribe_events()),
        CancellationToken::new(),
    );

    orch.handle_raid(alice_raid()).await.unwrap();
    assert_eq!(overlay.current().map(|s| s.url).as_deref(), Some("b.mp4"));
    wait_for_phase(&orch, RaidPhase::Playing).await;

    // A stale report for some other clip is ignored.
    overlay.renderer_ended("a.mp4", None);
    assert!(overlay.is_playing());

    overlay.renderer_ended("b.mp4", None);
    assert!(!overlay.is_playing());
    wait_for_phase(&orch, RaidPhase::Idle).await;
}

#[tokio::test]
async fn test_late_renderer_sees_raid_clip() {
    let overlay = overlay(EngineConfig {
        stop_stream_after_raided: false,
        clip_player_width: 1280,
        clip_player_height: 720,
        ..Default::default()
    });
    let addr = overlay.serve(0, None).await.unwrap();
    let (orch, _task) = RaidOrchestrator::spawn(
        Arc::new(overlay.clone()),
        Arc::new(RecordingStream::default()),
        overlay.config().clone(),
        EventBus::new(),
        Some(overlay.subscribe_events()),
        CancellationToken::new(),
    );
    orch.handle_raid(alice_raid()).await.unwrap();

    let mut resp = reqwest::get(format!("http://127.0.0.1:{}/events", addr.port()))
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let mut body = String::new();
    while !body.contains("\n\n") {
        let chunk = tokio::time::timeout(Duration::from_secs(5), resp.chunk())
            .await
            .expect("snapshot in time")
            .unwrap()
            .expect("stream open");
        body.push_str(&String::from_utf8_lossy(&chunk));
    }
    assert!(body.contains("event: on"), "got {:?}", body);
    assert!(body.contains(r#""src":"b.mp4""#));
    assert!(body.contains(r#""width":1280"#));

    drop(resp);
    overlay.shutdown().await;
}

#[tokio::test]
async fn test_rebind_to_busy_port_keeps_old_listener() {
    let overlay = overlay(EngineConfig::default());
    let first = overlay.serve(0, None).await.unwrap();

    let busy = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let busy_port = busy.local_addr().unwrap().port();

    let err = overlay.serve(busy_port, None).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::AddrInUse);
    assert_eq!(overlay.local_addr().await, Some(first));
    assert_eq!(probe_overlay(first.port()).await.unwrap().status, "ok");

    overlay.shutdown().await;
    drop(busy);
}

#[tokio::test]
async fn test_rebind_moves_to_new_port() {
    let overlay = overlay(EngineConfig::default());
    let first = overlay.serve(0, None).await.unwrap();
    let second = overlay.serve(0, None).await.unwrap();
    assert_ne!(first.port(), second.port());
    assert_eq!(overlay.local_addr().await, Some(second));
    assert_eq!(probe_overlay(second.port()).await.unwrap().status, "ok");

    // The old listener drains in the background.
    let mut closed = false;
    for _ in 0..100 {
        if probe_overlay(first.port()).await.is_err() {
            closed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(closed, "old listener on {} still answering", first);

    overlay.shutdown().await;
}
