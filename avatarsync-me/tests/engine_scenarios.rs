use avatarsync_me::{
    AvatarEngine, AvatarError, ClockPlayback, ClockPlaybackHandle, EngineConfig, EngineEvent,
    GestureKind, SessionStatus, StreamMessage, VisemeCue,
};

fn engine_with(config: EngineConfig) -> (AvatarEngine, ClockPlaybackHandle) {
    // RUST_LOG=avatarsync_me=debug shows the router's transitions.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let playback = ClockPlayback::new();
    let handle = playback.handle();
    let engine = AvatarEngine::new(config, Box::new(playback), 0).unwrap();
    (engine, handle)
}

fn config() -> EngineConfig {
    EngineConfig {
        rng_seed: Some(42),
        viseme_crossfade_ms: 0,
        ..EngineConfig::default()
    }
}

fn three_cues() -> Vec<StreamMessage> {
    vec![
        StreamMessage::viseme(VisemeCue::new(2, 0, 200)),
        StreamMessage::viseme(VisemeCue::new(7, 200, 200)),
        StreamMessage::viseme(VisemeCue::new(21, 400, 200)),
    ]
}

#[test]
fn test_speech_scenario_switches_at_cue_boundaries() {
    let (mut engine, _) = engine_with(config());

    engine.ingest(StreamMessage::audio(&b"pcm"[..], 600, Vec::new()), 0).unwrap();
    for cue in three_cues() {
        engine.ingest(cue, 0).unwrap();
    }
    engine.ingest(StreamMessage::Gesture { gesture: GestureKind::Smile }, 0).unwrap();

    let mut active = Vec::new();
    for now in (0..=600).step_by(100) {
        let frame = engine.tick(now);
        assert_eq!(frame.weights.value("mouthSmileLeft"), 0.8, "smile held at {}ms", now);
        active.push(engine.router().visemes().active_cue().map(|c| c.viseme_id));
    }
    assert_eq!(
        active,
        vec![Some(2), Some(2), Some(7), Some(7), Some(21), Some(21), None]
    );

    let frame = engine.tick(1199);
    assert_eq!(frame.weights.value("mouthSmileLeft"), 0.8);
    let frame = engine.tick(1200);
    assert_eq!(frame.weights.value("mouthSmileLeft"), 0.0);
    assert!(engine.router().gestures().contribution().is_empty());
}

#[test]
fn test_viseme_weights_switch_exactly_at_boundaries() {
    let (mut engine, _) = engine_with(config());
    engine.ingest(StreamMessage::audio(&b"pcm"[..], 600, Vec::new()), 0).unwrap();
    for cue in three_cues() {
        engine.ingest(cue, 0).unwrap();
    }

    assert_eq!(engine.tick(199).weights.value("mouthPucker"), 0.0);
    assert_eq!(engine.tick(200).weights.value("mouthPucker"), 0.8);
    assert_eq!(engine.tick(399).weights.value("mouthClose"), 0.0);
    let frame = engine.tick(400);
    assert_eq!(frame.weights.value("mouthClose"), 0.8);
    assert_eq!(frame.weights.value("mouthPucker"), 0.0);
}

#[test]
fn test_error_falls_back_to_idle_on_next_tick() {
    let (mut engine, _) = engine_with(config());
    engine
        .ingest(StreamMessage::audio(&b"pcm"[..], 2000, vec![VisemeCue::new(2, 0, 2000)]), 0)
        .unwrap();
    engine.ingest(StreamMessage::Gesture { gesture: GestureKind::Excited }, 0).unwrap();
    engine.tick(100);

    let result = engine.ingest(StreamMessage::Error { message: "backend timeout".into() }, 150);
    assert!(matches!(result, Err(AvatarError::Upstream(_))));

    let frame = engine.tick(166);
    let idle = engine.idle().contribution().clone();
    for (key, value) in frame.weights.iter() {
        assert_eq!(value, idle.value(key), "residual weight on {}", key);
    }
    assert_eq!(frame.status, SessionStatus::Errored);

    let events = engine.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::SessionErrored { message, .. } if message == "backend timeout")));
}

#[test]
fn test_barge_in_before_first_tick_of_new_session() {
    let (mut engine, handle) = engine_with(config());
    engine
        .ingest(
            StreamMessage::AudioChunk {
                audio: bytes::Bytes::from_static(b"pcm"),
                duration_ms: Some(3000),
                visemes: vec![VisemeCue::new(8, 0, 3000)],
                session_id: Some("first".into()),
            },
            0,
        )
        .unwrap();
    engine.ingest(StreamMessage::Gesture { gesture: GestureKind::Point }, 0).unwrap();
    let blinks_before = engine.idle().next_blink_at();
    assert_eq!(engine.tick(500).weights.value("mouthFunnel"), 0.7);

    engine
        .ingest(
            StreamMessage::Text {
                text: "Actually, let me rephrase.".into(),
                session_id: Some("second".into()),
            },
            510,
        )
        .unwrap();

    let frame = engine.tick(516);
    assert_eq!(frame.session_id.as_deref(), Some("second"));
    assert_eq!(frame.status, SessionStatus::Streaming);
    assert_eq!(frame.weights.value("mouthFunnel"), 0.0);
    assert_eq!(frame.weights.value("armPointRight"), 0.0);
    assert_eq!(engine.idle().next_blink_at(), blinks_before);
    assert_eq!(handle.starts(), 1);
}

#[test]
fn test_end_is_deferred_until_audio_drains() {
    let (mut engine, _) = engine_with(config());
    engine.ingest(StreamMessage::audio(&b"a"[..], 500, Vec::new()), 0).unwrap();
    engine.ingest(StreamMessage::End, 10).unwrap();
    assert_eq!(engine.tick(400).status, SessionStatus::Playing);
    assert_eq!(engine.tick(500).status, SessionStatus::Ended);
    assert!(engine
        .drain_events()
        .iter()
        .any(|e| matches!(e, EngineEvent::SessionEnded { segments: 1, .. })));
}

#[test]
fn test_playback_failure_mid_segment_keeps_session() {
    let (mut engine, handle) = engine_with(config());
    engine
        .ingest(StreamMessage::audio(&b"a"[..], 500, vec![VisemeCue::new(2, 0, 500)]), 0)
        .unwrap();
    engine
        .ingest(StreamMessage::audio(&b"b"[..], 500, vec![VisemeCue::new(7, 0, 500)]), 0)
        .unwrap();
    engine.tick(100);

    handle.fail_current("device unplugged");
    let frame = engine.tick(150);
    assert_eq!(frame.status, SessionStatus::Playing);
    assert_eq!(engine.router().visemes().active_cue().map(|c| c.viseme_id), Some(7));
    assert!(engine
        .drain_events()
        .iter()
        .any(|e| matches!(e, EngineEvent::SegmentFailed { segment: 0, .. })));
}

#[test]
fn test_backward_seek_rewinds_lip_sync() {
    let (mut engine, handle) = engine_with(config());
    engine.ingest(StreamMessage::audio(&b"pcm"[..], 600, Vec::new()), 0).unwrap();
    for cue in three_cues() {
        engine.ingest(cue, 0).unwrap();
    }
    engine.tick(450);
    assert_eq!(engine.router().visemes().active_cue().map(|c| c.viseme_id), Some(21));

    handle.seek(50);
    engine.tick(460);
    assert_eq!(engine.router().visemes().active_cue().map(|c| c.viseme_id), Some(2));
}

#[test]
fn test_late_cue_for_passed_window_never_plays() {
    let (mut engine, _) = engine_with(config());
    engine
        .ingest(StreamMessage::audio(&b"pcm"[..], 1000, vec![VisemeCue::new(2, 0, 100)]), 0)
        .unwrap();
    engine.tick(500);
    engine.ingest(StreamMessage::viseme(VisemeCue::new(7, 200, 100)), 500).unwrap();
    let frame = engine.tick(516);
    assert_eq!(frame.weights.value("mouthPucker"), 0.0);

    engine.ingest(StreamMessage::viseme(VisemeCue::new(7, 600, 100)), 520).unwrap();
    assert_eq!(engine.tick(620).weights.value("mouthPucker"), 0.8);
}

#[test]
fn test_crossfade_ramps_between_cues() {
    let (mut engine, _) = engine_with(EngineConfig {
        rng_seed: Some(3),
        viseme_crossfade_ms: 100,
        ..EngineConfig::default()
    });
    engine
        .ingest(
            StreamMessage::audio(
                &b"pcm"[..],
                800,
                vec![VisemeCue::new(7, 0, 400), VisemeCue::new(21, 400, 400)],
            ),
            0,
        )
        .unwrap();

    engine.tick(300);
    assert_eq!(engine.tick(399).weights.value("mouthPucker"), 0.8);
    let mid = engine.tick(450).weights.value("mouthClose");
    assert!(mid > 0.0 && mid < 0.8, "mid-fade weight {}", mid);
    assert_eq!(engine.tick(500).weights.value("mouthClose"), 0.8);
}

#[test]
fn test_gesture_timeline_and_adhoc_gesture_latest_wins() {
    let (mut engine, _) = engine_with(config());
    engine
        .ingest_json(
            r#"{"type":"gesture_timeline","sessionId":"t1",
                "gestures":[{"gesture":"wave","at_ms":300}]}"#,
            0,
        )
        .unwrap();
    engine.ingest(StreamMessage::audio(&b"pcm"[..], 2000, Vec::new()), 0).unwrap();
    engine.ingest(StreamMessage::Gesture { gesture: GestureKind::Nod }, 100).unwrap();

    let frame = engine.tick(200);
    assert_eq!(frame.weights.value("headNod"), 0.6);

    let frame = engine.tick(300);
    assert_eq!(frame.weights.value("headNod"), 0.0);
    assert_eq!(frame.weights.value("armWaveRight"), 1.0);
}

#[test]
fn test_disabled_lip_sync_keeps_mouth_on_breathing() {
    let (mut engine, _) = engine_with(EngineConfig {
        enable_lip_sync: false,
        ..config()
    });
    engine
        .ingest(StreamMessage::audio(&b"pcm"[..], 600, vec![VisemeCue::new(2, 0, 600)]), 0)
        .unwrap();
    let frame = engine.tick(100);
    assert!(frame.weights.value("jawOpen") <= 0.03 + f32::EPSILON);
}
