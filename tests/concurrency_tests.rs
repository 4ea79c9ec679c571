use avatarsync_me::{
    AvatarEngine, ClockPlayback, EngineConfig, EngineDriver, EngineEvent, GestureKind,
    SessionStatus, StreamMessage, VisemeCue,
};
use std::time::Duration;

fn engine() -> AvatarEngine {
    let config = EngineConfig {
        rng_seed: Some(77),
        viseme_crossfade_ms: 0,
        frame_interval_ms: 16,
        ..EngineConfig::default()
    };
    AvatarEngine::new(config, Box::new(ClockPlayback::new()), 0).unwrap()
}

fn reply(session: &str, viseme_id: u32) -> StreamMessage {
    StreamMessage::AudioChunk {
        audio: bytes::Bytes::from_static(b"pcm"),
        duration_ms: Some(2000),
        visemes: vec![VisemeCue::new(viseme_id, 0, 2000)],
        session_id: Some(session.to_string()),
    }
}

#[tokio::test(start_paused = true)]
async fn test_barge_in_through_driver_never_mixes_sessions() {
    let driver = EngineDriver::spawn(engine());
    let mut frames = driver.frames();

    driver.send(reply("first", 8)).await.unwrap();
    driver.trigger_gesture(GestureKind::Point).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(driver.latest_frame().weights.value("mouthFunnel"), 0.7);

    driver.send(reply("second", 7)).await.unwrap();

    // Every frame published after the switch belongs wholly to one session.
    for _ in 0..20 {
        frames.changed().await.unwrap();
        let frame = frames.borrow_and_update().clone();
        match frame.session_id.as_deref() {
            Some("first") => assert_eq!(frame.weights.value("mouthPucker"), 0.0),
            Some("second") => {
                assert_eq!(frame.weights.value("mouthFunnel"), 0.0);
                assert_eq!(frame.weights.value("armPointRight"), 0.0);
            }
            other => panic!("unexpected session {:?}", other),
        }
    }
    assert_eq!(driver.latest_frame().session_id.as_deref(), Some("second"));
    driver.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_gesture_decays_on_driver_clock() {
    let driver = EngineDriver::spawn(engine());
    driver.trigger_gesture(GestureKind::Wave).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(driver.latest_frame().weights.value("armWaveRight"), 1.0);

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(driver.latest_frame().weights.value("armWaveRight"), 0.0);
    driver.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_events_reach_every_subscriber() {
    let driver = EngineDriver::spawn(engine());
    let mut a = driver.subscribe_events();
    let mut b = driver.subscribe_events();

    driver
        .send(StreamMessage::Error { message: "tts offline".into() })
        .await
        .unwrap();

    for rx in [&mut a, &mut b] {
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, EngineEvent::SessionErrored { session_id: None, .. }));
    }
    driver.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_driver_plays_session_to_end() {
    let driver = EngineDriver::spawn(engine());
    let sender = driver.message_sender();
    sender.send(reply("only", 2)).await.unwrap();
    sender.send(StreamMessage::End).await.unwrap();

    tokio::time::sleep(Duration::from_millis(2100)).await;
    let frame = driver.latest_frame();
    assert_eq!(frame.status, SessionStatus::Ended);
    let engine = driver.shutdown().await.unwrap();
    assert!(engine.frames() > 100);
}
