//! Async driver: runs an `AvatarEngine` on a tokio task
//!
//! One task owns the engine, so message handling and frame ticks interleave
//! without locks. Frames go out on a `watch` channel (the renderer reads the
//! latest snapshot) and engine events on a `broadcast` channel.

use crate::engine::{AvatarEngine, WeightFrame};
use crate::error::AvatarError;
use crate::events::EngineEvent;
use crate::message::StreamMessage;
use crate::registry::GestureKind;
use avatarsync_core::Millis;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const MESSAGE_BUFFER_SIZE: usize = 1024;
const CONTROL_BUFFER_SIZE: usize = 16;

/// Out-of-band requests to the driver task
#[derive(Debug, Clone)]
pub enum DriverCommand {
    Gesture(GestureKind),
    Cancel(String),
    Shutdown,
}

pub struct EngineDriver;

impl EngineDriver {
    /// Spawn the engine loop.
    ///
    /// The engine's clock is taken to start now: build it with `now = 0`
    /// just before spawning.
    pub fn spawn(mut engine: AvatarEngine) -> DriverHandle {
        let interval = Duration::from_millis(engine.config().frame_interval_ms.max(1));
        let (message_tx, mut message_rx) = mpsc::channel::<StreamMessage>(MESSAGE_BUFFER_SIZE);
        let (control_tx, mut control_rx) = mpsc::channel::<DriverCommand>(CONTROL_BUFFER_SIZE);
        let (event_tx, _) = broadcast::channel(engine.config().event_buffer_size.max(1));

        let origin = Instant::now();
        let clock = move || -> Millis { origin.elapsed().as_millis() as Millis };

        let (frame_tx, frame_rx) = watch::channel(engine.tick(clock()));
        let events = event_tx.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut messages_open = true;

            loop {
                tokio::select! {
                    command = control_rx.recv() => {
                        match command {
                            Some(DriverCommand::Gesture(kind)) => engine.trigger_gesture(kind, clock()),
                            Some(DriverCommand::Cancel(reason)) => {
                                engine.cancel(&reason, clock());
                            }
                            Some(DriverCommand::Shutdown) | None => {
                                info!("Engine driver shutting down after {} frames", engine.frames());
                                break;
                            }
                        }
                    }
                    message = message_rx.recv(), if messages_open => {
                        match message {
                            Some(message) => {
                                if let Err(e) = engine.ingest(message, clock()) {
                                    debug!("Stream message not applied: {}", e);
                                }
                            }
                            None => {
                                debug!("Message stream closed, driver keeps animating");
                                messages_open = false;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        let frame = engine.tick(clock());
                        if frame_tx.send(frame).is_err() {
                            warn!("No frame receivers left, stopping engine driver");
                            break;
                        }
                    }
                }

                for event in engine.drain_events() {
                    // No subscribers is fine; events are advisory.
                    let _ = events.send(event);
                }
            }

            engine
        });

        DriverHandle {
            messages: message_tx,
            control: control_tx,
            frames: frame_rx,
            events: event_tx,
            task,
        }
    }
}

/// Caller side of a running driver
pub struct DriverHandle {
    messages: mpsc::Sender<StreamMessage>,
    control: mpsc::Sender<DriverCommand>,
    frames: watch::Receiver<WeightFrame>,
    events: broadcast::Sender<EngineEvent>,
    task: JoinHandle<AvatarEngine>,
}

impl DriverHandle {
    /// Queue one stream message
    pub async fn send(&self, message: StreamMessage) -> Result<(), AvatarError> {
        self.messages
            .send(message)
            .await
            .map_err(|_| AvatarError::Stream("engine driver stopped".to_string()))
    }

    /// Sender for producers such as the WebSocket client
    pub fn message_sender(&self) -> mpsc::Sender<StreamMessage> {
        self.messages.clone()
    }

    pub async fn trigger_gesture(&self, kind: GestureKind) -> Result<(), AvatarError> {
        self.command(DriverCommand::Gesture(kind)).await
    }

    pub async fn cancel(&self, reason: impl Into<String>) -> Result<(), AvatarError> {
        self.command(DriverCommand::Cancel(reason.into())).await
    }

    async fn command(&self, command: DriverCommand) -> Result<(), AvatarError> {
        self.control
            .send(command)
            .await
            .map_err(|_| AvatarError::Stream("engine driver stopped".to_string()))
    }

    pub fn frames(&self) -> watch::Receiver<WeightFrame> {
        self.frames.clone()
    }

    pub fn latest_frame(&self) -> WeightFrame {
        self.frames.borrow().clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Stop the loop and get the engine back
    pub async fn shutdown(self) -> Result<AvatarEngine, AvatarError> {
        // The loop also stops when the control channel closes.
        let _ = self.control.send(DriverCommand::Shutdown).await;
        self.task
            .await
            .map_err(|e| AvatarError::Stream(format!("engine driver task failed: {}", e)))
    }
}
