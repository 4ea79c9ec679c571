//! Idle loop: perpetual blinking and breathing
//!
//! The idle loop never stops. It is owned by the engine rather than by a
//! stream session, so cancelling or replacing a session leaves its timers
//! untouched.

use crate::config::EngineConfig;
use crate::registry::{EYE_BLINK_LEFT, EYE_BLINK_RIGHT, JAW_OPEN};
use avatarsync_core::{elapsed_ms, BlendshapeWeights, Millis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;

/// Free-running blink and breathing generator
pub struct IdleLoop {
    rng: StdRng,
    blink_min_interval_ms: Millis,
    blink_max_interval_ms: Millis,
    blink_duration_ms: Millis,
    next_blink_at: Millis,
    blink_until: Option<Millis>,
    blink_count: u64,
    breath_phase: f64,
    breath_amplitude: f32,
    breath_period_ms: Millis,
    last_tick: Option<Millis>,
    contribution: BlendshapeWeights,
}

impl IdleLoop {
    /// Create the loop and schedule its first blink relative to `now`
    pub fn new(config: &EngineConfig, now: Millis) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut idle = Self {
            rng,
            blink_min_interval_ms: config.blink_min_interval_ms,
            blink_max_interval_ms: config.blink_max_interval_ms,
            blink_duration_ms: config.blink_duration_ms,
            next_blink_at: now,
            blink_until: None,
            blink_count: 0,
            breath_phase: 0.0,
            breath_amplitude: config.breath_amplitude,
            breath_period_ms: config.breath_period_ms.max(1),
            last_tick: None,
            contribution: BlendshapeWeights::new(),
        };
        idle.next_blink_at = now + idle.blink_interval();
        idle.write_contribution(0.0, 0.0);
        idle
    }

    fn blink_interval(&mut self) -> Millis {
        self.rng
            .gen_range(self.blink_min_interval_ms..=self.blink_max_interval_ms)
    }

    /// Advance blink scheduling and the breathing phase to `now`
    pub fn tick(&mut self, now: Millis) -> &BlendshapeWeights {
        let dt = self
            .last_tick
            .map(|last| elapsed_ms(last, now))
            .unwrap_or(0);
        self.last_tick = Some(self.last_tick.map_or(now, |last| last.max(now)));

        self.breath_phase = (self.breath_phase + TAU * dt as f64 / self.breath_period_ms as f64) % TAU;

        // Catch up over long gaps so the schedule always re-arms.
        loop {
            match self.blink_until {
                Some(until) if now >= until => {
                    self.blink_until = None;
                    self.next_blink_at = until + self.blink_interval();
                }
                Some(_) => break,
                None if now >= self.next_blink_at => {
                    self.blink_until = Some(self.next_blink_at + self.blink_duration_ms);
                    self.blink_count += 1;
                }
                None => break,
            }
        }

        let blink = if self.blink_until.is_some() { 1.0 } else { 0.0 };
        let breath = (self.breath_phase.sin() as f32 * self.breath_amplitude).max(0.0);
        self.write_contribution(blink, breath);
        &self.contribution
    }

    fn write_contribution(&mut self, blink: f32, breath: f32) {
        self.contribution.set(EYE_BLINK_LEFT, blink);
        self.contribution.set(EYE_BLINK_RIGHT, blink);
        self.contribution.set(JAW_OPEN, breath);
    }

    /// Weights produced by the most recent tick
    pub fn contribution(&self) -> &BlendshapeWeights {
        &self.contribution
    }

    pub fn is_blinking(&self) -> bool {
        self.blink_until.is_some()
    }

    pub fn next_blink_at(&self) -> Millis {
        self.next_blink_at
    }

    /// Blinks started since creation
    pub fn blink_count(&self) -> u64 {
        self.blink_count
    }
}
