use rand::Rng;
use std::time::Duration;

use crate::config::ChannelSettings;

const JITTER: f64 = 0.2;
const MAX_MULTIPLIER: f64 = 10.0;

/// Capped exponential backoff between reconnection attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            multiplier: if multiplier.is_finite() {
                multiplier.clamp(1.0, MAX_MULTIPLIER)
            } else {
                1.0
            },
            current: initial,
            jitter: true,
        }
    }

    pub fn from_settings(settings: &ChannelSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.backoff_initial_ms),
            Duration::from_millis(settings.backoff_max_ms),
            settings.backoff_multiplier,
        )
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = self.scale(base, self.multiplier);

        if !self.jitter {
            return base;
        }
        let factor = rand::thread_rng().gen_range(1.0 - JITTER..=1.0 + JITTER);
        self.scale(base, factor)
    }

    /// `delay * factor`, capped at `max` instead of overflowing.
    fn scale(&self, delay: Duration, factor: f64) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
            .map_or(self.max, |scaled| scaled.min(self.max))
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
