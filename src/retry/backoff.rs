//! Pluggable backoff strategies (C6): exponential (four jitter variants),
//! constant, and linear. All strategies short-circuit to the server-dictated
//! `Retry-After` delay when the error carries one.

use std::time::Duration;

use rand::Rng;

use crate::error::PipelineError;

/// `next_delay` is a pure function of `(attempt, err)` except for
/// [`JitterType::Decorrelated`], which needs `&mut self` to track the
/// previous delay.
pub trait BackoffStrategy: Send {
    fn next_delay(&mut self, attempt: u32, err: &PipelineError) -> Duration;
    fn reset(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterType {
    None,
    Full,
    /// `base/2 + uniform(0, base/2)`. Default.
    Equal,
    /// AWS decorrelated jitter: `uniform(initial_delay, previous_delay * 3)`.
    Decorrelated,
}

pub struct ExponentialBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_type: JitterType,
    previous_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter_type: JitterType::Equal,
            previous_delay: initial_delay,
        }
    }

    pub fn with_jitter(mut self, jitter_type: JitterType) -> Self {
        self.jitter_type = jitter_type;
        self
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(base).min(self.max_delay)
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32, err: &PipelineError) -> Duration {
        if let Some(retry_after) = err.retry_after() {
            return retry_after.min(self.max_delay);
        }
        let base = self.base_delay(attempt);
        let delay = match self.jitter_type {
            JitterType::None => base,
            JitterType::Full => {
                let secs = rand::thread_rng().gen_range(0.0..=base.as_secs_f64().max(0.0));
                Duration::from_secs_f64(secs)
            }
            JitterType::Equal => {
                let half = base.as_secs_f64() / 2.0;
                let jittered = rand::thread_rng().gen_range(0.0..=half.max(0.0));
                Duration::from_secs_f64(half + jittered)
            }
            JitterType::Decorrelated => {
                let lower = self.initial_delay.as_secs_f64();
                let upper = (self.previous_delay.as_secs_f64() * 3.0).max(lower);
                let secs = rand::thread_rng().gen_range(lower..=upper);
                let delay = Duration::from_secs_f64(secs).min(self.max_delay);
                self.previous_delay = delay;
                delay
            }
        };
        delay.min(self.max_delay)
    }

    fn reset(&mut self) {
        self.previous_delay = self.initial_delay;
    }
}

pub struct ConstantBackoff {
    pub delay: Duration,
}

impl ConstantBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl BackoffStrategy for ConstantBackoff {
    fn next_delay(&mut self, _attempt: u32, err: &PipelineError) -> Duration {
        err.retry_after().unwrap_or(self.delay)
    }

    fn reset(&mut self) {}
}

pub struct LinearBackoff {
    pub initial_delay: Duration,
    pub increment: Duration,
    pub max_delay: Duration,
}

impl LinearBackoff {
    pub fn new(initial_delay: Duration, increment: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            increment,
            max_delay,
        }
    }
}

impl BackoffStrategy for LinearBackoff {
    fn next_delay(&mut self, attempt: u32, err: &PipelineError) -> Duration {
        if let Some(retry_after) = err.retry_after() {
            return retry_after.min(self.max_delay);
        }
        let delay = self.initial_delay + self.increment * attempt;
        delay.min(self.max_delay)
    }

    fn reset(&mut self) {}
}
