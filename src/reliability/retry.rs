use crate::annotator::AnnotatorError;
use crate::domain::ScoreSet;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound on a single annotator call. Expiry counts as a transient failure.
    pub attempt_timeout: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(20),
            attempt_timeout: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = 1u32
            .checked_shl(exponent)
            .and_then(|multiplier| self.base_delay.checked_mul(multiplier))
            .unwrap_or(self.max_delay);

        std::cmp::min(delay, self.max_delay)
    }

    /// [`backoff`](Self::backoff) with the optional ±50% jitter applied,
    /// never exceeding `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if self.jitter {
            let factor = rand::rng().random_range(0.5..1.5);
            let jittered = Duration::from_millis((delay.as_millis() as f64 * factor) as u64);
            std::cmp::min(jittered, self.max_delay)
        } else {
            delay
        }
    }

    /// Longest value [`delay_for`](Self::delay_for) can return for `attempt`.
    fn longest_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if self.jitter {
            std::cmp::min(delay.saturating_add(delay / 2), self.max_delay)
        } else {
            delay
        }
    }

    pub fn start(&self) -> AttemptState {
        AttemptState::Ready { attempt: 1 }
    }

    /// Worst-case time one record can occupy a worker, excluding pacing.
    pub fn worst_case(&self) -> Duration {
        (1..=self.max_attempts)
            .map(|attempt| {
                let wait = if attempt < self.max_attempts {
                    self.longest_delay(attempt)
                } else {
                    Duration::ZERO
                };
                self.attempt_timeout.saturating_add(wait)
            })
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Per-record retry state. Workers drive it one annotator result at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptState {
    /// About to make attempt number `attempt`.
    Ready { attempt: u32 },
    /// Waiting `delay` before attempt number `attempt`.
    Backoff {
        attempt: u32,
        delay: Duration,
        last_error: AnnotatorError,
    },
    Succeeded { attempts: u32, scores: ScoreSet },
    Exhausted { attempts: u32, error: AnnotatorError },
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded { .. } | AttemptState::Exhausted { .. }
        )
    }

    /// Fold the result of the current attempt into the next state.
    ///
    /// Only meaningful from `Ready`; other states are returned unchanged.
    pub fn on_result(
        self,
        policy: &RetryPolicy,
        result: Result<ScoreSet, AnnotatorError>,
    ) -> AttemptState {
        let AttemptState::Ready { attempt } = self else {
            return self;
        };

        match result {
            Ok(scores) => AttemptState::Succeeded {
                attempts: attempt,
                scores,
            },
            Err(error) if error.is_permanent() || attempt >= policy.max_attempts => {
                AttemptState::Exhausted {
                    attempts: attempt,
                    error,
                }
            }
            Err(error) => AttemptState::Backoff {
                attempt: attempt + 1,
                delay: policy.delay_for(attempt),
                last_error: error,
            },
        }
    }

    /// Leave `Backoff` once the delay has been observed.
    pub fn resume(self) -> AttemptState {
        match self {
            AttemptState::Backoff { attempt, .. } => AttemptState::Ready { attempt },
            other => other,
        }
    }
}
