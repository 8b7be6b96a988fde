use std::time::Duration;

/// Exponential backoff with a per-attempt cap and an optional cumulative budget
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    budget: Option<Duration>,
    attempts: u32,
    spent: Duration,
}

impl Backoff {
    /// Unbounded number of attempts
    pub fn new(min: Duration, max: Duration) -> Self {
        Backoff {
            min,
            max: max.max(min),
            budget: None,
            attempts: 0,
            spent: Duration::ZERO,
        }
    }

    /// Attempts stop once the summed delays would exceed `budget`
    pub fn with_budget(min: Duration, max: Duration, budget: Duration) -> Self {
        Backoff {
            budget: Some(budget),
            ..Self::new(min, max)
        }
    }

    /// Delay before the next attempt, or `None` when the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        let factor = 1u32 << self.attempts.min(16);
        let delay = self.min.saturating_mul(factor).min(self.max);

        if let Some(budget) = self.budget {
            if self.spent + delay > budget {
                return None;
            }
        }

        self.attempts += 1;
        self.spent += delay;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.spent = Duration::ZERO;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn spent(&self) -> Duration {
        self.spent
    }
}
