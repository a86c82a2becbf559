use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOutcome {
    pub success: bool,
    pub slow: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WindowStats {
    pub total: usize,
    pub failures: usize,
    pub slow_calls: usize,
    /// Percentage of failed calls
    pub failure_rate: f64,
    /// Percentage of calls above the slow call duration
    pub slow_call_rate: f64,
}

/// Fixed capacity ring buffer of the most recent call outcomes.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    outcomes: Vec<CallOutcome>,
    capacity: usize,
    next: usize,
}

impl SlidingWindow {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            outcomes: Vec::with_capacity(capacity),
            capacity,
            next: 0,
        }
    }

    pub fn push(&mut self, outcome: CallOutcome) {
        if self.outcomes.len() < self.capacity {
            self.outcomes.push(outcome);
        } else {
            self.outcomes[self.next] = outcome;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn clear(&mut self) {
        self.outcomes.clear();
        self.next = 0;
    }

    #[must_use]
    pub fn stats(&self) -> WindowStats {
        let total = self.outcomes.len();
        if total == 0 {
            return WindowStats::default();
        }

        let failures = self.outcomes.iter().filter(|o| !o.success).count();
        let slow_calls = self.outcomes.iter().filter(|o| o.slow).count();

        #[allow(clippy::cast_precision_loss)]
        let pct = |count: usize| count as f64 / total as f64 * 100.0;

        WindowStats {
            total,
            failures,
            slow_calls,
            failure_rate: pct(failures),
            slow_call_rate: pct(slow_calls),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OK: CallOutcome = CallOutcome {
        success: true,
        slow: false,
    };
    const FAILED: CallOutcome = CallOutcome {
        success: false,
        slow: false,
    };

    #[test]
    fn test_window_keeps_only_most_recent_outcomes() {
        let mut window = SlidingWindow::new(4);
        for _ in 0..4 {
            window.push(FAILED);
        }
        assert_eq!(window.stats().failure_rate, 100.0);

        window.push(OK);
        window.push(OK);
        let stats = window.stats();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.failure_rate, 50.0);
    }

    #[test]
    fn test_slow_calls_are_counted_separately() {
        let mut window = SlidingWindow::new(10);
        window.push(CallOutcome {
            success: true,
            slow: true,
        });
        window.push(OK);
        let stats = window.stats();
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.slow_call_rate, 50.0);
    }
}
