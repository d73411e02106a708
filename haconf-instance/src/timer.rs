//! Named checkpoints recorded during a cycle.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

pub const TICK_WRITE: &str = "writeTmpl";
pub const TICK_VALIDATE: &str = "validate";
pub const TICK_RELOAD: &str = "reload";

/// Time spent between the previous checkpoint (or the start) and `label`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    pub label: String,
    pub elapsed_ms: f64,
}

/// Append-only checkpoint recorder, owned by whoever drives the cycle.
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
    last: Instant,
    ticks: Vec<Tick>,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            ticks: Vec::new(),
        }
    }

    pub fn tick(&mut self, label: &str) {
        let now = Instant::now();
        self.ticks.push(Tick {
            label: label.to_string(),
            elapsed_ms: as_millis(now - self.last),
        });
        self.last = now;
    }

    pub fn ticks(&self) -> &[Tick] {
        &self.ticks
    }

    pub fn labels(&self) -> Vec<&str> {
        self.ticks.iter().map(|t| t.label.as_str()).collect()
    }

    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tick) in self.ticks.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={:.3}ms", tick.label, tick.elapsed_ms)?;
        }
        Ok(())
    }
}

fn as_millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_are_appended_in_order() {
        let mut timer = Timer::new();
        timer.tick(TICK_WRITE);
        timer.tick(TICK_RELOAD);
        assert_eq!(timer.labels(), [TICK_WRITE, TICK_RELOAD]);
        assert!(timer.ticks().iter().all(|t| t.elapsed_ms >= 0.0));
    }

    #[test]
    fn display_lists_every_tick() {
        let mut timer = Timer::new();
        timer.tick(TICK_WRITE);
        timer.tick(TICK_VALIDATE);
        let text = timer.to_string();
        assert!(text.starts_with("writeTmpl="));
        assert!(text.contains(" validate="));
    }
}
