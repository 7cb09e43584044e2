use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single execution instance of a feed type.
///
/// `progress`, `files_uploaded` and `is_canceled` only ever move forward;
/// callers must never write a value that regresses them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub id: String,
    #[serde(rename = "type")]
    pub feed_type: String,
    pub progress: u32,
    pub data_fetched: bool,
    pub files_uploaded: u32,
    pub is_canceled: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Generation {
    pub fn new(id: String, feed_type: String, start_time: DateTime<Utc>) -> Self {
        Self {
            id,
            feed_type,
            progress: 0,
            data_fetched: false,
            files_uploaded: 0,
            is_canceled: false,
            start_time,
            end_time: None,
        }
    }

    /// Reset the mutable counters for a restart, keeping id/type/start_time.
    pub fn reset(&mut self) {
        self.progress = 0;
        self.data_fetched = false;
        self.files_uploaded = 0;
        self.is_canceled = false;
        self.end_time = None;
    }

    pub fn set_progress(&mut self, pct: u32, now: DateTime<Utc>) {
        if pct > self.progress {
            self.progress = pct;
        }
        if self.progress >= 100 && self.end_time.is_none() {
            self.end_time = Some(now);
        }
    }
}

/// Static, per-process configuration for a named feed type.
#[derive(Debug, Clone)]
pub struct FeedType {
    pub name: String,
    pub count_query: String,
    pub select_query: String,
    pub size_limit_bytes: usize,
    pub line_limit: usize,
    pub destination_dir: String,
}

/// `(start_timestamp, fire_interval)` describing when a recurring task fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub start_timestamp: DateTime<Utc>,
    pub fire_interval: chrono::Duration,
    start_exceeded: bool,
}

impl Schedule {
    pub fn new(start_timestamp: DateTime<Utc>, fire_interval: chrono::Duration) -> Self {
        Self {
            start_timestamp,
            fire_interval,
            start_exceeded: false,
        }
    }

    /// See SPEC_FULL.md §4.6 for the exact alignment algorithm.
    pub fn next(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        if !self.start_exceeded {
            self.start_exceeded = true;
            if self.start_timestamp > now {
                return self.start_timestamp;
            }
            let elapsed = now - self.start_timestamp;
            let interval_ms = self.fire_interval.num_milliseconds().max(1);
            let elapsed_ms = elapsed.num_milliseconds();
            let k = round_half_to_even(elapsed_ms as f64 / interval_ms as f64);
            let mut aligned = self.start_timestamp + self.fire_interval * k as i32;
            if aligned < now {
                aligned += self.fire_interval;
            }
            return aligned;
        }
        (now + self.fire_interval).trunc_subsecs(0)
    }
}

use chrono::SubsecRound;

fn round_half_to_even(x: f64) -> i64 {
    let floor = x.floor();
    let diff = x - floor;
    if diff < 0.5 {
        floor as i64
    } else if diff > 0.5 {
        floor as i64 + 1
    } else if (floor as i64) % 2 == 0 {
        floor as i64
    } else {
        floor as i64 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn generation_progress_never_regresses() {
        let mut g = Generation::new("id".into(), "orders".into(), Utc::now());
        g.set_progress(40, Utc::now());
        g.set_progress(10, Utc::now());
        assert_eq!(g.progress, 40);
    }

    #[test]
    fn generation_sets_end_time_at_100() {
        let mut g = Generation::new("id".into(), "orders".into(), Utc::now());
        let now = Utc::now();
        g.set_progress(100, now);
        assert_eq!(g.end_time, Some(now));
    }

    #[test]
    fn schedule_first_call_future_start_returns_start() {
        let start = Utc::now() + Duration::seconds(30);
        let mut sched = Schedule::new(start, Duration::seconds(60));
        let next = sched.next(Utc::now());
        assert_eq!(next, start);
    }

    #[test]
    fn schedule_first_call_past_start_aligns_forward() {
        let now = Utc::now();
        let start = now - Duration::seconds(90);
        let mut sched = Schedule::new(start, Duration::seconds(60));
        let next = sched.next(now);
        assert!(next >= now);
        assert!(next <= now + Duration::seconds(60));
    }

    #[test]
    fn schedule_second_call_is_now_plus_interval_truncated() {
        let now = Utc::now();
        let mut sched = Schedule::new(now - Duration::seconds(120), Duration::seconds(60));
        let _ = sched.next(now);
        let second = sched.next(now);
        assert_eq!(second.timestamp_subsec_nanos(), 0);
    }
}
