use std::time::Duration;

use crate::config::Stage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Piecewise-linear target over time: starts at `start` and moves linearly to each stage's
/// target over that stage's duration.
#[derive(Debug, Clone)]
pub struct RampSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl RampSchedule {
    pub fn new(start: u64, stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
        }
    }

    /// A flat line at `target` for `duration`.
    pub fn constant(target: u64, duration: Duration) -> Self {
        Self::new(target, vec![Stage::new(duration, target)])
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    pub fn peak(&self) -> u64 {
        self.stages.iter().map(|s| s.target).fold(self.start, u64::max)
    }

    /// Index of the stage containing `elapsed`, with its start offset. `elapsed` must be below
    /// the total duration.
    fn locate(&self, elapsed: Duration) -> (usize, Duration) {
        let idx = match self
            .cumulative_ends
            .binary_search_by(|end| end.cmp(&elapsed))
        {
            // An exact hit on a stage end belongs to the next stage.
            Ok(i) => i + 1,
            Err(i) => i,
        };
        let idx = idx.min(self.stages.len().saturating_sub(1));
        let stage_start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        (idx, stage_start)
    }

    fn start_target_of(&self, idx: usize) -> u64 {
        if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        }
    }

    pub fn target_at(&self, elapsed: Duration) -> u64 {
        if self.stages.is_empty() || elapsed.is_zero() {
            return self.start;
        }
        if elapsed >= self.total_duration() {
            return self.stages.last().map(|s| s.target).unwrap_or(self.start);
        }

        let (idx, stage_start) = self.locate(elapsed);
        let stage = &self.stages[idx];
        if stage.duration.is_zero() {
            return stage.target;
        }

        let start = self.start_target_of(idx) as i128;
        let delta = stage.target as i128 - start;
        let num = elapsed.saturating_sub(stage_start).as_nanos() as i128;
        let den = stage.duration.as_nanos() as i128;

        let cur = start + delta.saturating_mul(num) / den.max(1);
        cur.clamp(0, u64::MAX as i128) as u64
    }

    /// Area under the curve from 0 to `elapsed`, in target-nanoseconds.
    fn area_nanos(&self, elapsed: Duration) -> u128 {
        let elapsed = elapsed.min(self.total_duration());
        let mut area: u128 = 0;
        let mut stage_start = Duration::ZERO;

        for (idx, stage) in self.stages.iter().enumerate() {
            if elapsed <= stage_start {
                break;
            }
            let d = stage.duration.as_nanos();
            if d == 0 {
                continue;
            }
            let e = elapsed.saturating_sub(stage_start).as_nanos().min(d);
            let a = self.start_target_of(idx) as u128;
            let b = stage.target as u128;

            // Trapezoid between a and the interpolated value at e:
            // a*e + (b - a) * e^2 / (2d), split by sign to stay unsigned.
            let ramp = e.saturating_mul(e) / (2 * d);
            area = area.saturating_add(a.saturating_mul(e));
            if b >= a {
                area = area.saturating_add((b - a).saturating_mul(ramp));
            } else {
                area = area.saturating_sub((a - b).saturating_mul(ramp));
            }

            stage_start = stage_start.saturating_add(stage.duration);
        }

        area
    }

    /// Number of arrivals due by `elapsed` when the target is a rate per `time_unit`.
    ///
    /// Non-decreasing in `elapsed`; at the end of a constant schedule this equals
    /// `floor(rate * duration / time_unit)`.
    pub fn arrivals_due(&self, elapsed: Duration, time_unit: Duration) -> u64 {
        let unit = time_unit.as_nanos().max(1);
        (self.area_nanos(elapsed) / unit).min(u64::MAX as u128) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        if self.stages.is_empty() {
            return None;
        }

        let total = self.total_duration();
        let clamped = elapsed.min(total);

        let (idx, stage_start) = if clamped >= total {
            let idx = self.stages.len() - 1;
            (idx, total.saturating_sub(self.stages[idx].duration))
        } else {
            self.locate(clamped)
        };

        let stage_duration = self.stages[idx].duration;
        let stage_elapsed = clamped.saturating_sub(stage_start);

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_duration.saturating_sub(stage_elapsed),
            start_target: self.start_target_of(idx),
            end_target: self.stages[idx].target,
            current_target: self.target_at(clamped),
        })
    }

    /// How long worker `vu_index` (1-based) should sleep before checking again whether the
    /// ramp has reached it.
    pub fn next_recheck_in(&self, elapsed: Duration, vu_index: u64) -> Duration {
        let default_sleep = Duration::from_millis(50);

        if self.stages.is_empty() {
            return default_sleep;
        }

        let total = self.total_duration();
        if elapsed >= total {
            return Duration::ZERO;
        }

        if vu_index <= self.target_at(elapsed) {
            return Duration::ZERO;
        }

        let (idx, stage_start) = self.locate(elapsed);
        let stage_end = stage_start.saturating_add(self.stages[idx].duration);
        let start_target = self.start_target_of(idx);
        let end_target = self.stages[idx].target;

        // The target only falls or stays flat in this stage, or never reaches this VU.
        if end_target <= start_target || vu_index > end_target {
            return stage_end.saturating_sub(elapsed).min(default_sleep);
        }

        // Solve start + (end - start) * t / dur >= vu_index for t.
        let delta = (end_target - start_target) as u128;
        let want = (vu_index - start_target) as u128;
        let stage_ns = self.stages[idx].duration.as_nanos();
        let needed_ns = (want * stage_ns).div_ceil(delta);
        let elapsed_ns = elapsed.saturating_sub(stage_start).as_nanos();
        let wait_ns = needed_ns.saturating_sub(elapsed_ns);

        Duration::from_nanos(wait_ns.min(u64::MAX as u128) as u64).min(default_sleep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn ramp() -> RampSchedule {
        // 0 -> 1000 over 15s, hold 30s, 1000 -> 0 over 15s.
        RampSchedule::new(
            0,
            vec![
                Stage::new(secs(15), 1000),
                Stage::new(secs(30), 1000),
                Stage::new(secs(15), 0),
            ],
        )
    }

    #[test]
    fn target_interpolates_linearly() {
        let s = ramp();
        assert_eq!(s.total_duration(), secs(60));
        assert_eq!(s.target_at(Duration::ZERO), 0);
        assert_eq!(s.target_at(ms(7_500)), 500);
        assert_eq!(s.target_at(secs(15)), 1000);
        assert_eq!(s.target_at(secs(30)), 1000);
        assert_eq!(s.target_at(ms(52_500)), 500);
        assert_eq!(s.target_at(secs(90)), 0);
        assert_eq!(s.peak(), 1000);
    }

    #[test]
    fn constant_arrivals_match_rate_times_duration() {
        let s = RampSchedule::constant(100, secs(2));
        assert_eq!(s.arrivals_due(Duration::ZERO, secs(1)), 0);
        assert_eq!(s.arrivals_due(ms(10), secs(1)), 1);
        assert_eq!(s.arrivals_due(ms(1_005), secs(1)), 100);
        assert_eq!(s.arrivals_due(secs(2), secs(1)), 200);
        assert_eq!(s.arrivals_due(secs(5), secs(1)), 200);

        // 7 per minute over 90s.
        let s = RampSchedule::constant(7, secs(90));
        assert_eq!(s.arrivals_due(secs(90), secs(60)), 10);
    }

    #[test]
    fn ramp_arrivals_integrate_the_trapezoids() {
        let s = ramp();
        // 7_500 up + 30_000 flat + 7_500 down.
        assert_eq!(s.arrivals_due(secs(15), secs(1)), 7_500);
        assert_eq!(s.arrivals_due(secs(45), secs(1)), 37_500);
        assert_eq!(s.arrivals_due(secs(60), secs(1)), 45_000);

        let mut last = 0;
        for t in (0..=60_000).step_by(250) {
            let due = s.arrivals_due(ms(t), secs(1));
            assert!(due >= last, "arrivals went backwards at {t}ms");
            last = due;
        }
    }

    #[test]
    fn stage_snapshot_tracks_position() {
        let s = ramp();
        let snap = s
            .stage_snapshot_at(secs(20))
            .unwrap_or_else(|| panic!("expected a stage"));
        assert_eq!(snap.index, 1);
        assert_eq!(snap.count, 3);
        assert_eq!(snap.stage_elapsed, secs(5));
        assert_eq!(snap.stage_remaining, secs(25));
        assert_eq!(snap.current_target, 1000);

        let end = s
            .stage_snapshot_at(secs(100))
            .unwrap_or_else(|| panic!("expected a stage"));
        assert_eq!(end.index, 2);
        assert_eq!(end.stage_remaining, Duration::ZERO);
    }

    #[test]
    fn recheck_waits_until_ramp_reaches_vu() {
        let s = RampSchedule::new(0, vec![Stage::new(secs(10), 10)]);
        // VU 5 activates at 5s.
        assert_eq!(s.next_recheck_in(secs(5), 5), Duration::ZERO);
        assert_eq!(s.next_recheck_in(ms(4_980), 5), ms(20));
        assert_eq!(s.next_recheck_in(secs(1), 5), ms(50));
        assert_eq!(s.next_recheck_in(secs(10), 5), Duration::ZERO);
    }
}
