//! Clock ticker thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

use super::simulator::Shared;

/// Most tick requests that may be waiting for the worker at once.
pub const MAX_PENDING_TICKS: u32 = 16;

const MIN_WAIT: Duration = Duration::from_millis(1);
const MAX_WAIT: Duration = Duration::from_millis(100);

/// Timer period in milliseconds and ticks per period for a tick frequency
/// in Hz. Above 1 kHz the timer runs every millisecond and requests several
/// ticks at once.
pub fn tick_schedule(frequency: f64) -> (u64, u32) {
    let millis = (1000.0 / frequency).round();
    if millis < 1.0 {
        let ticks = (frequency / 1000.0).round().max(1.0);
        (1, ticks.min(u32::MAX as f64) as u32)
    } else {
        (millis.min(u64::MAX as f64) as u64, 1)
    }
}

pub(super) fn clamp_wait(wait: Duration) -> Duration {
    wait.clamp(MIN_WAIT, MAX_WAIT)
}

/// Body of the ticker thread. Requests ticks from the worker while the
/// simulator is running with auto-ticking on.
pub(super) fn run(shared: Arc<Shared>) {
    let mut control = shared.lock_control();
    let mut next: Option<Instant> = None;
    loop {
        if control.shutdown {
            break;
        }
        if !(control.running && control.ticking) {
            next = None;
            control = shared.wait_ticker(control, MAX_WAIT);
            continue;
        }

        let (millis, ticks) = tick_schedule(control.frequency);
        let period = Duration::from_millis(millis);
        let now = Instant::now();
        let due = *next.get_or_insert(now + period);
        if now >= due {
            let pending = control.pending_ticks.saturating_add(ticks).min(MAX_PENDING_TICKS);
            trace!(pending, "ticker fired");
            control.pending_ticks = pending;
            shared.notify_worker();
            next = Some(now + period);
        }
        let wait = next.map_or(MAX_WAIT, |n| n.saturating_duration_since(now));
        control = shared.wait_ticker(control, clamp_wait(wait));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_schedule_slow_clock() {
        assert_eq!(tick_schedule(1.0), (1000, 1));
        assert_eq!(tick_schedule(4.0), (250, 1));
        assert_eq!(tick_schedule(0.5), (2000, 1));
    }

    #[test]
    fn test_schedule_fast_clock() {
        assert_eq!(tick_schedule(1000.0), (1, 1));
        assert_eq!(tick_schedule(4096.0), (1, 4));
        // rounds to 0 ms, still one tick per millisecond
        assert_eq!(tick_schedule(2100.0), (1, 2));
    }

    #[test]
    fn test_schedule_tracks_frequency() {
        for f in [2.0, 10.0, 50.0, 125.0, 500.0] {
            let (millis, ticks) = tick_schedule(f);
            let achieved = ticks as f64 * 1000.0 / millis as f64;
            assert_relative_eq!(achieved, f, max_relative = 0.05);
        }
    }

    #[test]
    fn test_wait_is_clamped() {
        assert_eq!(clamp_wait(Duration::ZERO), MIN_WAIT);
        assert_eq!(clamp_wait(Duration::from_secs(5)), MAX_WAIT);
        assert_eq!(clamp_wait(Duration::from_millis(20)), Duration::from_millis(20));
    }
}
