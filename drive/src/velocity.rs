// Signed rotor velocity from edge timing

use crate::edge::{Direction, EdgeTiming};

/// Velocity for an average period [µs] and direction.
///
/// Not clamped: a very short period gives a very large magnitude.
#[inline(always)]
pub fn velocity(period_us: f32, direction: Direction) -> f32 {
    (1_000_000.0 / period_us) * direction.sign()
}

/// Velocity estimate from a timing snapshot.
///
/// Returns 0.0 before two edges have been seen, and once no edge arrived
/// within `edge_timeout_us` (rotor stopped).
pub fn estimate(timing: &EdgeTiming, now_us: u64, edge_timeout_us: u64) -> f32 {
    let Some(period_us) = timing.average_period_us() else {
        return 0.0;
    };
    match timing.since_last_edge_us(now_us) {
        Some(quiet) if quiet <= edge_timeout_us => velocity(period_us, timing.direction),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{EdgeTracker, Sensor};

    #[test]
    fn test_velocity_formula() {
        assert_eq!(velocity(1_000_000.0, Direction::Forward), 1.0);
        assert_eq!(velocity(500_000.0, Direction::Reverse), -2.0);
    }

    #[test]
    fn test_small_period_not_clamped() {
        assert_eq!(velocity(1.0, Direction::Forward), 1_000_000.0);
    }

    #[test]
    fn test_estimate_without_edges() {
        assert_eq!(estimate(&EdgeTiming::new(), 10, 500_000), 0.0);
    }

    #[test]
    fn test_estimate_from_tracker() {
        let tracker = EdgeTracker::new();
        tracker.on_edge(Sensor::S1, 0);
        tracker.on_edge(Sensor::S3, 10_000);
        // period 30 ms reversed
        let v = estimate(&tracker.snapshot(), 12_000, 500_000);
        assert!((v + 1_000_000.0 / 30_000.0).abs() < 1e-3);
    }

    #[test]
    fn test_estimate_stall_timeout() {
        let tracker = EdgeTracker::new();
        tracker.on_edge(Sensor::S1, 0);
        tracker.on_edge(Sensor::S2, 1_000);
        let timing = tracker.snapshot();
        assert!(estimate(&timing, 501_000, 500_000) > 0.0);
        assert_eq!(estimate(&timing, 501_001, 500_000), 0.0);
    }
}
