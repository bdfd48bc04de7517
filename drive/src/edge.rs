//! Sensor edge tracking
//!
//! Each rising edge of one of the three rotor sensors is timestamped here. The
//! update runs in interrupt context and takes a single short critical
//! section, the control loop reads a consistent copy through
//! [`EdgeTracker::snapshot`].

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Number of edge periods kept (one electrical revolution)
pub const WINDOW_LEN: usize = 6;

/// Edge interval to full-state period: one rising edge every third of the cycle
const PERIOD_SCALE: u64 = 3;

/// Rotor position sensor input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Sensor {
    S1,
    S2,
    S3,
}

impl Sensor {
    /// Sensor that fires after this one when the rotor turns forward (S1 → S2 → S3 → S1)
    pub const fn next(self) -> Self {
        match self {
            Self::S1 => Self::S2,
            Self::S2 => Self::S3,
            Self::S3 => Self::S1,
        }
    }

    /// Bit position in a sensor vector
    pub const fn index(self) -> u8 {
        match self {
            Self::S1 => 0,
            Self::S2 => 1,
            Self::S3 => 2,
        }
    }

    pub const ALL: [Sensor; 3] = [Self::S1, Self::S2, Self::S3];
}

/// Measured rotation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub const fn as_i8(self) -> i8 {
        match self {
            Self::Forward => 1,
            Self::Reverse => -1,
        }
    }

    pub const fn sign(self) -> f32 {
        match self {
            Self::Forward => 1.0,
            Self::Reverse => -1.0,
        }
    }

    /// Direction implied by two consecutive firings.
    ///
    /// Reverse when the previous sensor is the forward successor of the
    /// current one. A repeated sensor or no history counts as forward.
    pub fn infer(previous: Option<Sensor>, current: Sensor) -> Self {
        match previous {
            Some(prev) if prev == current.next() => Self::Reverse,
            _ => Self::Forward,
        }
    }
}

/// Edge timing and direction, as last written by the edge handler
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EdgeTiming {
    /// Scaled edge periods [µs], oldest first
    pub periods_us: [u32; WINDOW_LEN],
    /// Number of valid slots in `periods_us` (filled from the end)
    pub filled: u8,
    /// Most recent scaled period [µs]
    pub period_us: u32,
    pub direction: Direction,
    pub last_sensor: Option<Sensor>,
    /// Timestamp of the most recent edge [µs]
    pub last_edge_us: Option<u64>,
    /// Total edges seen (wrapping)
    pub edge_count: u32,
    /// Direction-signed edges since the last position reset
    pub position: i32,
}

impl EdgeTiming {
    pub const fn new() -> Self {
        Self {
            periods_us: [0; WINDOW_LEN],
            filled: 0,
            period_us: 0,
            direction: Direction::Forward,
            last_sensor: None,
            last_edge_us: None,
            edge_count: 0,
            position: 0,
        }
    }

    /// Record one rising edge
    pub fn record(&mut self, sensor: Sensor, now_us: u64) {
        if let Some(last) = self.last_edge_us {
            let elapsed = now_us.saturating_sub(last);
            let period = elapsed.saturating_mul(PERIOD_SCALE).min(u32::MAX as u64) as u32;

            self.periods_us.copy_within(1.., 0);
            self.periods_us[WINDOW_LEN - 1] = period;
            self.period_us = period;
            if (self.filled as usize) < WINDOW_LEN {
                self.filled += 1;
            }
        }
        self.last_edge_us = Some(now_us);

        self.direction = Direction::infer(self.last_sensor, sensor);
        self.last_sensor = Some(sensor);

        self.edge_count = self.edge_count.wrapping_add(1);
        self.position = self.position.wrapping_add(self.direction.as_i8() as i32);
    }

    /// Mean of the recorded periods [µs], `None` before the second edge
    pub fn average_period_us(&self) -> Option<f32> {
        let filled = self.filled as usize;
        if filled == 0 {
            return None;
        }
        let sum: u64 = self.periods_us[WINDOW_LEN - filled..]
            .iter()
            .map(|&p| p as u64)
            .sum();
        Some(sum as f32 / filled as f32)
    }

    /// Time since the last edge [µs]
    pub fn since_last_edge_us(&self, now_us: u64) -> Option<u64> {
        self.last_edge_us.map(|last| now_us.saturating_sub(last))
    }
}

impl Default for EdgeTiming {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared edge state, written from the sensor interrupts
pub struct EdgeTracker {
    timing: Mutex<CriticalSectionRawMutex, RefCell<EdgeTiming>>,
}

impl EdgeTracker {
    pub const fn new() -> Self {
        Self {
            timing: Mutex::new(RefCell::new(EdgeTiming::new())),
        }
    }

    /// Edge handler entry point. Bounded time, no allocation.
    #[inline]
    pub fn on_edge(&self, sensor: Sensor, now_us: u64) {
        self.timing
            .lock(|timing| timing.borrow_mut().record(sensor, now_us));
    }

    /// Consistent copy of every timing field
    pub fn snapshot(&self) -> EdgeTiming {
        self.timing.lock(|timing| *timing.borrow())
    }

    /// Restart position counting, e.g. for a new rotation target
    pub fn reset_position(&self) {
        self.timing.lock(|timing| timing.borrow_mut().position = 0);
    }

    pub fn reset(&self) {
        self.timing
            .lock(|timing| *timing.borrow_mut() = EdgeTiming::new());
    }
}

impl Default for EdgeTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(tracker: &EdgeTracker, sensors: &[Sensor], step_us: u64) -> u64 {
        let mut now = 1_000;
        for &sensor in sensors {
            tracker.on_edge(sensor, now);
            now += step_us;
        }
        now
    }

    #[test]
    fn test_forward_sequence() {
        let tracker = EdgeTracker::new();
        let mut now = 0;
        for sensor in [Sensor::S1, Sensor::S2, Sensor::S3].iter().cycle().take(12) {
            tracker.on_edge(*sensor, now);
            assert_eq!(tracker.snapshot().direction, Direction::Forward);
            now += 100;
        }
        assert_eq!(tracker.snapshot().position, 12);
    }

    #[test]
    fn test_reverse_sequence() {
        let tracker = EdgeTracker::new();
        let mut now = 0;
        for (i, sensor) in [Sensor::S1, Sensor::S3, Sensor::S2]
            .iter()
            .cycle()
            .take(12)
            .enumerate()
        {
            tracker.on_edge(*sensor, now);
            if i > 0 {
                assert_eq!(tracker.snapshot().direction, Direction::Reverse);
            }
            now += 100;
        }
        // first edge has no predecessor and counts forward
        assert_eq!(tracker.snapshot().position, 1 - 11);
    }

    #[test]
    fn test_direction_change() {
        assert_eq!(Direction::infer(None, Sensor::S2), Direction::Forward);
        assert_eq!(Direction::infer(Some(Sensor::S1), Sensor::S2), Direction::Forward);
        assert_eq!(Direction::infer(Some(Sensor::S3), Sensor::S2), Direction::Reverse);
        assert_eq!(Direction::infer(Some(Sensor::S2), Sensor::S2), Direction::Forward);
    }

    #[test]
    fn test_first_edge_records_no_period() {
        let tracker = EdgeTracker::new();
        tracker.on_edge(Sensor::S1, 5_000);
        let timing = tracker.snapshot();
        assert_eq!(timing.filled, 0);
        assert_eq!(timing.average_period_us(), None);
        assert_eq!(timing.edge_count, 1);
        assert_eq!(timing.last_edge_us, Some(5_000));
    }

    #[test]
    fn test_period_is_scaled_elapsed() {
        let tracker = EdgeTracker::new();
        tracker.on_edge(Sensor::S1, 1_000);
        tracker.on_edge(Sensor::S2, 1_250);
        let timing = tracker.snapshot();
        assert_eq!(timing.period_us, 750);
        assert_eq!(timing.periods_us[WINDOW_LEN - 1], 750);
        assert_eq!(timing.average_period_us(), Some(750.0));
    }

    #[test]
    fn test_window_shifts_oldest_out() {
        let tracker = EdgeTracker::new();
        let mut now = 0;
        tracker.on_edge(Sensor::S1, now);
        // intervals 10, 20, ... 80 µs
        for (i, sensor) in [Sensor::S2, Sensor::S3, Sensor::S1]
            .iter()
            .cycle()
            .take(8)
            .enumerate()
        {
            now += 10 * (i as u64 + 1);
            tracker.on_edge(*sensor, now);
        }
        let timing = tracker.snapshot();
        assert_eq!(timing.filled as usize, WINDOW_LEN);
        assert_eq!(timing.periods_us, [90, 120, 150, 180, 210, 240]);
        assert_eq!(timing.average_period_us(), Some(165.0));
    }

    #[test]
    fn test_partial_window_average() {
        let tracker = EdgeTracker::new();
        feed(&tracker, &[Sensor::S1, Sensor::S2, Sensor::S3], 100);
        let timing = tracker.snapshot();
        assert_eq!(timing.filled, 2);
        assert_eq!(timing.average_period_us(), Some(300.0));
    }

    #[test]
    fn test_reset_position() {
        let tracker = EdgeTracker::new();
        feed(&tracker, &[Sensor::S1, Sensor::S2, Sensor::S3], 100);
        tracker.reset_position();
        let timing = tracker.snapshot();
        assert_eq!(timing.position, 0);
        assert_eq!(timing.edge_count, 3);
    }
}
