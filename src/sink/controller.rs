//! Occupancy feedback controller for the resample ratio.
//!
//! Capture and playback run on independent clocks.  Each enqueue measures
//! how far the ring is from its target occupancy, averages that error over
//! the last `history_len` updates and turns it into a resample ratio:
//!
//! ```text
//! error   = clamp(target - occupancy, -target, +target)
//! average = mean(history[0..history_len])
//! ratio   = gain * average + 1.0
//! ```
//!
//! A ring running low yields a ratio above 1.0 (produce more output), a
//! ring running high yields a ratio below 1.0.  The clamp bounds the ratio
//! excursion to `gain * target`.
//!
//! # Example
//!
//! ```rust
//! use spdif_router::sink::RateController;
//!
//! let mut ctl = RateController::new(128, 4e-6, 4);
//! for _ in 0..4 {
//!     ctl.update(128);
//! }
//! assert_eq!(ctl.ratio(), 1.0);
//!
//! ctl.update(0);
//! assert!(ctl.ratio() > 1.0);
//! ```

// ---------------------------------------------------------------------------
// RateController
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RateController {
    target: i64,
    gain: f64,
    history: Vec<i64>,
    next: usize,
    sum: i64,
    average: f64,
    ratio: f64,
}

impl RateController {
    /// # Panics
    ///
    /// Panics if `history_len == 0`.
    pub fn new(target: usize, gain: f64, history_len: usize) -> Self {
        assert!(history_len > 0, "controller history must not be empty");
        Self {
            target: target as i64,
            gain,
            history: vec![0; history_len],
            next: 0,
            sum: 0,
            average: 0.0,
            ratio: 1.0,
        }
    }

    /// Clamped setpoint error for an occupancy reading.
    pub fn error_for(&self, occupancy: usize) -> i64 {
        (self.target - occupancy as i64).clamp(-self.target, self.target)
    }

    /// Record one occupancy reading and return the ratio for the next
    /// resample call.
    pub fn update(&mut self, occupancy: usize) -> f64 {
        let error = self.error_for(occupancy);

        self.sum += error - self.history[self.next];
        self.history[self.next] = error;
        self.next = (self.next + 1) % self.history.len();

        self.average = self.sum as f64 / self.history.len() as f64;
        self.ratio = self.gain * self.average + 1.0;
        self.ratio
    }

    /// Ratio computed by the most recent [`update`](Self::update).
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Smoothed error behind the current ratio.
    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const T: usize = 128;
    const G: f64 = 4e-6;
    const H: usize = 8;

    fn settle(ctl: &mut RateController, occupancy: usize) -> f64 {
        let mut ratio = 0.0;
        for _ in 0..ctl.history_len() {
            ratio = ctl.update(occupancy);
        }
        ratio
    }

    #[test]
    fn starts_at_unity() {
        let ctl = RateController::new(T, G, H);
        assert_eq!(ctl.ratio(), 1.0);
        assert_eq!(ctl.average(), 0.0);
    }

    #[test]
    fn occupancy_at_target_gives_exact_unity() {
        let mut ctl = RateController::new(T, G, H);
        settle(&mut ctl, T - 40);
        assert_eq!(settle(&mut ctl, T), 1.0);
        assert_eq!(ctl.average(), 0.0);
    }

    #[test]
    fn deficit_raises_ratio_monotonically() {
        let mut small = RateController::new(T, G, H);
        let mut large = RateController::new(T, G, H);

        let r_small = settle(&mut small, T - 10);
        let r_large = settle(&mut large, T - 50);

        assert!(r_small > 1.0);
        assert!(r_large > r_small);
        assert!((r_large - (1.0 + G * 50.0)).abs() < 1e-12);
    }

    #[test]
    fn surplus_lowers_ratio() {
        let mut ctl = RateController::new(T, G, H);
        assert!(settle(&mut ctl, T + 64) < 1.0);
    }

    #[test]
    fn error_is_clamped_to_target() {
        let ctl = RateController::new(T, G, H);
        assert_eq!(ctl.error_for(0), T as i64);
        assert_eq!(ctl.error_for(T * 2), -(T as i64));
        assert_eq!(ctl.error_for(T * 10), -(T as i64));

        let mut a = RateController::new(T, G, H);
        let mut b = RateController::new(T, G, H);
        assert_eq!(settle(&mut a, T * 2), settle(&mut b, T * 10));
        assert!((a.ratio() - (1.0 - G * T as f64)).abs() < 1e-12);
    }

    #[test]
    fn average_ramps_over_history() {
        let mut ctl = RateController::new(T, G, 4);
        ctl.update(T - 40);
        assert_eq!(ctl.average(), 10.0);
        ctl.update(T - 40);
        assert_eq!(ctl.average(), 20.0);
        ctl.update(T - 40);
        ctl.update(T - 40);
        assert_eq!(ctl.average(), 40.0);
        // Oldest entry overwritten.
        ctl.update(T);
        assert_eq!(ctl.average(), 30.0);
    }

    #[test]
    #[should_panic(expected = "controller history must not be empty")]
    fn zero_history_panics() {
        let _ = RateController::new(T, G, 0);
    }
}
