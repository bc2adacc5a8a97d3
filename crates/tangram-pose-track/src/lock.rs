//! Homography lock hysteresis.

use log::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockTransition {
    Unchanged,
    Locked,
    Unlocked,
}

/// Locks after `frames_needed` consecutive frames under `lock_threshold`,
/// unlocks on the first frame above `unlock_threshold`.
#[derive(Clone, Debug, PartialEq)]
pub struct LockHysteresis {
    frames_needed: usize,
    lock_threshold: f64,
    unlock_threshold: f64,
    streak: usize,
    locked: bool,
}

impl LockHysteresis {
    pub fn new(frames_needed: usize, lock_threshold: f64, unlock_threshold: f64) -> Self {
        Self {
            frames_needed: frames_needed.max(1),
            lock_threshold,
            unlock_threshold,
            streak: 0,
            locked: false,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn streak(&self) -> usize {
        self.streak
    }

    pub fn observe(&mut self, mean_error: f64) -> LockTransition {
        if !mean_error.is_finite() {
            return self.break_streak();
        }
        if self.locked {
            if mean_error > self.unlock_threshold {
                self.locked = false;
                self.streak = 0;
                debug!("homography unlocked, mean error {mean_error:.2}px");
                return LockTransition::Unlocked;
            }
            return LockTransition::Unchanged;
        }
        if mean_error < self.lock_threshold {
            self.streak += 1;
            if self.streak >= self.frames_needed {
                self.locked = true;
                debug!("homography locked after {} frames", self.streak);
                return LockTransition::Locked;
            }
        } else {
            self.streak = 0;
        }
        LockTransition::Unchanged
    }

    /// Failed frame: the streak restarts, a held lock is released.
    pub fn break_streak(&mut self) -> LockTransition {
        self.streak = 0;
        if self.locked {
            self.locked = false;
            return LockTransition::Unlocked;
        }
        LockTransition::Unchanged
    }

    pub fn reset(&mut self) {
        self.streak = 0;
        self.locked = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_after_streak_and_unlocks_on_spike() {
        let mut lock = LockHysteresis::new(5, 5.0, 15.0);
        for _ in 0..4 {
            assert_eq!(lock.observe(1.0), LockTransition::Unchanged);
        }
        assert_eq!(lock.observe(1.0), LockTransition::Locked);
        assert!(lock.is_locked());
        // between thresholds keeps the lock
        assert_eq!(lock.observe(10.0), LockTransition::Unchanged);
        assert!(lock.is_locked());
        assert_eq!(lock.observe(20.0), LockTransition::Unlocked);
        assert!(!lock.is_locked());
    }

    #[test]
    fn bad_frame_restarts_streak() {
        let mut lock = LockHysteresis::new(3, 5.0, 15.0);
        lock.observe(1.0);
        lock.observe(1.0);
        lock.observe(6.0);
        assert_eq!(lock.streak(), 0);
        lock.observe(1.0);
        lock.observe(1.0);
        assert!(!lock.is_locked());
        assert_eq!(lock.observe(1.0), LockTransition::Locked);
    }

    #[test]
    fn non_finite_error_releases_lock() {
        let mut lock = LockHysteresis::new(1, 5.0, 15.0);
        assert_eq!(lock.observe(0.5), LockTransition::Locked);
        assert_eq!(lock.observe(f64::NAN), LockTransition::Unlocked);
    }
}
