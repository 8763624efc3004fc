use rand::Rng;

use crate::error::{Error, Result};

/// Crash point handed out by the instant-loss branch
pub const INSTANT_CRASH_POINT: f64 = 1.00;
/// Lowest crash point the fair branch can produce
pub const CRASH_POINT_FLOOR: f64 = 1.10;

pub const MIN_INSTANT_PROBABILITY: f64 = 0.15;
pub const MAX_INSTANT_PROBABILITY: f64 = 0.20;
pub const DEFAULT_INSTANT_PROBABILITY: f64 = 0.20;

/// Crash point chosen for one round
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CrashPoint {
    pub value: f64,
    /// true if this value came from the admin override slot
    pub overridden: bool,
}

/// Produces one crash multiplier per round.
///
/// Holds the house-edge parameter and the single-slot admin override. The
/// admin side only ever writes the slot through [`set_override`]; the round
/// scheduler is the only reader and clears it through [`next_crash_point`].
///
/// [`set_override`]: CrashPointGenerator::set_override
/// [`next_crash_point`]: CrashPointGenerator::next_crash_point
#[derive(Debug, Clone)]
pub struct CrashPointGenerator {
    instant_probability: f64,
    override_slot: Option<f64>,
}

impl Default for CrashPointGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_INSTANT_PROBABILITY)
    }
}

impl CrashPointGenerator {
    /// Creates a generator, clamping the instant-loss probability into the
    /// supported house-edge range
    pub fn new(instant_probability: f64) -> Self {
        let instant_probability = if instant_probability.is_finite() {
            instant_probability.clamp(MIN_INSTANT_PROBABILITY, MAX_INSTANT_PROBABILITY)
        } else {
            DEFAULT_INSTANT_PROBABILITY
        };

        CrashPointGenerator {
            instant_probability,
            override_slot: None,
        }
    }

    pub fn instant_probability(&self) -> f64 {
        self.instant_probability
    }

    /// Stores a one-shot crash point for the next launch. A later call
    /// replaces an override that has not been consumed yet.
    pub fn set_override(&mut self, value: f64) -> Result<()> {
        if !value.is_finite() || value < INSTANT_CRASH_POINT {
            return Err(Error::InvalidOverride(value));
        }
        self.override_slot = Some(value);
        Ok(())
    }

    pub fn pending_override(&self) -> Option<f64> {
        self.override_slot
    }

    /// Draws the crash point for a round that is about to launch.
    pub fn next_crash_point<R: Rng + ?Sized>(&mut self, rng: &mut R) -> CrashPoint {
        if let Some(value) = self.override_slot.take() {
            return CrashPoint {
                value,
                overridden: true,
            };
        }

        let value = if rng.gen_bool(self.instant_probability) {
            INSTANT_CRASH_POINT
        } else {
            crash_point_from_draw(rng.gen_range(0.0..1.0))
        };

        CrashPoint {
            value,
            overridden: false,
        }
    }
}

/// Maps a uniform draw in `[0, 1)` to a crash point on the fair branch.
///
/// `100 / (100r + 1)` rounded to cents, floored at 1.10. There is no upper
/// bound: r = 0 yields 100.00.
pub fn crash_point_from_draw(r: f64) -> f64 {
    let raw = 100.0 / (100.0 * r + 1.0);
    round_cents(raw).max(CRASH_POINT_FLOOR)
}

#[inline]
pub(crate) fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
