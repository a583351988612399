use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Emulated ultrasonic fill sensor for one bin.
pub struct FillSensor {
    level: f64,
    rate: f64,
    rng: StdRng,
}

impl FillSensor {
    /// `rate` is the nominal fill percentage added per tick, clamped to [0, 10].
    pub fn new(rate: f64) -> Self {
        FillSensor {
            level: 0.0,
            rate: rate.clamp(0.0, 10.0),
            rng: StdRng::from_entropy(),
        }
    }

    /// Advance one tick and return the new level. A full bin stays silent
    /// (returns None) until it is emptied.
    pub fn tick(&mut self) -> Option<f64> {
        if self.level >= 100.0 {
            return None;
        }
        let noise = self.rng.gen_range(-0.2..0.2);
        self.level = (self.level + self.rate + noise).clamp(0.0, 100.0);
        Some(self.level)
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
    }
}

/// Display status derived from the current fill level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinStatus {
    NeedsEmptying,
    RecentlyEmptied,
    Normal,
}

impl BinStatus {
    pub fn for_level(level: f64, fill_threshold: f64, empty_threshold: f64) -> Self {
        if level >= fill_threshold {
            BinStatus::NeedsEmptying
        } else if level <= empty_threshold {
            BinStatus::RecentlyEmptied
        } else {
            BinStatus::Normal
        }
    }
}

impl fmt::Display for BinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BinStatus::NeedsEmptying => "⚠️ Needs Emptying",
            BinStatus::RecentlyEmptied => "✅ Recently Emptied",
            BinStatus::Normal => "🟢 Normal",
        };
        f.write_str(text)
    }
}
