//! Native-tick and output-tick time keeping

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

use serde::Serialize;

/// Output tick resolution of the expanded event stream (ticks per quarter note).
pub const OUTPUT_TICKS_PER_QUARTER: u32 = 96;

/// A duration in the source format's native tick unit.
///
/// TickCounter can only be incremented.
#[derive(Copy, Clone, Default, Eq, PartialEq, PartialOrd, Ord, Debug, Serialize)]
#[serde(transparent)]
pub struct TickCounter {
    value: u32,
}

impl TickCounter {
    pub const ZERO: TickCounter = TickCounter { value: 0 };

    pub fn new(value: u32) -> TickCounter {
        Self { value }
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }
}

impl std::ops::Add for TickCounter {
    type Output = Self;

    fn add(self, b: Self) -> Self {
        TickCounter {
            value: self.value + b.value,
        }
    }
}

impl std::ops::AddAssign for TickCounter {
    fn add_assign(&mut self, b: Self) {
        self.value += b.value;
    }
}

/// Converts a native-tick time to the fixed output resolution.
pub fn to_output_ticks(native: u64, native_ppqn: u32) -> u64 {
    debug_assert!(native_ppqn > 0);

    native * u64::from(OUTPUT_TICKS_PER_QUARTER) / u64::from(native_ppqn)
}

/// Converts a raw tempo operand to beats per minute.
///
/// `tempo_factor` is format configuration (1.0 when the operand is already bpm).
pub fn bpm_from_raw(raw: u32, tempo_factor: f64) -> f64 {
    f64::from(raw) * tempo_factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_counter_add() {
        let mut t = TickCounter::new(24);
        t += TickCounter::new(48);
        assert_eq!(t, TickCounter::new(72));
        assert!(!t.is_zero());
        assert!(TickCounter::ZERO.is_zero());
    }

    #[test]
    fn output_tick_scaling() {
        // 48 PPQN native doubles, 96 PPQN native is 1:1
        assert_eq!(to_output_ticks(48, 48), 96);
        assert_eq!(to_output_ticks(96, 96), 96);
        assert_eq!(to_output_ticks(12, 24), 48);
    }
}
