/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    clock.rs

    Virtual clock helpers.

    Timer channels do not decrement a counter every input clock. Instead each
    channel keeps the time left until its next event as a fixed-point count of
    CPU clock ticks, and the bus subtracts elapsed CPU time from it. The
    ClockRatio relates the CPU clock to the timer's fixed input clock and is
    replaced whenever the emulated CPU speed changes.

*/

/// Nominal input clock of a PC-compatible timer, in MHz.
pub const PIT_MHZ: f64 = 1.193182;
pub const PIT_HZ: f64 = PIT_MHZ * 1_000_000.0;
pub const PIT_TICK_US: f64 = 1.0 / PIT_MHZ;

/// Number of fractional bits in a fixed-point virtual time value.
pub const TIMER_SHIFT: u32 = 16;
/// One CPU tick, in fixed-point virtual time.
pub const TIMER_ONE: i64 = 1 << TIMER_SHIFT;

/// CPU clock ticks per timer input clock.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClockRatio {
    cpu_hz: f64,
    ratio:  f64,
}

impl ClockRatio {
    pub fn from_cpu_mhz(mhz: f64) -> Self {
        ClockRatio::from_cpu_hz(mhz * 1_000_000.0)
    }

    pub fn from_cpu_hz(cpu_hz: f64) -> Self {
        ClockRatio::new(cpu_hz, cpu_hz / PIT_HZ)
    }

    /// Build a ClockRatio directly from a count of CPU ticks per timer input clock.
    pub fn from_ratio(ratio: f64) -> Self {
        ClockRatio::new(ratio * PIT_HZ, ratio)
    }

    /// Panics if one timer clock would round to zero virtual time, since a channel could then
    /// never make progress.
    fn new(cpu_hz: f64, ratio: f64) -> Self {
        assert!(
            ratio.is_finite() && (ratio * TIMER_ONE as f64) >= 1.0,
            "ClockRatio: invalid clock ratio {}",
            ratio
        );
        ClockRatio { cpu_hz, ratio }
    }

    #[inline]
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    #[inline]
    pub fn cpu_hz(&self) -> f64 {
        self.cpu_hz
    }

    /// Convert a number of timer input clocks to fixed-point virtual time.
    #[inline]
    pub fn counts_to_time(&self, counts: i64) -> i64 {
        ((counts << TIMER_SHIFT) as f64 * self.ratio) as i64
    }

    /// Convert fixed-point virtual time to timer input clocks, rounding up. A channel that has
    /// any fraction of a count left still shows that count.
    #[inline]
    pub fn time_to_counts(&self, time: i64) -> i64 {
        let scaled = (time as f64 / self.ratio) as i64;
        (scaled + (TIMER_ONE - 1)) >> TIMER_SHIFT
    }

    #[inline]
    pub fn ticks_to_time(ticks: u64) -> i64 {
        (ticks as i64) << TIMER_SHIFT
    }

    #[inline]
    pub fn micros_to_time(&self, us: f64) -> i64 {
        (us * (self.cpu_hz / 1_000_000.0) * TIMER_ONE as f64) as i64
    }

    /// Convert fixed-point virtual time to whole CPU ticks, rounding up.
    #[inline]
    pub fn time_to_ticks(time: i64) -> u64 {
        (time.max(0) + (TIMER_ONE - 1)) as u64 >> TIMER_SHIFT
    }

    /// Rescale a span of virtual time measured against `old` so that it represents the same
    /// number of timer clocks against this ratio. Fractional progress is preserved.
    #[inline]
    pub fn rescale(&self, time: i64, old: &ClockRatio) -> i64 {
        (time as f64 * (self.ratio / old.ratio)) as i64
    }
}

impl Default for ClockRatio {
    /// The IBM 5150/5160 runs the CPU at 4.77MHz, exactly four CPU clocks per timer clock.
    fn default() -> Self {
        ClockRatio::from_ratio(4.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_time_conversion() {
        let clock = ClockRatio::from_ratio(4.0);
        assert_eq!(clock.counts_to_time(100), 400 << TIMER_SHIFT);
        assert_eq!(clock.time_to_counts(400 << TIMER_SHIFT), 100);
        // Partial counts round up.
        assert_eq!(clock.time_to_counts((400 << TIMER_SHIFT) - 1), 100);
        assert_eq!(clock.time_to_counts((396 << TIMER_SHIFT) + 4), 100);
        assert_eq!(clock.time_to_counts(0), 0);
    }

    #[test]
    fn test_fractional_ratio_reads_back_whole_counts() {
        let clock = ClockRatio::from_cpu_mhz(4.77273);
        for counts in [1, 2, 99, 100, 0x7FFF, 0xFFFF, 0x10000] {
            assert_eq!(clock.time_to_counts(clock.counts_to_time(counts)), counts);
        }
    }

    #[test]
    fn test_rescale_preserves_counts() {
        let slow = ClockRatio::from_ratio(4.0);
        let fast = ClockRatio::from_ratio(8.0);
        let time = slow.counts_to_time(1000) + (TIMER_ONE / 2);
        let rescaled = fast.rescale(time, &slow);
        assert_eq!(rescaled, fast.counts_to_time(1000) + TIMER_ONE);
        assert_eq!(fast.time_to_counts(rescaled), slow.time_to_counts(time));
    }

    #[test]
    fn test_time_to_ticks_rounds_up() {
        assert_eq!(ClockRatio::time_to_ticks(0), 0);
        assert_eq!(ClockRatio::time_to_ticks(-5), 0);
        assert_eq!(ClockRatio::time_to_ticks(1), 1);
        assert_eq!(ClockRatio::time_to_ticks(3 << TIMER_SHIFT), 3);
    }

    #[test]
    fn test_microseconds() {
        let clock = ClockRatio::from_cpu_mhz(8.0);
        assert_eq!(clock.micros_to_time(1.0), 8 << TIMER_SHIFT);
    }

    #[test]
    #[should_panic]
    fn test_zero_ratio_rejected() {
        let _ = ClockRatio::from_ratio(0.0);
    }
}
