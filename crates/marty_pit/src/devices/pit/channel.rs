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

    devices::pit::channel.rs

    A single counter channel of the 8253/8254.

    Rather than decrementing a counting element every input clock, a channel
    keeps the virtual time remaining until its next event (terminal count,
    or a half period in square wave mode). The chip subtracts elapsed time
    and calls rollover() when the remaining time runs out. Reads convert the
    remaining time back into a count.

*/

use std::fmt;

use strum_macros::Display;

use crate::{
    clock::ClockRatio,
    devices::pit::sink::{OutputSink, OutputSinkDispatch},
};

/// Divisor loaded into every channel at power-on.
pub const DEFAULT_DIVISOR: u16 = 0xFFFF;
/// Time added while a channel has nothing to count toward, in input clocks.
pub const IDLE_COUNT: i64 = 0xFFFF;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum ChannelMode {
    InterruptOnTerminalCount,
    HardwareRetriggerableOneShot,
    RateGenerator,
    SquareWaveGenerator,
    SoftwareTriggeredStrobe,
    HardwareTriggeredStrobe,
}

// We implement From<u8> for this enum ourselves rather than deriving BitfieldSpecifier
// as there is more than one bit mapping per Enum variant (6 and 7 map to modes 2 & 3 again)
impl From<u8> for ChannelMode {
    fn from(orig: u8) -> Self {
        match orig & 0x07 {
            0x0 => ChannelMode::InterruptOnTerminalCount,
            0x1 => ChannelMode::HardwareRetriggerableOneShot,
            0x2 | 0x6 => ChannelMode::RateGenerator,
            0x3 | 0x7 => ChannelMode::SquareWaveGenerator,
            0x4 => ChannelMode::SoftwareTriggeredStrobe,
            _ => ChannelMode::HardwareTriggeredStrobe,
        }
    }
}

impl ChannelMode {
    /// The canonical 3-bit encoding of this mode.
    pub fn bits(&self) -> u8 {
        match self {
            ChannelMode::InterruptOnTerminalCount => 0,
            ChannelMode::HardwareRetriggerableOneShot => 1,
            ChannelMode::RateGenerator => 2,
            ChannelMode::SquareWaveGenerator => 3,
            ChannelMode::SoftwareTriggeredStrobe => 4,
            ChannelMode::HardwareTriggeredStrobe => 5,
        }
    }
}

/// Access format of the data port. Selected by a control word only.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum RwMode {
    Lsb,
    Msb,
    LsbMsb,
}

impl RwMode {
    pub fn bits(&self) -> u8 {
        match self {
            RwMode::Lsb => 0b01,
            RwMode::Msb => 0b10,
            RwMode::LsbMsb => 0b11,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LoadState {
    WaitingForLsb,
    WaitingForMsb,
}

/// Where the next data port read takes its value from.
///
/// A snapshot, once taken, is held until every byte of it has been read. Counting continues
/// underneath and does not disturb it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReadState {
    /// Reads sample the current count.
    Live,
    /// The low byte of a live sample has been read; its high byte is held for the next read.
    SampledAwaitingMsb(u32),
    /// A snapshot is held and its low byte has not been read.
    LatchedAwaitingLsb(u32),
    /// A snapshot is held and only its high byte remains to be read.
    LatchedAwaitingMsb(u32),
}

impl fmt::Display for ReadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadState::Live => write!(f, "Live"),
            ReadState::SampledAwaitingMsb(v) => write!(f, "Sampled MSB [{:04X}]", v),
            ReadState::LatchedAwaitingLsb(v) => write!(f, "Latched LSB [{:04X}]", v),
            ReadState::LatchedAwaitingMsb(v) => write!(f, "Latched MSB [{:04X}]", v),
        }
    }
}

pub struct Channel {
    c: usize,
    mode: ChannelMode,
    rw_mode: RwMode,
    bcd: bool,
    divisor: u16,
    /// Virtual time to the next event, while on the virtual clock.
    remaining: i64,
    /// Input clocks to the next event, while externally clocked.
    count: i64,
    clock: ClockRatio,
    output: bool,
    gate: bool,
    counting_enabled: bool,
    using_virtual_clock: bool,
    disabled: bool,
    awaiting_initial_load: bool,
    terminal_hit: bool,
    pending_new_count: bool,
    null_count: bool,
    load_state: LoadState,
    read_state: ReadState,
    status_latch: Option<u8>,
    sink: OutputSinkDispatch,
}

impl Channel {
    pub fn new(c: usize, clock: ClockRatio) -> Self {
        let mut channel = Channel {
            c,
            mode: ChannelMode::InterruptOnTerminalCount,
            rw_mode: RwMode::LsbMsb,
            bcd: false,
            divisor: DEFAULT_DIVISOR,
            remaining: 0,
            count: 0,
            clock,
            output: false,
            gate: false,
            counting_enabled: false,
            using_virtual_clock: true,
            disabled: false,
            awaiting_initial_load: false,
            terminal_hit: true,
            pending_new_count: false,
            null_count: false,
            load_state: LoadState::WaitingForLsb,
            read_state: ReadState::Live,
            status_latch: None,
            sink: OutputSinkDispatch::default(),
        };
        channel.reset();
        channel
    }

    /// Return the channel to its power-on state. The attached sink and the clock source are
    /// kept; they are wiring, not state.
    pub fn reset(&mut self) {
        self.mode = ChannelMode::InterruptOnTerminalCount;
        self.rw_mode = RwMode::LsbMsb;
        self.bcd = false;
        self.divisor = DEFAULT_DIVISOR;
        self.set_time(DEFAULT_DIVISOR as i64);
        // Channel 2 gate is driven from port B and powers up low. The others are tied high.
        self.gate = self.c != 2;
        self.counting_enabled = false;
        self.disabled = false;
        self.awaiting_initial_load = false;
        self.terminal_hit = true;
        self.pending_new_count = false;
        self.null_count = false;
        self.load_state = LoadState::WaitingForLsb;
        self.read_state = ReadState::Live;
        self.status_latch = None;
        self.set_output(false);
    }

    pub fn set_sink(&mut self, sink: OutputSinkDispatch) {
        self.sink = sink;
    }

    /// The full count of the loaded divisor. A divisor of 0 counts 65536 clocks.
    #[inline]
    pub fn full_count(&self) -> i64 {
        match self.divisor {
            0 => 0x10000,
            d => d as i64,
        }
    }

    /// Square wave high phase. Odd divisors give the extra count to the low phase.
    #[inline]
    fn high_phase(&self) -> i64 {
        self.full_count() >> 1
    }

    #[inline]
    fn low_phase(&self) -> i64 {
        (self.full_count() + 1) >> 1
    }

    /// Whether the virtual clock advances this channel.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.counting_enabled && self.using_virtual_clock && !self.disabled
    }

    /// Set the output level. All output changes go through here so that the sink sees each
    /// transition exactly once.
    fn set_output(&mut self, level: bool) {
        if self.output != level {
            self.output = level;
            self.sink.on_level_changed(level);
        }
    }

    fn set_time(&mut self, counts: i64) {
        if self.using_virtual_clock {
            self.remaining = self.clock.counts_to_time(counts);
        }
        else {
            self.count = counts;
        }
    }

    fn add_time(&mut self, counts: i64) {
        if self.using_virtual_clock {
            self.remaining += self.clock.counts_to_time(counts);
        }
        else {
            self.count += counts;
        }
    }

    /// Handle a channel-select control word. Stops the channel until a complete count is
    /// written.
    pub fn set_mode(&mut self, mode: ChannelMode, rw_mode: RwMode, bcd: bool) {
        log::trace!(
            "PIT: Channel {} selected, channel_mode {:?}, rw mode {:?}, bcd: {:?}",
            self.c,
            mode,
            rw_mode,
            bcd
        );

        self.mode = mode;
        self.rw_mode = rw_mode;
        self.bcd = bcd;
        self.load_state = LoadState::WaitingForLsb;
        self.read_state = ReadState::Live;
        self.status_latch = None;
        self.awaiting_initial_load = true;
        self.terminal_hit = false;
        self.pending_new_count = false;
        self.null_count = true;
        self.set_output(mode != ChannelMode::InterruptOnTerminalCount);
        self.disabled = true;
    }

    /// Latch the current count. Counting continues; reads return the snapshot until it has
    /// been read out in full. A latch that has not been read yet is kept and further latch
    /// commands are ignored.
    pub fn latch_count(&mut self) {
        if let ReadState::LatchedAwaitingLsb(_) | ReadState::LatchedAwaitingMsb(_) = self.read_state {
            log::trace!("PIT: Channel {} count already latched", self.c);
            return;
        }
        let value = self.current_count();
        self.read_state = match self.rw_mode {
            RwMode::Msb => ReadState::LatchedAwaitingMsb(value),
            _ => ReadState::LatchedAwaitingLsb(value),
        };
    }

    /// Latch a status byte for the next read. An unread status latch is kept.
    pub fn latch_status(&mut self) {
        if self.status_latch.is_none() {
            self.status_latch = Some(self.status_byte());
        }
    }

    pub fn status_byte(&self) -> u8 {
        (self.output as u8) << 7
            | (self.null_count as u8) << 6
            | self.rw_mode.bits() << 4
            | self.mode.bits() << 1
            | self.bcd as u8
    }

    /// The count as software would read it.
    ///
    /// Rate generator reads are one higher than the internal count, since we count to the
    /// pulse rather than to the reload. Square wave mode counts half periods internally, and
    /// real hardware decrements by two, so reads are doubled.
    pub fn current_count(&self) -> u32 {
        let mut read = match self.using_virtual_clock {
            true => self.clock.time_to_counts(self.remaining),
            false => self.count,
        };
        match self.mode {
            ChannelMode::RateGenerator => {
                read += 1;
                // The clock just after a reload, when the counter is at 1 with output low.
                if !self.null_count && read > self.full_count() {
                    read -= self.full_count();
                }
            }
            ChannelMode::SquareWaveGenerator => read <<= 1,
            _ => {}
        }
        read.clamp(0, 0x10000) as u32
    }

    pub fn read_byte(&mut self) -> u8 {
        if let Some(status) = self.status_latch.take() {
            return status;
        }

        match self.read_state {
            ReadState::Live => {
                let value = self.current_count();
                match self.rw_mode {
                    RwMode::Lsb => lsb(value),
                    RwMode::Msb => msb(value),
                    RwMode::LsbMsb => {
                        // Hold the rest of the sample for the MSB read.
                        self.read_state = ReadState::SampledAwaitingMsb(value);
                        lsb(value)
                    }
                }
            }
            ReadState::LatchedAwaitingLsb(value) => {
                self.read_state = match self.rw_mode {
                    RwMode::LsbMsb => ReadState::LatchedAwaitingMsb(value),
                    _ => ReadState::Live,
                };
                lsb(value)
            }
            ReadState::SampledAwaitingMsb(value) | ReadState::LatchedAwaitingMsb(value) => {
                self.read_state = ReadState::Live;
                msb(value)
            }
        }
    }

    pub fn write_byte(&mut self, byte: u8) {
        match self.rw_mode {
            RwMode::Lsb => {
                self.divisor = byte as u16;
                self.load();
            }
            RwMode::Msb => {
                self.divisor = (byte as u16) << 8;
                self.load();
            }
            RwMode::LsbMsb => match self.load_state {
                LoadState::WaitingForLsb => {
                    self.divisor = (self.divisor & 0xFF00) | byte as u16;
                    self.null_count = true;
                    if self.mode == ChannelMode::InterruptOnTerminalCount {
                        // Beginning a load will stop the timer in InterruptOnTerminalCount mode
                        // and set output immediately to low.
                        self.counting_enabled = false;
                        self.set_output(false);
                    }
                    self.load_state = LoadState::WaitingForMsb;
                }
                LoadState::WaitingForMsb => {
                    self.divisor = (self.divisor & 0x00FF) | ((byte as u16) << 8);
                    self.load_state = LoadState::WaitingForLsb;
                    self.load();
                }
            },
        }
    }

    /// A complete count has been written.
    fn load(&mut self) {
        let initial = self.awaiting_initial_load;
        let l = self.full_count();

        self.null_count = true;
        self.pending_new_count = false;
        self.disabled = false;

        match self.mode {
            ChannelMode::InterruptOnTerminalCount => {
                self.set_time(l);
                self.set_output(false);
                self.terminal_hit = false;
                self.null_count = false;
                self.counting_enabled = self.gate;
            }
            ChannelMode::HardwareRetriggerableOneShot | ChannelMode::HardwareTriggeredStrobe => {
                // Count is transferred on the next gate trigger. Until then nothing is armed.
                if initial {
                    self.terminal_hit = true;
                }
                self.counting_enabled = true;
            }
            ChannelMode::RateGenerator => {
                // A new count written to a running rate generator takes effect at the next reload.
                if initial {
                    self.set_time(l - 1);
                    self.set_output(true);
                    self.terminal_hit = false;
                    self.null_count = false;
                }
                self.counting_enabled = self.gate;
            }
            ChannelMode::SquareWaveGenerator => {
                if initial {
                    let high = self.high_phase();
                    self.set_time(high);
                    self.set_output(true);
                    self.terminal_hit = false;
                    self.null_count = false;
                }
                self.counting_enabled = self.gate;
            }
            ChannelMode::SoftwareTriggeredStrobe => {
                if !self.terminal_hit && !initial {
                    self.pending_new_count = true;
                }
                else {
                    self.set_time(l);
                    self.set_output(false);
                    self.terminal_hit = false;
                    self.null_count = false;
                }
                self.counting_enabled = self.gate;
            }
        }

        self.awaiting_initial_load = false;
    }

    pub fn set_gate(&mut self, new_state: bool) {
        if self.disabled {
            // Half-configured channel. Just track the input.
            self.gate = new_state;
            return;
        }

        let rising = new_state && !self.gate;
        let falling = !new_state && self.gate;
        let l = self.full_count();

        match self.mode {
            ChannelMode::InterruptOnTerminalCount | ChannelMode::SoftwareTriggeredStrobe => {
                // Gate controls counting.
                self.counting_enabled = new_state;
            }
            ChannelMode::HardwareRetriggerableOneShot | ChannelMode::HardwareTriggeredStrobe => {
                if rising {
                    self.set_time(l);
                    self.set_output(false);
                    self.terminal_hit = false;
                    self.null_count = false;
                    self.counting_enabled = true;
                }
            }
            ChannelMode::RateGenerator => {
                if rising {
                    self.set_time(l - 1);
                    self.set_output(true);
                    self.terminal_hit = false;
                    self.null_count = false;
                }
                else if falling {
                    // Falling gate stops count. Output goes high.
                    self.set_output(true);
                }
                self.counting_enabled = new_state;
            }
            ChannelMode::SquareWaveGenerator => {
                if rising {
                    let high = self.high_phase();
                    self.set_time(high);
                    self.set_output(true);
                    self.terminal_hit = false;
                    self.null_count = false;
                }
                else if falling {
                    self.set_output(true);
                }
                self.counting_enabled = new_state;
            }
        }

        self.gate = new_state;
    }

    /// The remaining time has run out.
    pub fn rollover(&mut self) {
        let l = self.full_count();

        if self.disabled
            || (!self.counting_enabled
                && matches!(
                    self.mode,
                    ChannelMode::RateGenerator | ChannelMode::SquareWaveGenerator
                ))
        {
            // Nothing to count toward. Push the deadline out so the scheduler stays quiet.
            self.add_time(IDLE_COUNT);
            return;
        }

        match self.mode {
            ChannelMode::InterruptOnTerminalCount | ChannelMode::HardwareRetriggerableOneShot => {
                // Terminal count. Output goes high and stays high; the counter wraps and keeps
                // counting.
                if !self.terminal_hit {
                    self.set_output(true);
                }
                self.terminal_hit = true;
                self.add_time(IDLE_COUNT);
            }
            ChannelMode::RateGenerator => {
                // Output pulses low at the reload.
                self.add_time(l);
                self.set_output(false);
                self.set_output(true);
                self.null_count = false;
            }
            ChannelMode::SquareWaveGenerator => {
                if self.output {
                    self.set_output(false);
                    let low = self.low_phase();
                    self.add_time(low);
                }
                else {
                    self.set_output(true);
                    let high = self.high_phase();
                    self.add_time(high);
                }
                self.null_count = false;
            }
            ChannelMode::SoftwareTriggeredStrobe => {
                if !self.terminal_hit {
                    self.set_output(false);
                    self.set_output(true);
                }
                if self.pending_new_count {
                    self.pending_new_count = false;
                    self.null_count = false;
                    self.add_time(l);
                }
                else {
                    self.terminal_hit = true;
                    self.add_time(IDLE_COUNT);
                }
            }
            ChannelMode::HardwareTriggeredStrobe => {
                if !self.terminal_hit {
                    self.set_output(false);
                    self.set_output(true);
                }
                self.terminal_hit = true;
                self.add_time(IDLE_COUNT);
            }
        }
    }

    /// Virtual time left until the next event, if the channel is running.
    #[inline]
    pub fn time_until_event(&self) -> Option<i64> {
        match self.is_running() {
            true => Some(self.remaining.max(0)),
            false => None,
        }
    }

    /// Subtract elapsed virtual time without processing any event.
    #[inline]
    pub fn consume(&mut self, time: i64) {
        if self.is_running() {
            self.remaining -= time;
        }
    }

    /// Run every event that is due.
    pub fn expire_due(&mut self) {
        while self.is_running() && self.remaining <= 0 {
            self.rollover();
        }
    }

    /// Advance by one input clock. Only applies to a channel that is not using the virtual
    /// clock. The counter keeps wrapping after terminal count, as it does on the virtual clock.
    pub fn clock(&mut self) {
        if self.using_virtual_clock || !self.counting_enabled || self.disabled {
            return;
        }
        self.count -= 1;
        while self.count <= 0 {
            self.rollover();
        }
    }

    /// Move the channel on or off the virtual clock, converting the time remaining.
    pub fn set_using_virtual_clock(&mut self, state: bool) {
        if self.using_virtual_clock && !state {
            self.count = self.clock.time_to_counts(self.remaining);
        }
        else if !self.using_virtual_clock && state {
            self.remaining = self.clock.counts_to_time(self.count);
        }
        self.using_virtual_clock = state;
    }

    pub fn set_clock_ratio(&mut self, clock: ClockRatio) {
        if self.using_virtual_clock {
            self.remaining = clock.rescale(self.remaining, &self.clock);
        }
        self.clock = clock;
    }

    #[inline]
    pub fn output(&self) -> bool {
        self.output
    }

    #[inline]
    pub fn gate(&self) -> bool {
        self.gate
    }

    #[inline]
    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    #[inline]
    pub fn rw_mode(&self) -> RwMode {
        self.rw_mode
    }

    #[inline]
    pub fn divisor(&self) -> u16 {
        self.divisor
    }

    #[inline]
    pub fn read_state(&self) -> ReadState {
        self.read_state
    }

    #[inline]
    pub fn is_counting(&self) -> bool {
        self.counting_enabled && !self.disabled
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    #[inline]
    pub fn using_virtual_clock(&self) -> bool {
        self.using_virtual_clock
    }

    #[inline]
    pub fn terminal_hit(&self) -> bool {
        self.terminal_hit
    }

    #[inline]
    pub fn null_count(&self) -> bool {
        self.null_count
    }
}

#[inline]
fn lsb(value: u32) -> u8 {
    (value & 0xFF) as u8
}

#[inline]
fn msb(value: u32) -> u8 {
    ((value >> 8) & 0xFF) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::TIMER_SHIFT, devices::pit::sink::CallbackSink};
    use std::{cell::RefCell, rc::Rc};

    fn test_channel(c: usize) -> (Channel, Rc<RefCell<Vec<bool>>>) {
        let mut channel = Channel::new(c, ClockRatio::from_ratio(1.0));
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = log.clone();
        channel.set_sink(CallbackSink::new(move |level| log_clone.borrow_mut().push(level)).into());
        (channel, log)
    }

    fn program(channel: &mut Channel, mode: ChannelMode, divisor: u16) {
        channel.set_mode(mode, RwMode::LsbMsb, false);
        channel.write_byte(lsb(divisor as u32));
        channel.write_byte(msb(divisor as u32));
    }

    fn advance(channel: &mut Channel, counts: i64) {
        channel.consume(counts << TIMER_SHIFT);
        channel.expire_due();
    }

    fn read16(channel: &mut Channel) -> u32 {
        let lo = channel.read_byte() as u32;
        let hi = channel.read_byte() as u32;
        hi << 8 | lo
    }

    #[test]
    fn test_mode_aliases() {
        assert_eq!(ChannelMode::from(6), ChannelMode::RateGenerator);
        assert_eq!(ChannelMode::from(7), ChannelMode::SquareWaveGenerator);
        assert_eq!(ChannelMode::from(0x0E), ChannelMode::RateGenerator);
        assert_eq!(ChannelMode::from(6).bits(), 2);
        assert_eq!(ChannelMode::from(7).bits(), 3);
    }

    #[test]
    fn test_square_wave_read_rounds_to_even() {
        let (mut channel, _) = test_channel(0);
        program(&mut channel, ChannelMode::SquareWaveGenerator, 1001);
        assert_eq!(read16(&mut channel), 1000);
        program(&mut channel, ChannelMode::SquareWaveGenerator, 1000);
        assert_eq!(read16(&mut channel), 1000);
    }

    #[test]
    fn test_rate_generator_reads_divisor() {
        let (mut channel, _) = test_channel(0);
        program(&mut channel, ChannelMode::RateGenerator, 500);
        assert_eq!(read16(&mut channel), 500);
        advance(&mut channel, 100);
        assert_eq!(read16(&mut channel), 400);
    }

    #[test]
    fn test_divisor_zero_counts_65536() {
        let (mut channel, log) = test_channel(0);
        program(&mut channel, ChannelMode::InterruptOnTerminalCount, 0);
        assert_eq!(channel.full_count(), 0x10000);
        assert_eq!(channel.current_count(), 0x10000);
        // 0x10000 reads back as 0 in 16 bits.
        assert_eq!(read16(&mut channel), 0);

        advance(&mut channel, 0xFFFF);
        assert!(!channel.output());
        advance(&mut channel, 1);
        assert!(channel.output());
        assert_eq!(*log.borrow(), vec![true]);
    }

    #[test]
    fn test_latch_survives_counting() {
        let (mut channel, _) = test_channel(0);
        program(&mut channel, ChannelMode::InterruptOnTerminalCount, 1000);
        advance(&mut channel, 10);
        channel.latch_count();
        assert_eq!(channel.read_state(), ReadState::LatchedAwaitingLsb(990));
        advance(&mut channel, 300);
        assert_eq!(channel.read_byte(), lsb(990));
        advance(&mut channel, 300);
        assert_eq!(channel.read_byte(), msb(990));
        assert_eq!(channel.read_state(), ReadState::Live);
        assert_eq!(read16(&mut channel), 390);
    }

    #[test]
    fn test_unread_latch_is_kept() {
        let (mut channel, _) = test_channel(0);
        program(&mut channel, ChannelMode::InterruptOnTerminalCount, 1000);
        advance(&mut channel, 100);
        channel.latch_count();
        channel.latch_status();
        advance(&mut channel, 200);

        // Neither latch has been read. Both commands are ignored.
        channel.latch_count();
        channel.latch_status();
        assert_eq!(channel.read_state(), ReadState::LatchedAwaitingLsb(900));

        assert_eq!(channel.read_byte(), 0b0011_0000);
        assert_eq!(read16(&mut channel), 900);

        // Fully read. A new latch takes effect.
        channel.latch_count();
        advance(&mut channel, 50);
        assert_eq!(read16(&mut channel), 700);

        // A control word drops an unread status byte.
        channel.latch_status();
        channel.set_mode(ChannelMode::RateGenerator, RwMode::LsbMsb, false);
        channel.latch_status();
        assert_eq!(channel.read_byte(), channel.status_byte());
        assert_eq!(channel.status_byte() & 0x0E, 0b0000_0100);
    }

    #[test]
    fn test_latch_after_partial_live_read() {
        let (mut channel, _) = test_channel(0);
        program(&mut channel, ChannelMode::InterruptOnTerminalCount, 0x0300);
        assert_eq!(channel.read_byte(), 0x00);
        assert_eq!(channel.read_state(), ReadState::SampledAwaitingMsb(0x0300));

        advance(&mut channel, 0x100);
        // A live sample is not a latch; the command is accepted.
        channel.latch_count();
        assert_eq!(channel.read_state(), ReadState::LatchedAwaitingLsb(0x0200));
        assert_eq!(read16(&mut channel), 0x0200);
    }

    #[test]
    fn test_live_read_snapshots_on_lsb() {
        let (mut channel, _) = test_channel(0);
        program(&mut channel, ChannelMode::InterruptOnTerminalCount, 0x0200);
        advance(&mut channel, 1);
        // Sample is 0x01FF.
        assert_eq!(channel.read_byte(), 0xFF);
        advance(&mut channel, 0x100);
        // Live count is now 0x00FF, but the MSB comes from the sample.
        assert_eq!(channel.read_byte(), 0x01);
        assert_eq!(read16(&mut channel), 0x00FF);
    }

    #[test]
    fn test_msb_only_latch() {
        let (mut channel, _) = test_channel(0);
        channel.set_mode(ChannelMode::InterruptOnTerminalCount, RwMode::Msb, false);
        channel.write_byte(0x12);
        assert_eq!(channel.divisor(), 0x1200);
        channel.latch_count();
        advance(&mut channel, 0x300);
        assert_eq!(channel.read_byte(), 0x12);
        assert_eq!(channel.read_byte(), 0x0F);
    }

    #[test]
    fn test_status_byte() {
        let (mut channel, _) = test_channel(0);
        channel.set_mode(ChannelMode::SquareWaveGenerator, RwMode::LsbMsb, false);
        // Output high, null count set.
        assert_eq!(channel.status_byte(), 0b1111_0110);
        channel.write_byte(0x00);
        channel.write_byte(0x10);
        assert_eq!(channel.status_byte(), 0b1011_0110);

        channel.latch_status();
        channel.latch_count();
        assert_eq!(channel.read_byte(), 0b1011_0110);
        assert_eq!(read16(&mut channel), 0x1000);
    }

    #[test]
    fn test_partial_write_stops_mode0() {
        let (mut channel, log) = test_channel(0);
        program(&mut channel, ChannelMode::InterruptOnTerminalCount, 10);
        advance(&mut channel, 10);
        assert!(channel.output());

        channel.write_byte(20);
        assert!(!channel.output());
        assert!(!channel.is_counting());
        advance(&mut channel, 100);
        assert!(!channel.output());

        channel.write_byte(0);
        advance(&mut channel, 20);
        assert!(channel.output());
        assert_eq!(*log.borrow(), vec![true, false, true]);
    }

    #[test]
    fn test_software_strobe_pending_count() {
        let (mut channel, log) = test_channel(0);
        program(&mut channel, ChannelMode::SoftwareTriggeredStrobe, 10);
        assert!(!channel.output());
        log.borrow_mut().clear();

        advance(&mut channel, 5);
        // Rewrite mid-count. The new count waits for the current one to expire.
        channel.write_byte(20);
        channel.write_byte(0);
        assert!(channel.null_count());
        advance(&mut channel, 5);
        assert_eq!(*log.borrow(), vec![true]);
        assert!(!channel.null_count());

        advance(&mut channel, 19);
        assert_eq!(log.borrow().len(), 1);
        advance(&mut channel, 1);
        assert_eq!(*log.borrow(), vec![true, false, true]);

        // Terminal count reached with nothing pending: silent from here on.
        advance(&mut channel, 0x30000);
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn test_one_shot_waits_for_trigger() {
        let (mut channel, log) = test_channel(2);
        program(&mut channel, ChannelMode::HardwareRetriggerableOneShot, 50);
        assert!(channel.output());
        advance(&mut channel, 0x20000);
        assert!(channel.output());
        assert!(channel.null_count());

        channel.set_gate(true);
        assert!(!channel.output());
        assert!(!channel.null_count());
        advance(&mut channel, 49);
        assert!(!channel.output());
        advance(&mut channel, 1);
        assert!(channel.output());
        assert_eq!(*log.borrow(), vec![true, false, true]);
    }

    #[test]
    fn test_disabled_rollover_is_silent() {
        let (mut channel, log) = test_channel(0);
        channel.set_mode(ChannelMode::RateGenerator, RwMode::LsbMsb, false);
        log.borrow_mut().clear();
        assert!(channel.is_disabled());
        assert_eq!(channel.time_until_event(), None);

        let before = channel.remaining;
        channel.rollover();
        assert_eq!(channel.remaining, before + (IDLE_COUNT << TIMER_SHIFT));
        assert!(log.borrow().is_empty());

        // Gate edges are tracked but trigger nothing.
        channel.set_gate(false);
        channel.set_gate(true);
        assert!(log.borrow().is_empty());
        assert!(channel.gate());
    }

    #[test]
    fn test_external_clock() {
        let (mut channel, log) = test_channel(0);
        channel.set_using_virtual_clock(false);
        program(&mut channel, ChannelMode::RateGenerator, 3);
        log.borrow_mut().clear();
        assert_eq!(channel.time_until_event(), None);
        assert_eq!(channel.current_count(), 3);

        channel.clock();
        assert!(log.borrow().is_empty());
        assert_eq!(channel.current_count(), 2);
        channel.clock();
        assert_eq!(*log.borrow(), vec![false, true]);
        assert_eq!(channel.current_count(), 1);
        channel.clock();
        assert_eq!(channel.current_count(), 3);

        // Back on the virtual clock with the count intact.
        channel.set_using_virtual_clock(true);
        assert_eq!(channel.current_count(), 3);
        advance(&mut channel, 1);
        assert_eq!(log.borrow().len(), 2);
        advance(&mut channel, 1);
        assert_eq!(log.borrow().len(), 4);
    }

    #[test]
    fn test_external_clock_counts_past_terminal() {
        let (mut external, log) = test_channel(0);
        external.set_using_virtual_clock(false);
        program(&mut external, ChannelMode::InterruptOnTerminalCount, 3);

        let (mut virtual_clock, _) = test_channel(0);
        program(&mut virtual_clock, ChannelMode::InterruptOnTerminalCount, 3);

        for _ in 0..3 {
            external.clock();
        }
        assert!(external.output());
        assert!(external.terminal_hit());

        // The counter wraps and keeps counting without further output changes.
        for _ in 0..7 {
            external.clock();
        }
        advance(&mut virtual_clock, 10);
        assert_eq!(external.current_count(), 0xFFFF - 7);
        assert_eq!(external.current_count(), virtual_clock.current_count());
        assert_eq!(*log.borrow(), vec![true]);
    }

    #[test]
    fn test_reset_keeps_sink() {
        let (mut channel, log) = test_channel(0);
        program(&mut channel, ChannelMode::SquareWaveGenerator, 100);
        channel.reset();
        assert_eq!(*log.borrow(), vec![true, false]);
        assert_eq!(channel.divisor(), DEFAULT_DIVISOR);
        assert!(channel.terminal_hit());

        program(&mut channel, ChannelMode::SquareWaveGenerator, 100);
        assert_eq!(*log.borrow(), vec![true, false, true]);
    }

    #[test]
    fn test_clock_ratio_change() {
        let (mut channel, _) = test_channel(0);
        program(&mut channel, ChannelMode::InterruptOnTerminalCount, 1000);
        advance(&mut channel, 400);
        channel.set_clock_ratio(ClockRatio::from_ratio(3.0));
        assert_eq!(channel.current_count(), 600);
        channel.consume(ClockRatio::from_ratio(3.0).counts_to_time(600));
        channel.expire_due();
        assert!(channel.output());
    }
}
