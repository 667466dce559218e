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

    devices::pit::mod.rs

    Implements functionality for the Intel 8253/8254 Programmable Interval Timer.

*/

pub mod channel;
pub mod sink;

use std::collections::BTreeMap;

use modular_bitfield::prelude::*;
use serde_derive::Deserialize;
use strum_macros::{Display, EnumIter};

use crate::{
    bus::{DeviceRunTimeUnit, IoDevice},
    clock::ClockRatio,
};

pub use channel::{Channel, ChannelMode, ReadState, RwMode};
pub use sink::{OutputSink, OutputSinkDispatch};

pub type PitDisplayState = Vec<BTreeMap<&'static str, String>>;

pub const PIT_DEFAULT_BASE: u16 = 0x40;
pub const PIT_CHANNEL_0_DATA_PORT: u16 = 0x40;
pub const PIT_CHANNEL_1_DATA_PORT: u16 = 0x41;
pub const PIT_CHANNEL_2_DATA_PORT: u16 = 0x42;
pub const PIT_COMMAND_REGISTER: u16 = 0x43;

const PIT_PORT_MASK: u16 = 0x03;
const PIT_COMMAND_OFFSET: u16 = 0x03;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Display, EnumIter)]
pub enum PitType {
    Model8253,
    #[default]
    Model8254,
}

#[derive(Debug, PartialEq, BitfieldSpecifier)]
enum RwModeField {
    LatchCommand,
    Lsb,
    Msb,
    LsbMsb,
}

#[bitfield]
#[allow(dead_code)]
pub struct ControlByte {
    bcd: bool,
    channel_mode: B3,
    rw_mode: RwModeField,
    channel: B2,
}

/// A control byte with both channel bits set.
#[bitfield]
#[allow(dead_code)]
pub struct ReadBackCommand {
    #[skip]
    reserved: B1,
    select_channel0: bool,
    select_channel1: bool,
    select_channel2: bool,
    // Active low: a 0 latches status.
    no_status: bool,
    // Active low: a 0 latches count.
    no_count: bool,
    #[skip]
    command: B2,
}

impl ReadBackCommand {
    fn selects(&self, c: usize) -> bool {
        match c {
            0 => self.select_channel0(),
            1 => self.select_channel1(),
            _ => self.select_channel2(),
        }
    }
}

pub struct ProgrammableIntervalTimer {
    ptype: PitType,
    base_port: u16,
    clock: ClockRatio,
    channels: Vec<Channel>,
    control_byte: u8,
    /// Virtual time already run by port IO catch-up since the last call to run().
    timewarp: i64,
}
pub type Pit = ProgrammableIntervalTimer;

impl IoDevice for ProgrammableIntervalTimer {
    fn read_u8(&mut self, port: u16, delta: DeviceRunTimeUnit) -> u8 {
        // Catch up to CPU state.
        self.catch_up(delta);

        match port & PIT_PORT_MASK {
            PIT_COMMAND_OFFSET => self.control_byte,
            c => self.data_read(c as usize),
        }
    }

    fn write_u8(&mut self, port: u16, data: u8, delta: DeviceRunTimeUnit) {
        // Catch up to CPU state.
        self.catch_up(delta);

        match port & PIT_PORT_MASK {
            PIT_COMMAND_OFFSET => self.control_register_write(data),
            c => self.data_write(c as usize, data),
        }
    }

    fn port_list(&self) -> Vec<(String, u16)> {
        vec![
            (String::from("PIT Channel 0 Data Port"), self.base_port),
            (String::from("PIT Channel 1 Data Port"), self.base_port + 1),
            (String::from("PIT Channel 2 Data Port"), self.base_port + 2),
            (String::from("PIT Command Register"), self.base_port + PIT_COMMAND_OFFSET),
        ]
    }
}

#[inline]
fn check_channel(channel: usize) {
    assert!(channel < 3, "PIT: Invalid channel #{}", channel);
}

impl ProgrammableIntervalTimer {
    pub fn new(ptype: PitType, base_port: u16, clock: ClockRatio) -> Self {
        /*
            The Intel documentation says:
            "Prior to initialization, the mode, count, and output of all counters is undefined."
            We power up with every channel stopped in mode 0 with a count of 0xFFFF, so that
            nothing reaches the interrupt controller before the BIOS programs the timer.
        */
        let channels = (0..3).map(|c| Channel::new(c, clock)).collect();
        Self {
            ptype,
            base_port,
            clock,
            channels,
            control_byte: 0,
            timewarp: 0,
        }
    }

    /// Return all channels to their power-on state. Attached output sinks are kept.
    pub fn reset(&mut self) {
        log::debug!("PIT: Reset");
        self.control_byte = 0;
        self.timewarp = 0;
        for channel in self.channels.iter_mut() {
            channel.reset();
        }
    }

    pub fn ptype(&self) -> PitType {
        self.ptype
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    pub fn clock_ratio(&self) -> ClockRatio {
        self.clock
    }

    pub fn channel(&self, channel: usize) -> &Channel {
        check_channel(channel);
        &self.channels[channel]
    }

    /// Connect a channel's output. Called once by the board during machine setup.
    pub fn set_output_sink(&mut self, channel: usize, sink: impl Into<OutputSinkDispatch>) {
        check_channel(channel);
        self.channels[channel].set_sink(sink.into());
    }

    /// Drive the gate input of a channel.
    pub fn set_gate(&mut self, channel: usize, state: bool) {
        check_channel(channel);
        self.channels[channel].set_gate(state);
    }

    /// Clock a channel that has been taken off the virtual clock.
    pub fn clock(&mut self, channel: usize) {
        check_channel(channel);
        self.channels[channel].clock();
    }

    pub fn set_using_virtual_clock(&mut self, channel: usize, state: bool) {
        check_channel(channel);
        self.channels[channel].set_using_virtual_clock(state);
    }

    /// The emulated CPU speed has changed. Remaining time is rescaled so no channel loses
    /// progress.
    pub fn on_clock_ratio_changed(&mut self, clock: ClockRatio) {
        log::debug!(
            "PIT: Clock ratio changed from {:.4} to {:.4}",
            self.clock.ratio(),
            clock.ratio()
        );
        self.timewarp = clock.rescale(self.timewarp, &self.clock);
        for channel in self.channels.iter_mut() {
            channel.set_clock_ratio(clock);
        }
        self.clock = clock;
    }

    pub fn control_register_write(&mut self, byte: u8) {
        let control_reg = ControlByte::from_bytes([byte]);

        let c = control_reg.channel() as usize;

        if c > 2 {
            // This is a read-back command.
            match self.ptype {
                PitType::Model8253 => {
                    // Readback command not supported. Do nothing.
                    log::warn!("PIT: Read-back command {:02X} sent to 8253", byte);
                }
                PitType::Model8254 => {
                    self.read_back(byte);
                }
            }
            return;
        }

        self.control_byte = byte;
        let channel = &mut self.channels[c];

        if let RwModeField::LatchCommand = control_reg.rw_mode() {
            // All 0's access mode indicates a Latch Count Value command
            // Not an access mode itself, we now latch the current value of the channel until it is read
            // or a command byte is received
            log::trace!("PIT: Channel {} count latched", c);
            channel.latch_count();
            return;
        }

        // Convert rw_mode_field enum to rw_mode enum (drops latch command as possibile variant, as we
        // handled it above)
        let rw_mode = match control_reg.rw_mode() {
            RwModeField::Lsb => RwMode::Lsb,
            RwModeField::Msb => RwMode::Msb,
            _ => RwMode::LsbMsb,
        };

        channel.set_mode(control_reg.channel_mode().into(), rw_mode, control_reg.bcd());
    }

    fn read_back(&mut self, byte: u8) {
        let command = ReadBackCommand::from_bytes([byte]);
        log::trace!(
            "PIT: Read-back command {:02X}, count: {} status: {}",
            byte,
            !command.no_count(),
            !command.no_status()
        );

        for (c, channel) in self.channels.iter_mut().enumerate() {
            if !command.selects(c) {
                continue;
            }
            if !command.no_count() {
                channel.latch_count();
            }
            if !command.no_status() {
                channel.latch_status();
            }
        }
    }

    /// Handle a write to one of the PIT's data registers.
    /// Writes to this register specify the reload value for the given channel.
    pub fn data_write(&mut self, channel: usize, data: u8) {
        self.channels[channel].write_byte(data);
    }

    pub fn data_read(&mut self, channel: usize) -> u8 {
        self.channels[channel].read_byte()
    }

    #[inline]
    fn time_from_unit(&self, unit: DeviceRunTimeUnit) -> i64 {
        match unit {
            DeviceRunTimeUnit::SystemTicks(ticks) => ClockRatio::ticks_to_time(ticks as u64),
            DeviceRunTimeUnit::Microseconds(us) => self.clock.micros_to_time(us),
        }
    }

    /// Catch the PIT up to the CPU within the current instruction. The time run here is
    /// remembered and subtracted from the next call to run().
    fn catch_up(&mut self, delta: DeviceRunTimeUnit) {
        let target = self.time_from_unit(delta);
        if target > self.timewarp {
            self.advance(target - self.timewarp);
            self.timewarp = target;
        }
    }

    /// Run the PIT for the specified amount of emulated time.
    pub fn run(&mut self, run_unit: DeviceRunTimeUnit) {
        let elapsed = self.time_from_unit(run_unit) - self.timewarp;
        self.timewarp = 0;
        self.advance(elapsed.max(0));
    }

    /// Advance all channels, processing events in the order they fall due so that output
    /// changes on different channels are reported in time order.
    fn advance(&mut self, mut elapsed: i64) {
        loop {
            let next = self
                .channels
                .iter()
                .enumerate()
                .filter_map(|(c, channel)| channel.time_until_event().map(|t| (t, c)))
                .min();

            match next {
                Some((t, c)) if t <= elapsed => {
                    for channel in self.channels.iter_mut() {
                        channel.consume(t);
                    }
                    elapsed -= t;
                    self.channels[c].expire_due();
                }
                _ => {
                    for channel in self.channels.iter_mut() {
                        channel.consume(elapsed);
                    }
                    break;
                }
            }
        }
    }

    /// Whole CPU ticks until the next channel event, or None if no channel is running.
    pub fn ticks_until_next_event(&self) -> Option<u64> {
        self.channels
            .iter()
            .filter_map(|channel| channel.time_until_event())
            .min()
            .map(ClockRatio::time_to_ticks)
    }

    /// Scheduler entry point: the deadline of a channel has been reached. Virtual time is
    /// advanced to that deadline for every channel, so events due earlier on other channels are
    /// run first. A stopped or half-programmed channel just has its deadline pushed out.
    ///
    /// This advances time itself. A caller driving the chip with run() should not also call
    /// expire() for the same deadline.
    pub fn expire(&mut self, channel: usize) {
        check_channel(channel);
        match self.channels[channel].time_until_event() {
            Some(time) => self.advance(time),
            None => self.channels[channel].rollover(),
        }
    }

    pub fn get_output_state(&self, channel: usize) -> bool {
        self.channel(channel).output()
    }

    /// Returns the specified channel's divisor, current count, and whether it is counting, in
    /// a tuple.
    #[inline]
    pub fn get_channel_count(&self, channel: usize) -> (u16, u32, bool) {
        let channel = self.channel(channel);
        (channel.divisor(), channel.current_count(), channel.is_counting())
    }

    pub fn get_display_state(&self) -> PitDisplayState {
        let mut state_vec = Vec::new();

        for channel in self.channels.iter() {
            let mut channel_map = BTreeMap::<&str, String>::new();

            channel_map.insert("Rw Mode:", format!("{}", channel.rw_mode()));
            channel_map.insert("Channel Mode:", format!("{}", channel.mode()));
            channel_map.insert(
                "Divisor:",
                format!("{:?} [{:04X}]", channel.divisor(), channel.divisor()),
            );
            let count = channel.current_count();
            channel_map.insert("Count:", format!("{:?} [{:04X}]", count, count));
            channel_map.insert("Read State:", format!("{}", channel.read_state()));
            channel_map.insert("Output Signal:", format!("{:?}", channel.output()));
            channel_map.insert("Gate Status:", format!("{:?}", channel.gate()));
            channel_map.insert("Counting:", format!("{:?}", channel.is_counting()));
            channel_map.insert("Null Count:", format!("{:?}", channel.null_count()));
            channel_map.insert("Virtual Clock:", format!("{:?}", channel.using_virtual_clock()));

            state_vec.push(channel_map);
        }

        state_vec
    }
}
