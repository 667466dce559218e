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

    bus.rs

    Port IO interface implemented by the timer chips, and the time unit the
    bus uses to tell a device how far the CPU has run.

*/

/// Value returned for a read of a port that no device decodes.
pub const NO_IO_BYTE: u8 = 0xFF;

/// An amount of emulated time elapsed since a device was last run.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DeviceRunTimeUnit {
    /// Elapsed CPU clock ticks.
    SystemTicks(u32),
    Microseconds(f64),
}

pub const NULL_DELTA_US: DeviceRunTimeUnit = DeviceRunTimeUnit::Microseconds(0.0);
pub const NULL_DELTA_TICKS: DeviceRunTimeUnit = DeviceRunTimeUnit::SystemTicks(0);

pub trait IoDevice {
    /// Read an 8-bit value from an IO port.
    ///
    /// `delta` is the time the CPU has run since the device was last run. A device may use it
    /// to bring itself in sync with CPU state before answering.
    fn read_u8(&mut self, port: u16, delta: DeviceRunTimeUnit) -> u8;
    /// Write an 8-bit value to an IO port. See [IoDevice::read_u8] for `delta`.
    fn write_u8(&mut self, port: u16, data: u8, delta: DeviceRunTimeUnit);
    /// Return a list of the ports this device decodes, along with a display name for each.
    fn port_list(&self) -> Vec<(String, u16)>;
}
