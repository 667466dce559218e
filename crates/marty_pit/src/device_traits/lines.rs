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

    device_traits::lines.rs

    Interfaces of the devices a timer output can drive. The interrupt
    controller, DMA controller, speaker and NMI logic are implemented
    elsewhere; the timer only needs to raise and lower their inputs.

*/

/// An interrupt controller with edge/level tracked request lines (8259 PIC).
pub trait InterruptController {
    fn request_interrupt(&mut self, interrupt: u8);
    fn clear_interrupt(&mut self, interrupt: u8);
}

/// A DMA controller that accepts service requests (DREQ).
pub trait DmaController {
    fn request_service(&mut self, channel: usize);
}

/// The PC speaker. The timer output is AND'd with the speaker data enable bit of
/// system control port B.
pub trait Speaker {
    fn set_timer_output(&mut self, level: bool);
    fn set_data_enable(&mut self, enabled: bool);
}

/// The non-maskable interrupt line of the CPU.
pub trait NmiLine {
    fn set_nmi(&mut self, level: bool);
}
