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

    devices::pit::sink.rs

    Output sinks for timer channels.

    Every change of a channel's output level is delivered to the sink
    attached to that channel. The board decides what each output is wired
    to: an interrupt line, a DMA request, the speaker, the NMI line, or the
    clock and gate of another timer.

*/

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use enum_dispatch::enum_dispatch;

use crate::{
    device_traits::lines::{DmaController, InterruptController, NmiLine, Speaker},
    devices::pit::Pit,
};

#[enum_dispatch]
pub enum OutputSinkDispatch {
    NullSink,
    IrqSink,
    DmaRequestSink,
    RefreshToggleSink,
    SpeakerSink,
    NmiSink,
    ChainedTimerSink,
    CallbackSink,
}

#[enum_dispatch(OutputSinkDispatch)]
pub trait OutputSink {
    /// Called once for every change of the channel output, in the order the changes occur.
    fn on_level_changed(&mut self, level: bool);
}

impl Default for OutputSinkDispatch {
    fn default() -> Self {
        NullSink.into()
    }
}

/// An unconnected output.
#[derive(Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn on_level_changed(&mut self, _level: bool) {}
}

/// Drives an interrupt controller request line. The request is raised on the rising edge and
/// withdrawn while the output is low.
pub struct IrqSink {
    pic: Rc<RefCell<dyn InterruptController>>,
    irq: u8,
}

impl IrqSink {
    pub fn new(pic: Rc<RefCell<dyn InterruptController>>, irq: u8) -> Self {
        Self { pic, irq }
    }
}

impl OutputSink for IrqSink {
    fn on_level_changed(&mut self, level: bool) {
        let mut pic = self.pic.borrow_mut();
        match level {
            true => pic.request_interrupt(self.irq),
            false => pic.clear_interrupt(self.irq),
        }
    }
}

/// Requests DMA service on each rising edge. On the PC/XT, channel 1 of the timer sends DREQ0
/// to the DMA controller to perform DRAM refresh.
pub struct DmaRequestSink {
    dma: Rc<RefCell<dyn DmaController>>,
    channel: usize,
}

impl DmaRequestSink {
    pub fn new(dma: Rc<RefCell<dyn DmaController>>, channel: usize) -> Self {
        Self { dma, channel }
    }
}

impl OutputSink for DmaRequestSink {
    fn on_level_changed(&mut self, level: bool) {
        if level {
            self.dma.borrow_mut().request_service(self.channel);
        }
    }
}

/// AT-style refresh detect: a bit that flips on every rising edge, visible in bit 4 of system
/// control port B. BIOS code polls it to make fixed delays.
pub struct RefreshToggleSink {
    toggle: Rc<Cell<bool>>,
}

impl RefreshToggleSink {
    pub fn new(toggle: Rc<Cell<bool>>) -> Self {
        Self { toggle }
    }
}

impl OutputSink for RefreshToggleSink {
    fn on_level_changed(&mut self, level: bool) {
        if level {
            self.toggle.set(!self.toggle.get());
        }
    }
}

pub struct SpeakerSink {
    speaker: Rc<RefCell<dyn Speaker>>,
}

impl SpeakerSink {
    pub fn new(speaker: Rc<RefCell<dyn Speaker>>) -> Self {
        Self { speaker }
    }
}

impl OutputSink for SpeakerSink {
    fn on_level_changed(&mut self, level: bool) {
        self.speaker.borrow_mut().set_timer_output(level);
    }
}

/// Drives the NMI line directly from the output level (PS/2 watchdog timer).
pub struct NmiSink {
    nmi: Rc<RefCell<dyn NmiLine>>,
}

impl NmiSink {
    pub fn new(nmi: Rc<RefCell<dyn NmiLine>>) -> Self {
        Self { nmi }
    }
}

impl OutputSink for NmiSink {
    fn on_level_changed(&mut self, level: bool) {
        self.nmi.borrow_mut().set_nmi(level);
    }
}

/// PS/2 system timer output. Behaves as an [IrqSink], and additionally feeds a channel of a
/// second timer chip: the rising edge raises that channel's gate and the falling edge clocks it.
/// The downstream channel must not be using the virtual clock.
pub struct ChainedTimerSink {
    irq: IrqSink,
    downstream: Rc<RefCell<Pit>>,
    channel: usize,
}

impl ChainedTimerSink {
    pub fn new(irq: IrqSink, downstream: Rc<RefCell<Pit>>, channel: usize) -> Self {
        Self {
            irq,
            downstream,
            channel,
        }
    }
}

impl OutputSink for ChainedTimerSink {
    fn on_level_changed(&mut self, level: bool) {
        self.irq.on_level_changed(level);
        let mut downstream = self.downstream.borrow_mut();
        match level {
            true => downstream.set_gate(self.channel, true),
            false => downstream.clock(self.channel),
        }
    }
}

/// Forwards output changes to a closure. Used for board logic that doesn't warrant its own
/// sink type, and by tests.
pub struct CallbackSink(Box<dyn FnMut(bool)>);

impl CallbackSink {
    pub fn new(f: impl FnMut(bool) + 'static) -> Self {
        CallbackSink(Box::new(f))
    }
}

impl OutputSink for CallbackSink {
    fn on_level_changed(&mut self, level: bool) {
        (self.0)(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct TestPic {
        requests: Vec<u8>,
        clears:   Vec<u8>,
    }

    impl InterruptController for TestPic {
        fn request_interrupt(&mut self, interrupt: u8) {
            self.requests.push(interrupt);
        }
        fn clear_interrupt(&mut self, interrupt: u8) {
            self.clears.push(interrupt);
        }
    }

    #[derive(Default)]
    struct TestDma {
        requests: Vec<usize>,
    }

    impl DmaController for TestDma {
        fn request_service(&mut self, channel: usize) {
            self.requests.push(channel);
        }
    }

    #[test]
    fn test_irq_sink() {
        let pic = Rc::new(RefCell::new(TestPic::default()));
        let mut sink: OutputSinkDispatch = IrqSink::new(pic.clone(), 0).into();

        sink.on_level_changed(true);
        sink.on_level_changed(false);
        sink.on_level_changed(true);

        assert_eq!(pic.borrow().requests, vec![0, 0]);
        assert_eq!(pic.borrow().clears, vec![0]);
    }

    #[test]
    fn test_dma_sink_requests_on_rising_edge_only() {
        let dma = Rc::new(RefCell::new(TestDma::default()));
        let mut sink: OutputSinkDispatch = DmaRequestSink::new(dma.clone(), 0).into();

        sink.on_level_changed(false);
        sink.on_level_changed(true);
        sink.on_level_changed(false);

        assert_eq!(dma.borrow().requests, vec![0]);
    }

    #[test]
    fn test_refresh_toggle() {
        let toggle = Rc::new(Cell::new(false));
        let mut sink: OutputSinkDispatch = RefreshToggleSink::new(toggle.clone()).into();

        sink.on_level_changed(true);
        assert!(toggle.get());
        sink.on_level_changed(false);
        assert!(toggle.get());
        sink.on_level_changed(true);
        assert!(!toggle.get());
    }

    #[test]
    fn test_callback_sink() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut sink: OutputSinkDispatch = CallbackSink::new(move |level| seen_clone.borrow_mut().push(level)).into();

        sink.on_level_changed(true);
        sink.on_level_changed(false);

        assert_eq!(*seen.borrow(), vec![true, false]);
    }
}
