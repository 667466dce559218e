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

    board.rs

    Connects timer outputs to the rest of the machine.

    XT: channel 0 drives IRQ0, channel 1 requests DMA channel 0 for DRAM
        refresh, channel 2 drives the speaker.
    AT: as XT, but channel 1 toggles the refresh detect bit of port B.
    PS/2: as AT, plus a second timer at 0x44 whose channel 0 is clocked by
        the system timer output and drives the NMI line (watchdog).

*/

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use anyhow::{anyhow, Error};

use crate::{
    bus::{DeviceRunTimeUnit, IoDevice, NO_IO_BYTE},
    clock::ClockRatio,
    config::{BoardType, TimerConfig},
    device_traits::lines::{DmaController, InterruptController, NmiLine, Speaker},
    devices::pit::{
        sink::{ChainedTimerSink, DmaRequestSink, IrqSink, NmiSink, RefreshToggleSink, SpeakerSink},
        Pit,
    },
};

pub const PIT_PS2_SECONDARY_BASE: u16 = 0x44;
pub const TIMER_IRQ: u8 = 0;
pub const REFRESH_DMA_CHANNEL: usize = 0;

pub const PORT_B_TIMER2_GATE: u8 = 0b0000_0001;
pub const PORT_B_SPEAKER_DATA: u8 = 0b0000_0010;
pub const PORT_B_REFRESH_TOGGLE: u8 = 0b0001_0000;
pub const PORT_B_TIMER2_OUTPUT: u8 = 0b0010_0000;

const PIT_SYSTEM_CHANNEL: usize = 0;
const PIT_REFRESH_CHANNEL: usize = 1;
const PIT_SPEAKER_CHANNEL: usize = 2;
const PIT_WATCHDOG_CHANNEL: usize = 0;

/// The devices timer outputs can be connected to. Which of them a board needs depends on the
/// board type.
pub struct BoardLines {
    pub pic: Rc<RefCell<dyn InterruptController>>,
    pub dma: Option<Rc<RefCell<dyn DmaController>>>,
    pub speaker: Option<Rc<RefCell<dyn Speaker>>>,
    pub nmi: Option<Rc<RefCell<dyn NmiLine>>>,
}

pub struct BoardTimers {
    board: BoardType,
    primary: Pit,
    secondary: Option<Rc<RefCell<Pit>>>,
    refresh_toggle: Rc<Cell<bool>>,
    port_b: u8,
    speaker: Option<Rc<RefCell<dyn Speaker>>>,
}

pub fn build_board_timers(config: &TimerConfig, lines: BoardLines) -> Result<BoardTimers, Error> {
    config.validate()?;

    let clock = config.clock_ratio();
    let mut primary = Pit::new(config.pit_type, config.base_port, clock);
    let refresh_toggle = Rc::new(Cell::new(false));
    let mut secondary = None;

    let system_irq = IrqSink::new(lines.pic.clone(), TIMER_IRQ);

    match config.board {
        BoardType::Xt => {
            let dma = lines
                .dma
                .ok_or_else(|| anyhow!("XT timer wiring requires a DMA controller"))?;
            primary.set_output_sink(PIT_SYSTEM_CHANNEL, system_irq);
            primary.set_output_sink(PIT_REFRESH_CHANNEL, DmaRequestSink::new(dma, REFRESH_DMA_CHANNEL));
        }
        BoardType::At => {
            primary.set_output_sink(PIT_SYSTEM_CHANNEL, system_irq);
            primary.set_output_sink(PIT_REFRESH_CHANNEL, RefreshToggleSink::new(refresh_toggle.clone()));
        }
        BoardType::Ps2 => {
            let nmi = lines
                .nmi
                .ok_or_else(|| anyhow!("PS/2 timer wiring requires an NMI line"))?;

            let mut watchdog = Pit::new(config.pit_type, config.secondary_base_port, clock);
            watchdog.set_using_virtual_clock(PIT_WATCHDOG_CHANNEL, false);
            watchdog.set_output_sink(PIT_WATCHDOG_CHANNEL, NmiSink::new(nmi));
            let watchdog = Rc::new(RefCell::new(watchdog));

            primary.set_output_sink(
                PIT_SYSTEM_CHANNEL,
                ChainedTimerSink::new(system_irq, watchdog.clone(), PIT_WATCHDOG_CHANNEL),
            );
            primary.set_output_sink(PIT_REFRESH_CHANNEL, RefreshToggleSink::new(refresh_toggle.clone()));
            secondary = Some(watchdog);
        }
    }

    match &lines.speaker {
        Some(speaker) => primary.set_output_sink(PIT_SPEAKER_CHANNEL, SpeakerSink::new(speaker.clone())),
        None => log::debug!("No speaker attached; timer channel 2 output unconnected"),
    }

    log::debug!(
        "Timer wiring: board {} {} at {:04X}, CPU clock {:.6} MHz",
        config.board,
        config.pit_type,
        config.base_port,
        config.cpu_clock_mhz
    );

    Ok(BoardTimers {
        board: config.board,
        primary,
        secondary,
        refresh_toggle,
        port_b: 0,
        speaker: lines.speaker,
    })
}

impl IoDevice for BoardTimers {
    fn read_u8(&mut self, port: u16, delta: DeviceRunTimeUnit) -> u8 {
        if self.primary_decodes(port) {
            self.primary.read_u8(port, delta)
        }
        else if let Some(secondary) = self.secondary_for(port) {
            secondary.borrow_mut().read_u8(port, delta)
        }
        else {
            log::warn!("Read from unhandled timer port: {:04X}", port);
            NO_IO_BYTE
        }
    }

    fn write_u8(&mut self, port: u16, data: u8, delta: DeviceRunTimeUnit) {
        if self.primary_decodes(port) {
            self.primary.write_u8(port, data, delta);
        }
        else if let Some(secondary) = self.secondary_for(port) {
            secondary.borrow_mut().write_u8(port, data, delta);
        }
        else {
            log::warn!("Write to unhandled timer port: {:04X} data: {:02X}", port, data);
        }
    }

    fn port_list(&self) -> Vec<(String, u16)> {
        let mut ports = self.primary.port_list();
        if let Some(secondary) = &self.secondary {
            ports.extend(
                secondary
                    .borrow()
                    .port_list()
                    .into_iter()
                    .map(|(name, port)| (format!("Secondary {}", name), port)),
            );
        }
        ports
    }
}

impl BoardTimers {
    #[inline]
    fn primary_decodes(&self, port: u16) -> bool {
        (port & !0x03) == self.primary.base_port()
    }

    fn secondary_for(&self, port: u16) -> Option<Rc<RefCell<Pit>>> {
        self.secondary
            .as_ref()
            .filter(|secondary| (port & !0x03) == secondary.borrow().base_port())
            .cloned()
    }

    pub fn board(&self) -> BoardType {
        self.board
    }

    pub fn primary(&self) -> &Pit {
        &self.primary
    }

    pub fn primary_mut(&mut self) -> &mut Pit {
        &mut self.primary
    }

    pub fn secondary(&self) -> Option<Rc<RefCell<Pit>>> {
        self.secondary.clone()
    }

    pub fn reset(&mut self) {
        self.primary.reset();
        if let Some(secondary) = &self.secondary {
            secondary.borrow_mut().reset();
        }
        self.refresh_toggle.set(false);
        self.write_port_b(0);
    }

    /// Handle a write to system control port B. Bits other than the timer 2 gate and speaker
    /// data enable belong to other devices and are ignored.
    pub fn write_port_b(&mut self, value: u8) {
        self.port_b = value & (PORT_B_TIMER2_GATE | PORT_B_SPEAKER_DATA);
        self.primary
            .set_gate(PIT_SPEAKER_CHANNEL, value & PORT_B_TIMER2_GATE != 0);
        if let Some(speaker) = &self.speaker {
            speaker
                .borrow_mut()
                .set_data_enable(value & PORT_B_SPEAKER_DATA != 0);
        }
    }

    /// The timer-owned bits of system control port B.
    pub fn read_port_b(&self) -> u8 {
        let mut byte = self.port_b;
        if self.refresh_toggle.get() {
            byte |= PORT_B_REFRESH_TOGGLE;
        }
        if self.primary.get_output_state(PIT_SPEAKER_CHANNEL) {
            byte |= PORT_B_TIMER2_OUTPUT;
        }
        byte
    }

    pub fn run(&mut self, run_unit: DeviceRunTimeUnit) {
        self.primary.run(run_unit);
        if let Some(secondary) = &self.secondary {
            secondary.borrow_mut().run(run_unit);
        }
    }

    pub fn set_clock_ratio(&mut self, clock: ClockRatio) {
        self.primary.on_clock_ratio_changed(clock);
        if let Some(secondary) = &self.secondary {
            secondary.borrow_mut().on_clock_ratio_changed(clock);
        }
    }

    pub fn ticks_until_next_event(&self) -> Option<u64> {
        let secondary = self
            .secondary
            .as_ref()
            .and_then(|secondary| secondary.borrow().ticks_until_next_event());
        match (self.primary.ticks_until_next_event(), secondary) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
