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

    config.rs

    Timer configuration, read from the [timer] table of a machine
    configuration file.

*/

use anyhow::{anyhow, Error};
use serde_derive::Deserialize;
use strum_macros::{Display, EnumIter};

use crate::{
    board::PIT_PS2_SECONDARY_BASE,
    clock::{ClockRatio, PIT_HZ, TIMER_ONE},
    devices::pit::{PitType, PIT_DEFAULT_BASE},
};

/// How the timer outputs are wired into the rest of the machine.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Display, EnumIter)]
pub enum BoardType {
    #[default]
    Xt,
    At,
    Ps2,
}

fn default_base_port() -> u16 {
    PIT_DEFAULT_BASE
}

fn default_secondary_base_port() -> u16 {
    PIT_PS2_SECONDARY_BASE
}

#[derive(Clone, Debug, Deserialize)]
pub struct TimerConfig {
    #[serde(default)]
    pub pit_type: PitType,
    pub cpu_clock_mhz: f64,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default)]
    pub board: BoardType,
    #[serde(default = "default_secondary_base_port")]
    pub secondary_base_port: u16,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TimerConfigFile {
    pub timer: TimerConfig,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            pit_type: PitType::default(),
            cpu_clock_mhz: 4.772727,
            base_port: default_base_port(),
            board: BoardType::default(),
            secondary_base_port: default_secondary_base_port(),
        }
    }
}

impl TimerConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<TimerConfig, Error> {
        let file: TimerConfigFile =
            toml::from_str(toml_str).map_err(|e| anyhow!("Error parsing timer configuration: {}", e))?;
        file.timer.validate()?;
        Ok(file.timer)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.cpu_clock_mhz.is_finite() || self.cpu_clock_mhz <= 0.0 {
            return Err(anyhow!("Invalid CPU clock specified: {} MHz", self.cpu_clock_mhz));
        }
        // A timer clock must be worth at least one unit of virtual time.
        let ratio = self.cpu_clock_mhz * 1_000_000.0 / PIT_HZ;
        if ratio * (TIMER_ONE as f64) < 1.0 {
            return Err(anyhow!("CPU clock too slow to drive timer: {} MHz", self.cpu_clock_mhz));
        }

        check_port_range("base_port", self.base_port)?;
        if let BoardType::Ps2 = self.board {
            check_port_range("secondary_base_port", self.secondary_base_port)?;
            if self.secondary_base_port == self.base_port {
                return Err(anyhow!(
                    "Secondary timer port {:04X} overlaps primary timer",
                    self.secondary_base_port
                ));
            }
        }
        Ok(())
    }

    pub fn clock_ratio(&self) -> ClockRatio {
        ClockRatio::from_cpu_mhz(self.cpu_clock_mhz)
    }
}

fn check_port_range(name: &str, port: u16) -> Result<(), Error> {
    if port & 0x03 != 0 {
        Err(anyhow!("Invalid {}: {:04X} is not aligned to 4 ports", name, port))
    }
    else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let config = TimerConfig::from_toml_str(
            r#"
            [timer]
            pit_type = "Model8254"
            cpu_clock_mhz = 8.0
            base_port = 0x40
            board = "Ps2"
            secondary_base_port = 0x48
            "#,
        )
        .unwrap();

        assert_eq!(config.pit_type, PitType::Model8254);
        assert_eq!(config.board, BoardType::Ps2);
        assert_eq!(config.secondary_base_port, 0x48);
        assert_eq!(config.clock_ratio().cpu_hz(), 8_000_000.0);
    }

    #[test]
    fn test_parse_defaults() {
        let config = TimerConfig::from_toml_str(
            r#"
            [timer]
            cpu_clock_mhz = 4.772727
            "#,
        )
        .unwrap();

        assert_eq!(config.pit_type, PitType::Model8254);
        assert_eq!(config.base_port, 0x40);
        assert_eq!(config.board, BoardType::Xt);
        assert_eq!(config.secondary_base_port, 0x44);
        assert!((config.clock_ratio().ratio() - 4.0).abs() < 0.001);
    }

    #[test]
    fn test_default_matches_parsed() {
        let parsed = TimerConfig::from_toml_str("[timer]\ncpu_clock_mhz = 4.772727\n").unwrap();
        let config = TimerConfig::default();

        assert_eq!(config.pit_type, parsed.pit_type);
        assert_eq!(config.pit_type, PitType::Model8254);
        assert_eq!(config.base_port, parsed.base_port);
        assert_eq!(config.board, parsed.board);
        assert_eq!(config.secondary_base_port, parsed.secondary_base_port);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_clock() {
        assert!(TimerConfig::from_toml_str("[timer]\nboard = \"At\"\n").is_err());
        assert!(TimerConfig::from_toml_str("[machine]\ncpu_clock_mhz = 4.77\n").is_err());
    }

    #[test]
    fn test_invalid_clock() {
        assert!(TimerConfig::from_toml_str("[timer]\ncpu_clock_mhz = 0.0\n").is_err());
        assert!(TimerConfig::from_toml_str("[timer]\ncpu_clock_mhz = -4.77\n").is_err());
        assert!(TimerConfig::from_toml_str("[timer]\ncpu_clock_mhz = nan\n").is_err());
        assert!(TimerConfig::from_toml_str("[timer]\ncpu_clock_mhz = 0.000001\n").is_err());
    }

    #[test]
    fn test_invalid_ports() {
        let mut config = TimerConfig::default();
        config.base_port = 0x42;
        assert!(config.validate().is_err());

        let mut config = TimerConfig {
            board: BoardType::Ps2,
            ..Default::default()
        };
        config.secondary_base_port = 0x40;
        assert!(config.validate().is_err());
        config.secondary_base_port = 0x46;
        assert!(config.validate().is_err());
        config.secondary_base_port = 0x44;
        assert!(config.validate().is_ok());

        // Only a PS/2 board has a secondary timer.
        config.board = BoardType::At;
        config.secondary_base_port = 0x40;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_board_names() {
        use strum::IntoEnumIterator;
        let names: Vec<String> = BoardType::iter().map(|b| b.to_string()).collect();
        assert_eq!(names, vec!["Xt", "At", "Ps2"]);
        assert_eq!(PitType::iter().count(), 2);
    }

    #[test]
    fn test_unknown_board() {
        assert!(TimerConfig::from_toml_str("[timer]\ncpu_clock_mhz = 4.77\nboard = \"Pcjr\"\n").is_err());
    }
}
