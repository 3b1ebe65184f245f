//! Reference device: a byte-coded GPIO sequencer.
//!
//! `ToyMcu` is the smallest device that exercises every part of the harness contract:
//! program flash, a boot ROM at address zero, a GPIO bank and a program counter. Its
//! instruction set only drives pins, waits and branches, which is enough to blink LEDs.
//!
//! | Opcode | Operands        | Effect                                   |
//! |--------|-----------------|------------------------------------------|
//! | `00`   |                 | no operation                             |
//! | `01`   | pin             | drive pin high                           |
//! | `02`   | pin             | drive pin low                            |
//! | `03`   | pin             | toggle pin (non-high becomes high)       |
//! | `04`   | ticks (u16 LE)  | wait; the instruction takes `ticks` ticks |
//! | `05`   | target (u32 LE) | jump                                     |
//! | `06`   | pin             | release pin to floating input            |
//! | `FF`   |                 | halt (also the erased-flash value)       |
//!
//! Anything else raises `DeviceError::IllegalInstruction`.

use tracing::{debug, error, info, warn};

use crate::common::DeviceError;
use crate::config::DeviceConfig;
use crate::soc::gpio::{GpioBank, PinLevel};
use crate::soc::memory::{BootRom, Flash};
use crate::soc::traits::{Device, LogLevel, MemorySink};

/// Instruction encodings.
pub mod opcodes {
    /// No operation.
    pub const NOP: u8 = 0x00;
    /// Drive a pin high.
    pub const HIGH: u8 = 0x01;
    /// Drive a pin low.
    pub const LOW: u8 = 0x02;
    /// Toggle a pin.
    pub const TOGGLE: u8 = 0x03;
    /// Wait a number of ticks.
    pub const DELAY: u8 = 0x04;
    /// Jump to an absolute address.
    pub const JUMP: u8 = 0x05;
    /// Release a pin to floating input.
    pub const FLOAT: u8 = 0x06;
    /// Stop executing.
    pub const HALT: u8 = 0xFF;
}

/// Builds the default boot ROM: a single jump into flash.
pub fn boot_rom(flash_base: u32) -> Vec<u8> {
    let mut rom = vec![opcodes::JUMP];
    rom.extend_from_slice(&flash_base.to_le_bytes());
    rom
}

/// A byte-coded GPIO sequencer.
#[derive(Debug)]
pub struct ToyMcu {
    flash: Flash,
    bootrom: BootRom,
    gpio: GpioBank,
    pc: u32,
    /// Remaining ticks of the current `DELAY`.
    wait: u32,
    halted: bool,
    log_level: LogLevel,
    cycles: u64,
}

impl ToyMcu {
    /// Creates a powered-on device with erased flash and no boot ROM.
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            flash: Flash::new(config.flash_base, config.flash_size),
            bootrom: BootRom::default(),
            gpio: GpioBank::new(config.pin_count),
            pc: 0,
            wait: 0,
            halted: false,
            log_level: LogLevel::default(),
            cycles: 0,
        }
    }

    /// Returns a factory producing fresh devices with this configuration.
    pub fn factory(config: &DeviceConfig) -> impl Fn() -> Box<dyn Device> + use<> {
        let config = config.clone();
        move || Box::new(Self::new(&config)) as Box<dyn Device>
    }

    /// Number of ticks executed so far.
    pub const fn cycles(&self) -> u64 {
        self.cycles
    }

    fn read(&self, addr: u32) -> Result<u8, DeviceError> {
        self.bootrom
            .read_u8(addr)
            .or_else(|| self.flash.read_u8(addr))
            .ok_or(DeviceError::BusFault { addr })
    }

    fn fetch(&mut self) -> Result<u8, DeviceError> {
        let byte = self.read(self.pc)?;
        self.pc = self.pc.wrapping_add(1);
        Ok(byte)
    }

    fn fetch_u16(&mut self) -> Result<u16, DeviceError> {
        Ok(u16::from_le_bytes([self.fetch()?, self.fetch()?]))
    }

    fn fetch_u32(&mut self) -> Result<u32, DeviceError> {
        Ok(u32::from_le_bytes([
            self.fetch()?,
            self.fetch()?,
            self.fetch()?,
            self.fetch()?,
        ]))
    }

    fn drive(&mut self, pc: u32, pin: usize, level: PinLevel) {
        if pin >= self.gpio.len() {
            if self.log_level.allows(LogLevel::Warn) {
                warn!(target: "device", "pc {pc:#010x}: write to missing pin {pin} ignored");
            }
            return;
        }
        if self.gpio.set_level(pin, level) && self.log_level.allows(LogLevel::Debug) {
            debug!(target: "device", "pc {pc:#010x}: pin {pin} -> {level:?}");
        }
    }
}

impl Device for ToyMcu {
    fn name(&self) -> &str {
        "toy-mcu"
    }

    fn flash(&mut self) -> &mut dyn MemorySink {
        &mut self.flash
    }

    fn flash_base(&self) -> u32 {
        self.flash.base()
    }

    fn load_bootrom(&mut self, image: &[u8]) {
        self.bootrom = BootRom::new(image);
    }

    fn set_log_level(&mut self, level: LogLevel) {
        self.log_level = level;
    }

    fn gpio(&mut self) -> &mut GpioBank {
        &mut self.gpio
    }

    fn pin_count(&self) -> usize {
        self.gpio.len()
    }

    fn pc(&self) -> u32 {
        self.pc
    }

    fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    fn tick(&mut self) -> Result<(), DeviceError> {
        if self.halted {
            return Ok(());
        }
        self.cycles += 1;
        if self.wait > 0 {
            self.wait -= 1;
            return Ok(());
        }

        let pc = self.pc;
        let opcode = self.fetch()?;
        match opcode {
            opcodes::NOP => {}
            opcodes::HIGH => {
                let pin = self.fetch()? as usize;
                self.drive(pc, pin, PinLevel::High);
            }
            opcodes::LOW => {
                let pin = self.fetch()? as usize;
                self.drive(pc, pin, PinLevel::Low);
            }
            opcodes::TOGGLE => {
                let pin = self.fetch()? as usize;
                let next = match self.gpio.level(pin) {
                    Some(PinLevel::High) => PinLevel::Low,
                    _ => PinLevel::High,
                };
                self.drive(pc, pin, next);
            }
            opcodes::FLOAT => {
                let pin = self.fetch()? as usize;
                self.drive(pc, pin, PinLevel::Input);
            }
            opcodes::DELAY => {
                let ticks = self.fetch_u16()?;
                self.wait = u32::from(ticks.saturating_sub(1));
            }
            opcodes::JUMP => {
                self.pc = self.fetch_u32()?;
            }
            opcodes::HALT => {
                self.halted = true;
                if self.log_level.allows(LogLevel::Info) {
                    info!(target: "device", "halted at pc {pc:#010x} after {} ticks", self.cycles);
                }
            }
            _ => {
                if self.log_level.allows(LogLevel::Error) {
                    error!(target: "device", "illegal opcode {opcode:#04x} at pc {pc:#010x}");
                }
                return Err(DeviceError::IllegalInstruction { pc, opcode });
            }
        }
        Ok(())
    }

    fn is_halted(&self) -> bool {
        self.halted
    }
}
