// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![allow(missing_docs)]
//! Gameboy's timer controller.

use super::Memory;
use super::memory_range::*;
use super::consts::NO_EVENT_CYCLES;

use crate::GameboyError;

use crate::config::*;
use crate::cpu::interrupts::*;

pub mod consts {
	use super::*;

	pub const IO_DIV: u16 = 0xFF04;
	pub const IO_TIMA: u16 = 0xFF05;
	pub const IO_TMA: u16 = 0xFF06;
	pub const IO_TAC: u16 = 0xFF07;

	pub const MMAP_IO_TIMER: MemoryRange = make_range!(0xFF04, 0xFF07);
}

use consts::*;

pub struct Timer {
	/// DIV consists of 2 bytes, and only the higher 8 bits are exposed to the cpu.
	div: u16,
	/// Timer counter.
	tima: u8,
	/// Timer modulo.
	tma: u8,
	/// Timer control.
	tac: Tac,
	/// Cycles accumulated towards the next TIMA increment.
	counter: usize,

	interrupt_flag: InterruptMask,
}

struct Tac {
	pub enable: bool,
	pub frequency: u8,
}

impl Timer {
	/// Initialize a new timer instance.
	pub fn new(config: &Config) -> Self {
		let mut timer = Timer {
			div: 0,
			tima: 0,
			tma: 0,
			tac: Tac::new(),
			counter: 0,
			interrupt_flag: 0,
		};

		timer.reset(config);

		timer
	}

	/// Reset the peripheral to boot state.
	pub fn reset(&mut self, config: &Config) {
		match config.model {
			HardwareModel::GB | HardwareModel::SGB => {
				self.div = 0xabcc;
			}
			HardwareModel::GBC => {
				self.div = 0x1ea0;
			}
			HardwareModel::GBP => {
				self.div = 0x1ea4;
			}
		}

		self.tima = 0;
		self.tma = 0;
		self.counter = 0;
		self.tac.reset();
		self.interrupt_flag = 0;
	}

	/// Update the timer's state according to the elapsed time.
	pub fn process(&mut self, cycles: usize) {
		self.div = self.div.wrapping_add(cycles as u16);

		if !self.tac.enable {
			return;
		}

		// Accumulating whole periods keeps large scheduler batches from
		// skipping increments.
		self.counter += cycles;
		let period = self.tac.period();

		while self.counter >= period {
			self.counter -= period;
			self.tima = self.tima.wrapping_add(1);

			if self.tima == 0 {
				// Overflow: reload from the modulo and request the interrupt.
				self.tima = self.tma;
				self.interrupt_flag |= Interrupt::Timer.value();
			}
		}
	}

	/// Returns the cycle distance to the next TIMA increment.
	pub fn get_cycles(&self) -> usize {
		if self.tac.enable {
			self.tac.period() - self.counter
		} else {
			NO_EVENT_CYCLES
		}
	}
}

impl Memory for Timer {
	fn write(&mut self, address: u16, value: u8) -> Result<(), GameboyError> {
		match address {
			IO_DIV => {
				// Any write clears the whole internal counter.
				self.div = 0;
				self.counter = 0;
			}
			IO_TIMA => {
				self.tima = value;
			}
			IO_TMA => {
				self.tma = value;
			}
			IO_TAC => {
				self.tac.write(value);
			}
			_ => {
				return Err(GameboyError::BadAddress(address));
			}
		}

		Ok(())
	}

	fn read(&self, address: u16) -> Result<u8, GameboyError> {
		match address {
			IO_DIV => {
				Ok(((self.div & 0xFF00) >> 8) as u8)
			}
			IO_TIMA => {
				Ok(self.tima)
			}
			IO_TMA => {
				Ok(self.tma)
			}
			IO_TAC => {
				Ok(self.tac.read())
			}
			_ => {
				Err(GameboyError::BadAddress(address))
			}
		}
	}
}

impl InterruptSource for Timer {
	fn interrupts(&self) -> InterruptMask {
		self.interrupt_flag
	}

	fn clear(&mut self) {
		self.interrupt_flag = 0;
	}
}

#[allow(unused)]
impl Tac {
	pub fn new() -> Self {
		Tac { enable: false, frequency: 0 }
	}

	pub fn reset(&mut self) {
		self.enable = false;
		self.frequency = 0;
	}

	/// The TIMA period in cycles for the selected frequency
	/// (4096, 262144, 65536 and 16384 Hz respectively).
	pub fn period(&self) -> usize {
		[1024, 16, 64, 256][self.frequency as usize]
	}

	pub fn write(&mut self, value: u8) {
		self.enable = (value & 4) != 0;
		self.frequency = value & 3;
	}

	pub fn read(&self) -> u8 {
		self.frequency + if self.enable { 4 } else { 0 }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fresh() -> Timer {
		let mut timer = Timer::new(&Config::default());
		timer.write(IO_DIV, 0).unwrap();

		timer
	}

	#[test]
	fn test_div_increments_and_clears() {
		let mut timer = fresh();

		assert_eq!(0x00, timer.read(IO_DIV).unwrap());

		timer.process(512);
		assert_eq!(0x02, timer.read(IO_DIV).unwrap());

		timer.write(IO_DIV, 0x57).unwrap();
		assert_eq!(0x00, timer.read(IO_DIV).unwrap());
	}

	#[test]
	fn test_overflow_reloads_tma() {
		// Every selectable frequency overflows after exactly one period.
		for (select, period) in [(0_u8, 1024_usize), (1, 16), (2, 64), (3, 256)].iter() {
			let mut timer = fresh();

			timer.write(IO_TMA, 0x42).unwrap();
			timer.write(IO_TIMA, 0xFF).unwrap();
			timer.write(IO_TAC, 4 | select).unwrap();

			timer.process(period - 1);
			assert_eq!(0xFF, timer.read(IO_TIMA).unwrap());
			assert_eq!(0, timer.interrupts());

			timer.process(1);
			assert_eq!(0x42, timer.read(IO_TIMA).unwrap());
			assert_eq!(Interrupt::Timer.value(), timer.interrupts());
		}
	}

	#[test]
	fn test_disabled_timer_holds_tima() {
		let mut timer = fresh();

		timer.write(IO_TIMA, 0x10).unwrap();
		timer.process(4096);

		assert_eq!(0x10, timer.read(IO_TIMA).unwrap());
		assert_eq!(0, timer.interrupts());
	}

	#[test]
	fn test_batched_cycles_keep_every_increment() {
		let mut timer = fresh();

		// 16-cycle period advanced in one large batch.
		timer.write(IO_TAC, 4 | 1).unwrap();
		timer.process(160);

		assert_eq!(10, timer.read(IO_TIMA).unwrap());
	}

	#[test]
	fn test_event_distance() {
		let mut timer = fresh();

		assert_eq!(NO_EVENT_CYCLES, timer.get_cycles());

		timer.write(IO_TAC, 4).unwrap();
		timer.process(1000);
		assert_eq!(24, timer.get_cycles());
	}
}
