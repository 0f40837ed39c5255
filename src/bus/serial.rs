// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![allow(missing_docs)]
//! Gameboy's serial transfer port.

use super::Memory;
use super::memory_range::*;
use super::consts::NO_EVENT_CYCLES;

use crate::GameboyError;
use crate::cpu::interrupts::*;

pub mod consts {
	use super::*;

	/// Serial transfer data.
	pub const IO_SB: u16 = 0xFF01;
	/// Serial transfer control.
	pub const IO_SC: u16 = 0xFF02;

	pub const MMAP_IO_SERIAL: MemoryRange = make_range!(0xFF01, 0xFF02);

	/// The internal clock shifts bits at 8192 Hz, so a full byte takes
	/// 4096 cycles.
	pub const TRANSFER_CYCLES: usize = 4096;
}

use consts::*;

pub struct Serial {
	/// Transfer data register (SB).
	data: u8,
	/// Transfer control register (SC).
	control: u8,
	/// Cycles left until the active transfer completes.
	countdown: usize,

	interrupt_flag: InterruptMask,
}

impl Serial {
	/// Initialize a new serial port instance.
	pub fn new() -> Self {
		Serial {
			data: 0,
			control: 0,
			countdown: 0,
			interrupt_flag: 0,
		}
	}

	/// Reset the peripheral to boot state.
	pub fn reset(&mut self) {
		self.data = 0;
		self.control = 0;
		self.countdown = 0;
		self.interrupt_flag = 0;
	}

	/// Whether a transfer driven by the internal clock is in flight.
	/// With an external clock and no peer there is no clock at all,
	/// so such transfers never complete.
	fn active(&self) -> bool {
		self.control & 0x81 == 0x81
	}

	/// Update the port's state according to the elapsed time.
	pub fn process(&mut self, cycles: usize) {
		if !self.active() {
			return;
		}

		if self.countdown > cycles {
			self.countdown -= cycles;
			return;
		}

		// Transfer complete. Without a connected peer the incoming
		// bits read back as ones.
		self.countdown = 0;
		self.data = 0xFF;
		self.control &= 0x7F;
		self.interrupt_flag |= Interrupt::Serial.value();
	}

	/// Returns the cycle distance to the transfer completion.
	pub fn get_cycles(&self) -> usize {
		if self.active() {
			self.countdown
		} else {
			NO_EVENT_CYCLES
		}
	}
}

impl Memory for Serial {
	fn write(&mut self, address: u16, value: u8) -> Result<(), GameboyError> {
		match address {
			IO_SB => {
				self.data = value;
			}
			IO_SC => {
				self.control = value;

				if self.active() {
					self.countdown = TRANSFER_CYCLES;
				}
			}
			_ => {
				return Err(GameboyError::BadAddress(address));
			}
		}

		Ok(())
	}

	fn read(&self, address: u16) -> Result<u8, GameboyError> {
		match address {
			IO_SB => Ok(self.data),
			IO_SC => Ok(self.control),
			_ => Err(GameboyError::BadAddress(address)),
		}
	}
}

impl InterruptSource for Serial {
	fn interrupts(&self) -> InterruptMask {
		self.interrupt_flag
	}

	fn clear(&mut self) {
		self.interrupt_flag = 0;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_internal_clock_transfer_completes() {
		let mut serial = Serial::new();

		serial.write(IO_SB, 0x5A).unwrap();
		serial.write(IO_SC, 0x81).unwrap();

		serial.process(TRANSFER_CYCLES - 1);
		assert_eq!(0x81, serial.read(IO_SC).unwrap());
		assert_eq!(0, serial.interrupts());

		serial.process(1);

		// No peer: the shifted-in byte is all ones.
		assert_eq!(0xFF, serial.read(IO_SB).unwrap());
		assert_eq!(0x01, serial.read(IO_SC).unwrap());
		assert_eq!(Interrupt::Serial.value(), serial.interrupts());
	}

	#[test]
	fn test_external_clock_never_completes() {
		let mut serial = Serial::new();

		serial.write(IO_SB, 0x5A).unwrap();
		serial.write(IO_SC, 0x80).unwrap();

		serial.process(TRANSFER_CYCLES * 16);

		assert_eq!(0x5A, serial.read(IO_SB).unwrap());
		assert_eq!(0x80, serial.read(IO_SC).unwrap());
		assert_eq!(0, serial.interrupts());
		assert_eq!(NO_EVENT_CYCLES, serial.get_cycles());
	}
}
