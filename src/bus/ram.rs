// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Emulate the gameboy's intermal RAM, and the bus's missing-memory sink.

use super::Memory;
use super::consts::*;
use super::memory_range::*;

use crate::GameboyError;

/// Gameboy's internal memory.
pub struct InternalRam {
	data: [u8; range_size!(MMAP_RAM_INTERNAL)],
	high_data: [u8; range_size!(MMAP_RAM_HIGH)],
}

impl InternalRam {
	/// Initialize the internal ram.
	pub fn new() -> Self {
		InternalRam {
			data: [0_u8; range_size!(MMAP_RAM_INTERNAL)],
			high_data: [0_u8; range_size!(MMAP_RAM_HIGH)],
		}
	}

	/// Clear the ram's contents.
	pub fn reset(&mut self) {
		self.data = [0_u8; range_size!(MMAP_RAM_INTERNAL)];
		self.high_data = [0_u8; range_size!(MMAP_RAM_HIGH)];
	}

	/// Returns the mapped offset within the ram for the given address.
	///
	/// The ram has two memory ranges mapped to it (MMAP_RAM_INTERNAL and MMAP_RAM_ECHO).
	/// This function resolves the current range and returns the offset relative to it.
	fn offset(&self, address: u16) -> usize {
		match address {
			memory_range!(MMAP_RAM_INTERNAL) |
			memory_range!(MMAP_RAM_ECHO) => {
				// The echo region mirrors the work ram through the
				// same low address bits.
				(address as usize) & 0x1FFF
			}
			_ => {
				panic!();
			}
		}
	}

	/// Returns the mapped offset within the high ram for the given address.
	fn hram_offset(&self, address: u16) -> usize {
		match address {
			memory_range!(MMAP_RAM_HIGH) => {
				(address as usize - range_start!(MMAP_RAM_HIGH)) as usize
			}
			_ => {
				panic!();
			}
		}
	}
}

impl Memory for InternalRam {
	/// Write to the internal ram.
	fn write(&mut self, address: u16, value: u8) -> Result<(), GameboyError> {
		match address {
			memory_range!(MMAP_RAM_INTERNAL) |
			memory_range!(MMAP_RAM_ECHO) => {
				self.data[self.offset(address)] = value;
				Ok(())
			}
			memory_range!(MMAP_RAM_HIGH) => {
				self.high_data[self.hram_offset(address)] = value;
				Ok(())
			}
			_ => {
				Err(GameboyError::Io("ram_write: Attempt to write out of bounds."))
			}
		}
	}

	/// Read from the internal ram.
	fn read(&self, address: u16) -> Result<u8, GameboyError> {
		match address {
			memory_range!(MMAP_RAM_INTERNAL) |
			memory_range!(MMAP_RAM_ECHO) => {
				Ok(self.data[self.offset(address)])
			}
			memory_range!(MMAP_RAM_HIGH) => {
				Ok(self.high_data[self.hram_offset(address)])
			}
			_ => {
				Err(GameboyError::Io("ram_read: Attempt to read out of bounds."))
			}
		}
	}
}

/// The sink for bus addresses no peripheral claims.
///
/// The hardware's data bus floats high on such accesses, so reads return
/// 0xFF and writes are discarded.
pub struct MissingMemory;

impl Memory for MissingMemory {
	fn write(&mut self, address: u16, value: u8) -> Result<(), GameboyError> {
		log::trace!("write to unmapped address 0x{:04x}: 0x{:02x}", address, value);

		Ok(())
	}

	fn read(&self, address: u16) -> Result<u8, GameboyError> {
		log::trace!("read from unmapped address 0x{:04x}", address);

		Ok(0xFF)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_ram_round_trip() {
		let mut ram = InternalRam::new();

		// Work ram and high ram keep what is written.
		ram.write(0xC000, 0x12).unwrap();
		ram.write(0xDFFF, 0x34).unwrap();
		ram.write(0xFF80, 0x56).unwrap();
		ram.write(0xFFFE, 0x78).unwrap();

		assert_eq!(0x12, ram.read(0xC000).unwrap());
		assert_eq!(0x34, ram.read(0xDFFF).unwrap());
		assert_eq!(0x56, ram.read(0xFF80).unwrap());
		assert_eq!(0x78, ram.read(0xFFFE).unwrap());
	}

	#[test]
	fn test_echo_ram_aliases_work_ram() {
		let mut ram = InternalRam::new();

		for &(echo, backing) in [(0xE000_u16, 0xC000_u16),
								 (0xF123, 0xD123),
								 (0xFDFF, 0xDDFF)].iter() {
			ram.write(echo, 0xAB).unwrap();
			assert_eq!(0xAB, ram.read(backing).unwrap());

			ram.write(backing, 0xCD).unwrap();
			assert_eq!(0xCD, ram.read(echo).unwrap());
		}
	}

	#[test]
	fn test_missing_memory_floats_high() {
		let mut missing = MissingMemory;

		assert_eq!(0xFF, missing.read(0xFEA0).unwrap());
		missing.write(0xFEA0, 0x00).unwrap();
		assert_eq!(0xFF, missing.read(0xFEA0).unwrap());
	}
}
