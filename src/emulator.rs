// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
//! The emulation library's front-end API.

use crate::cpu::*;
use crate::bus::joypad::Controller;
use crate::bus::cartridge::*;
use crate::bus::rtc::RTC_SAVE_SIZE;
use crate::config::Config;
use crate::GameboyError;

/// The complete emulator's state.
pub struct Emulator<'a> {
	/// The gameboy's processor, owning the bus and the peripherals.
	pub cpu: Cpu<'a>,
	/// The emulator's configuration
	pub config: &'a Config,
}

impl<'a> Emulator<'a> {
	/// Create a new emulator around a loaded cartridge.
	#[inline(always)]
	pub fn new(config: &'a Config, cartridge: &'a mut Cartridge<'a>) -> Self {
		Emulator {
			cpu: Cpu::new(config, cartridge),
			config,
		}
	}

	/// Reset the machine to its post-boot state: register seeds, the
	/// peripherals' boot values, and the boot logo redrawn into VRAM
	/// from the cartridge header.
	pub fn reset(&mut self) -> Result<(), GameboyError> {
		self.cpu.reset();
		self.cpu.mmap.draw_logo()
	}

	/// Run the machine for (at least) the given amount of clock cycles.
	///
	/// Each scheduler step takes the smallest distance to a peripheral
	/// event, lets the cpu run whole instructions through it, and then
	/// advances the peripherals by the cycles the cpu consumed.
	pub fn emulate(&mut self, ticks: usize) -> Result<usize, GameboyError> {
		let mut total: usize = 0;

		while total < ticks {
			let count = self.cpu.mmap.get_cycles().min(ticks - total);
			let consumed = self.cpu.emulate(count)?;

			self.cpu.mmap.process(consumed);
			total += consumed;
		}

		Ok(total)
	}

	/// Run a single instruction, advancing the peripherals in lockstep.
	pub fn emulate_step(&mut self) -> Result<usize, GameboyError> {
		let consumed = self.cpu.execute()?;
		self.cpu.mmap.process(consumed);

		Ok(consumed)
	}

	/// Whether a complete frame has been rendered since the last call.
	pub fn frame_ready(&mut self) -> bool {
		self.cpu.mmap.ppu.frame_ready()
	}

	/// Returns the shade index (0-3) of the given screen pixel.
	pub fn get_pixel(&self, x: usize, y: usize) -> u8 {
		self.cpu.mmap.ppu.get_pixel(x, y)
	}

	/// Writes the rendered screen into a host pixel buffer.
	pub fn flush(&mut self, frame_buffer: &mut [u32]) {
		self.cpu.flush(frame_buffer);
	}

	/// Mix the next chunk of audio into an interleaved stereo buffer.
	pub fn mix_audio(&mut self, buffer: &mut [u8]) {
		self.cpu.mmap.apu.mix_audio(buffer);
	}

	/// Apply the given closure to the game controller.
	pub fn with_controller<F>(&mut self, closure: F)
		where F: FnOnce(&mut dyn Controller) -> () {
		self.cpu.with_controller(closure);
	}

	/// The battery-backed RAM contents, if the cartridge persists them.
	pub fn battery(&self) -> Option<&[u8]> {
		self.cpu.mmap.cartridge.battery()
	}

	/// Serialize the cartridge's clock for a battery save, stamped with
	/// the caller's UNIX timestamp.
	pub fn rtc_save(&self, timestamp: u64) -> Option<[u8; RTC_SAVE_SIZE]> {
		self.cpu.mmap.cartridge.rtc().map(|rtc| rtc.to_bytes(timestamp))
	}

	/// Restore the cartridge's clock from a battery save block.
	/// Returns the timestamp the block was saved at.
	pub fn rtc_restore(&mut self, block: &[u8]) -> Option<Result<u64, GameboyError>> {
		self.cpu.mmap.cartridge.rtc_mut().map(|rtc| rtc.from_bytes(block))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bus::cartridge::consts::*;
	use crate::config::FRAME_CYCLES;
	use alloc::boxed::Box;

	fn with_emulator<F>(callback: F) -> Result<(), GameboyError>
		where F: FnOnce(&mut Emulator) -> Result<(), GameboyError> {
		let config = Config::default();
		let rom = crate::bus::cartridge::tests::empty_rom(0x00);
		let mut ram: Box<[u8]> = Cartridge::make_ram(&rom)?;
		let mut cartridge = Cartridge::new(&rom, &mut ram, true)?;

		let mut emulator = Emulator::new(&config, &mut cartridge);
		emulator.reset()?;

		callback(&mut emulator)
	}

	#[test]
	fn test_logo_tiles_after_reset() -> Result<(), GameboyError> {
		with_emulator(|emulator| {
			// Every logo byte is de-interleaved into two doubled rows,
			// each written twice.
			for index in 0..48_u16 {
				let bits = NINTENDO_LOGO[index as usize];

				let pattern0 = ((bits >> 0) & 0x80) | ((bits >> 1) & 0x60) |
							   ((bits >> 2) & 0x18) | ((bits >> 3) & 0x06) |
							   ((bits >> 4) & 0x01);
				let pattern1 = ((bits << 4) & 0x80) | ((bits << 3) & 0x60) |
							   ((bits << 2) & 0x18) | ((bits << 1) & 0x06) |
							   ((bits << 0) & 0x01);

				let base = 0x8010 + (index << 3);
				assert_eq!(pattern0, emulator.cpu.mmap.read(base)?);
				assert_eq!(pattern0, emulator.cpu.mmap.read(base + 2)?);
				assert_eq!(pattern1, emulator.cpu.mmap.read(base + 4)?);
				assert_eq!(pattern1, emulator.cpu.mmap.read(base + 6)?);
			}

			// The map rows select the logo tiles in order.
			assert_eq!(1, emulator.cpu.mmap.read(0x9904)?);
			assert_eq!(13, emulator.cpu.mmap.read(0x9924)?);
			assert_eq!(25, emulator.cpu.mmap.read(0x9910)?);

			Ok(())
		})
	}

	#[test]
	fn test_post_boot_register_seeds() -> Result<(), GameboyError> {
		use crate::cpu::state::registers::Register;

		with_emulator(|emulator| {
			assert_eq!(0x01B0, emulator.cpu.registers.get(Register::AF));
			assert_eq!(0x0013, emulator.cpu.registers.get(Register::BC));
			assert_eq!(0x00D8, emulator.cpu.registers.get(Register::DE));
			assert_eq!(0x014D, emulator.cpu.registers.get(Register::HL));
			assert_eq!(0xFFFE, emulator.cpu.registers.get(Register::SP));
			assert_eq!(0x0100, emulator.cpu.registers.get(Register::PC));

			assert_eq!(0x91, emulator.cpu.mmap.read(0xFF40)?);
			assert_eq!(0xFC, emulator.cpu.mmap.read(0xFF47)?);

			Ok(())
		})
	}

	#[test]
	fn test_one_vblank_request_per_frame() -> Result<(), GameboyError> {
		with_emulator(|emulator| {
			// The test image parks the cpu in its entry loop while the
			// lcd raises a single vertical blank per frame.
			emulator.emulate(FRAME_CYCLES)?;

			assert_ne!(0, emulator.cpu.mmap.interrupt_flag & 0x01);
			assert!(emulator.frame_ready());

			emulator.cpu.mmap.interrupt_flag = 0;
			emulator.emulate(FRAME_CYCLES)?;

			assert_ne!(0, emulator.cpu.mmap.interrupt_flag & 0x01);

			Ok(())
		})
	}

	#[test]
	fn test_emulate_consumes_at_least_the_budget() -> Result<(), GameboyError> {
		with_emulator(|emulator| {
			let consumed = emulator.emulate(1000)?;
			assert!(consumed >= 1000);

			// Single steps advance by whole instructions.
			let step = emulator.emulate_step()?;
			assert!(step >= 4);

			Ok(())
		})
	}
}
