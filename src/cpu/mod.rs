// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
//! Gameboy's processor emulation.

pub mod alu;
pub mod state;
pub mod decode;
pub mod interrupts;
pub mod instructions;

use num::PrimInt;
use core::mem::size_of;
use core::ops::{AddAssign, Shl};

use state::*;
use state::registers::*;
use instructions::{Instruction, enter_interrupt};

use crate::GameboyError;
use crate::config::Config;
use crate::bus::joypad::Controller;

use crate::bus::*;
use crate::bus::cartridge::*;
use crate::cpu::interrupts::*;

/// The gameboy's processor.
pub struct Cpu<'a> {
	/// The cpu's registers.
	pub registers: CpuState<'a>,
	/// The devices' memory mapping
	pub mmap: SystemBus<'a>,
	/// The emulator's configuration
	pub config: &'a Config,

	/// Set while the cpu sleeps on a halt instruction.
	halting: bool,
	/// Set while the cpu sleeps on a stop instruction; only a joypad
	/// interrupt request wakes it.
	stopped: bool,
	/// If we halt the cpu when interrupts are disabled and one is already
	/// pending, the original cpu had a bug in which it fetches the byte
	/// after the halt twice.
	halt_bug: bool,
	/// The processor has a delay of a single instruction after EI before
	/// actually enabling interrupts.
	ime_delay: bool,
}

impl<'a> Cpu<'a> {
	/// Initializes a new virtual cpu
	#[inline(always)]
	pub fn new(config: &'a Config, cartridge: &'a mut Cartridge<'a>) -> Self {
		Cpu {
			registers: CpuState::new(config),
			mmap: SystemBus::new(config, cartridge),
			config,
			halting: false,
			stopped: false,
			halt_bug: false,
			ime_delay: false,
		}
	}

	/// Reset the cpu and every peripheral to post-boot state.
	pub fn reset(&mut self) {
		self.registers.reset();
		self.mmap.reset(self.config);
		self.halting = false;
		self.stopped = false;
		self.halt_bug = false;
		self.ime_delay = false;
	}

	/// Halt the cpu until an interrupt is requested.
	pub fn halt(&mut self) {
		let pending = self.mmap.interrupt_flag &
					  self.mmap.interrupt_enable & INTERRUPT_BITS;

		if self.registers.ime() || self.ime_delay || pending == 0 {
			self.halting = true;
		} else {
			// Halt bug: the halt is skipped and the following byte
			// is fetched twice.
			self.halt_bug = true;
		}
	}

	/// Stop the cpu until a joypad interrupt is requested.
	pub fn stop(&mut self) {
		self.stopped = true;
	}

	/// Enable interrupts with a delay of a single instruction.
	pub fn toggle_ime_delayed(&mut self) {
		self.ime_delay = true;
	}

	/// Disable interrupts, cancelling a not-yet-effective EI.
	pub fn disable_interrupts(&mut self) {
		self.registers.set_ime(false);
		self.ime_delay = false;
	}

	/// Apply the given closure to the game controller.
	pub fn with_controller<F>(&mut self, closure: F)
		where F: FnOnce(&mut dyn Controller) -> () {
			closure(&mut self.mmap.joypad);
	}

	/// Reads the next instruction bytes and increments the program counter appropriately.
	///
	/// The function works in little-endian, that is, when reading 2 bytes,
	/// the first byte will be the least-significant one.
	pub fn fetch<T: PrimInt + AddAssign + Shl<Output=T>>(&mut self) -> Result<T, GameboyError> {
		let mut result: T = num::cast(0).unwrap();

		for i in 0..size_of::<T>() {
			// Read the next byte.
			let pc: u16 = self.registers.get(Register::PC);
			let data: T = num::cast::<u8, T>(self.mmap.read(pc)?).unwrap();

			// We're using little-endianity.
			result += data << num::cast::<usize, T>(8 * i).unwrap();

			if self.halt_bug {
				// The halt bug prevents the program counter from being incremented once.
				self.halt_bug = false;
			} else {
				// Move the PC forward.
				self.registers.set(Register::PC, pc.wrapping_add(1));
			}
		}

		Ok(result)
	}

	/// Writes the display's data to the given frame buffer.
	pub fn flush(&mut self, frame_buffer: &mut [u32]) {
		self.mmap.ppu.flush(frame_buffer);
	}

	/// Emulates the execution of a single instruction, entering a pending
	/// interrupt first if the master enable allows it.
	///
	/// Returns the number of clock cycles taken.
	pub fn execute(&mut self) -> Result<usize, GameboyError> {
		let pending_ei = self.ime_delay;

		// Enter an interrupt if any (and if interrupts are enabled).
		let mut num_cycles = self.handle_interrupts()?;

		if !self.halting && !self.stopped {
			num_cycles += self.execute_single()?;
		} else {
			// The sleeping cpu still consumes time in its idle loop.
			num_cycles += 4;
		}

		// EI takes effect after the instruction that follows it.
		if pending_ei && self.ime_delay {
			self.registers.set_ime(true);
			self.ime_delay = false;
		}

		Ok(num_cycles)
	}

	/// Runs whole instructions until at least the given amount of cycles
	/// has been consumed, and returns the consumed amount.
	pub fn emulate(&mut self, cycles: usize) -> Result<usize, GameboyError> {
		let mut consumed: usize = 0;

		while consumed < cycles {
			consumed += self.execute()?;
		}

		Ok(consumed)
	}

	/// Emulates the execution of a single instruction.
	///
	/// Returns the number of clock cycles the instruction has taken.
	pub fn execute_single(&mut self) -> Result<usize, GameboyError> {
		let _address: u16 = self.registers.get(Register::PC);

		// Fetch the opcode from the memory.
		let opcode: u8 = self.fetch()?;

		#[cfg(feature = "debug")]
		{
			println!("0x{:04x}: (0x{:02x})", _address, opcode);
		}

		// Decode the given opcode.
		let insn: Instruction = self.decode(opcode)?;

		// Execute and return the number of cycles taken.
		Ok(insn(self)?)
	}

	fn handle_interrupts(&mut self) -> Result<usize, GameboyError> {
		let pending = self.mmap.interrupt_flag &
					  self.mmap.interrupt_enable & INTERRUPT_BITS;

		// A pending interrupt wakes a halted cpu even when the master
		// enable is off; in that case it is not serviced.
		if self.halting && pending != 0 {
			self.halting = false;
		}

		// Stop mode only ends on joypad input.
		if self.stopped &&
		   self.mmap.interrupt_flag & Interrupt::Joypad.value() != 0 {
			self.stopped = false;
		}

		if !self.registers.ime() {
			return Ok(0);
		}

		if let Some(interrupt) = self.mmap.fetch_interrupt() {
			self.halting = false;

			return enter_interrupt(self, interrupt.vector());
		}

		Ok(0)
	}
}

#[cfg(test)]
#[cfg(feature = "alloc")]
#[allow(missing_docs)]
pub mod tests {
	use super::*;
	use alloc::boxed::Box;

	/// With-closure for running logic with an initialized cpu instance.
	pub fn with_cpu<F>(callback: F) -> Result<(), GameboyError>
		where F: FnOnce(&mut Cpu) -> Result<(), GameboyError> {
		// Initialize the cpu
		let config = Config::default();
		let rom = cartridge::tests::empty_rom(0x13 /* MBC3+RAM+BATTERY */);
		let mut ram: Box<[u8]> = Cartridge::make_ram(&rom)?;
		let mut cartridge = Cartridge::new(&rom, &mut ram, true)?;

		let mut cpu = Cpu::new(&config, &mut cartridge);

		callback(&mut cpu)
	}

	#[test]
	fn test_fetch() -> Result<(), GameboyError> {
		with_cpu(|cpu| {
			// Move the program counter to the RAM bank.
			cpu.registers.set(Register::PC, 0xA000);

			// Write arbitrary data to the memory starting from the program counter.
			let data: &[u8] = &[1, 2, 3];
			cpu.mmap.cartridge.set_ram_enabled(true);
			cpu.mmap.write_all(cpu.registers.get(Register::PC), data)?;

			// Make sure that fetch works as expected.
			assert!(cpu.fetch::<u16>()? == 0x0201);
			assert!(cpu.fetch::<u8>()? == 0x03);

			Ok(())
		})
	}

	#[test]
	fn test_interrupt_priority() -> Result<(), GameboyError> {
		with_cpu(|cpu| {
			// Request and enable every interrupt source at once.
			cpu.mmap.interrupt_flag = 0x1F;
			cpu.mmap.interrupt_enable = 0x1F;
			cpu.registers.set_ime(true);

			cpu.execute()?;

			// V-Blank wins, and only its request bit is consumed.
			assert_eq!(0x1E, cpu.mmap.interrupt_flag);
			assert!(!cpu.registers.ime());

			// The pushed return address is the reset entry point.
			let sp = cpu.registers.get(Register::SP);
			let low = cpu.mmap.read(sp)? as u16;
			let high = cpu.mmap.read(sp.wrapping_add(1))? as u16;
			assert_eq!(0x0100, (high << 8) | low);

			// The nop at the vector has already run.
			assert_eq!(0x41, cpu.registers.get(Register::PC));

			Ok(())
		})
	}

	#[test]
	fn test_halt_wakes_without_dispatch() -> Result<(), GameboyError> {
		with_cpu(|cpu| {
			cpu.registers.set(Register::PC, 0xA000);
			cpu.mmap.cartridge.set_ram_enabled(true);
			cpu.mmap.write_all(0xA000, &[/* halt */ 0x76])?;

			cpu.mmap.interrupt_enable = 0x01;
			cpu.mmap.interrupt_flag = 0x00;

			// Enter halt; nothing is pending, so the cpu sleeps.
			cpu.execute()?;
			cpu.execute()?;
			assert_eq!(0xA001, cpu.registers.get(Register::PC));

			// A request wakes the cpu, but with IME off nothing is serviced.
			cpu.mmap.interrupt_flag = 0x01;
			cpu.execute()?;

			assert_eq!(0xA002, cpu.registers.get(Register::PC));
			assert_eq!(0x01, cpu.mmap.interrupt_flag);

			Ok(())
		})
	}

	#[test]
	fn test_halt_bug_replays_byte() -> Result<(), GameboyError> {
		with_cpu(|cpu| {
			cpu.registers.set(Register::PC, 0xA000);
			cpu.mmap.cartridge.set_ram_enabled(true);
			cpu.mmap.write_all(0xA000, &[/* halt  */ 0x76,
										 /* inc B */ 0x04])?;

			// An already-pending interrupt with IME off triggers the bug.
			cpu.mmap.interrupt_enable = 0x01;
			cpu.mmap.interrupt_flag = 0x01;
			cpu.registers.set(Register::B, 0);

			cpu.execute()?;
			cpu.execute()?;
			cpu.execute()?;

			// The inc ran twice off a single byte.
			assert_eq!(2, cpu.registers.get(Register::B));
			assert_eq!(0xA002, cpu.registers.get(Register::PC));

			Ok(())
		})
	}

	#[test]
	fn test_ei_delays_one_instruction() -> Result<(), GameboyError> {
		with_cpu(|cpu| {
			cpu.registers.set(Register::PC, 0xA000);
			cpu.mmap.cartridge.set_ram_enabled(true);
			cpu.mmap.write_all(0xA000, &[/* ei  */ 0xfb,
										 /* nop */ 0x00])?;

			cpu.mmap.interrupt_enable = 0x01;
			cpu.mmap.interrupt_flag = 0x01;

			// ei itself does not dispatch.
			cpu.execute()?;
			assert_eq!(0xA001, cpu.registers.get(Register::PC));

			// Neither does the instruction right after it.
			cpu.execute()?;
			assert_eq!(0xA002, cpu.registers.get(Register::PC));
			assert!(cpu.registers.ime());

			// The interrupt enters afterwards.
			cpu.execute()?;
			assert_eq!(0x41, cpu.registers.get(Register::PC));

			Ok(())
		})
	}

	#[test]
	fn test_stat_write_blocks_on_coincidence() -> Result<(), GameboyError> {
		with_cpu(|cpu| {
			cpu.registers.set(Register::PC, 0xA000);
			cpu.mmap.cartridge.set_ram_enabled(true);

			// LY and LYC both sit at zero after reset; the program
			// itself enables the coincidence check mid-batch.
			let data: &[u8] = &[/* ld A, 0x48    */ 0x3e, 0x48,
								/* ldh (0x41), A */ 0xe0, 0x41,
								/* nop           */ 0x00];
			cpu.mmap.write_all(0xA000, data)?;

			cpu.mmap.interrupt_enable = 0x02;
			cpu.registers.set_ime(true);

			// Run one scheduler batch; the peripherals are not
			// processed anywhere inside it.
			cpu.emulate(24)?;

			// The request was serviced on the instruction boundary
			// right after the store, not at the end of the batch: the
			// nop at 0xA004 never ran, the one at the vector did.
			assert_eq!(0x49, cpu.registers.get(Register::PC));
			assert!(!cpu.registers.ime());

			Ok(())
		})
	}
}
