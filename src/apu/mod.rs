// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
//! Gameboy's four-channel sound unit.
//!
//! Synthesis runs against the host's sample rate: each channel owns a
//! phase accumulator whose per-sample increment comes from a table
//! precomputed at construction. The slower units (length, envelope and
//! sweep) tick on a 256 Hz synthesizer clock that the mixer advances
//! with a fixed train of samples-per-tick counts.

pub mod wave;
pub mod noise;
pub mod square;

use super::bus::Memory;
use super::bus::memory_range::*;

use crate::make_range;
use crate::memory_range;
use crate::GameboyError;
use crate::config::{Config, GAMEBOY_CLOCK};

use wave::WaveChannel;
use noise::NoiseGenerator;
use square::SquareChannel;

/// Sound registers-related constants.
#[allow(missing_docs)]
pub mod consts {
	use super::*;

	pub const IO_NR10: u16 = 0xFF10;
	pub const IO_NR11: u16 = 0xFF11;
	pub const IO_NR12: u16 = 0xFF12;
	pub const IO_NR13: u16 = 0xFF13;
	pub const IO_NR14: u16 = 0xFF14;
	pub const IO_NR21: u16 = 0xFF16;
	pub const IO_NR22: u16 = 0xFF17;
	pub const IO_NR23: u16 = 0xFF18;
	pub const IO_NR24: u16 = 0xFF19;
	pub const IO_NR30: u16 = 0xFF1A;
	pub const IO_NR31: u16 = 0xFF1B;
	pub const IO_NR32: u16 = 0xFF1C;
	pub const IO_NR33: u16 = 0xFF1D;
	pub const IO_NR34: u16 = 0xFF1E;
	pub const IO_NR41: u16 = 0xFF20;
	pub const IO_NR42: u16 = 0xFF21;
	pub const IO_NR43: u16 = 0xFF22;
	pub const IO_NR44: u16 = 0xFF23;
	pub const IO_NR50: u16 = 0xFF24;
	pub const IO_NR51: u16 = 0xFF25;
	pub const IO_NR52: u16 = 0xFF26;

	/// The wave channel's pattern memory.
	pub const MMAP_WAVE_RAM: MemoryRange = make_range!(0xFF30, 0xFF3F);

	/// The synthesizer clock rate driving length, envelope and sweep.
	pub const SOUND_CLOCK: u32 = 256;

	/// Length of the samples-per-tick train; 64 entries are enough to
	/// spread the common host rates evenly.
	pub const TRAIN_LENGTH: usize = 64;
}

use consts::*;

/// Per-period phase increments for the square and wave channels.
///
/// Entry `n` represents 131072/(2048-n) Hz scaled to the host sample
/// rate, in units of a 32-step waveform spanning bits 22-26.
pub type FrequencyTable = [u32; 2048];

/// The sound unit and its stereo mixer.
pub struct Apu {
	channel1: SquareChannel,
	channel2: SquareChannel,
	channel3: WaveChannel,
	channel4: NoiseGenerator,

	/// Master volume register (NR50).
	output_level: u8,
	/// Terminal routing register (NR51).
	output_terminal: u8,
	/// Power switch register (NR52).
	output_enable: u8,

	frequency_table: FrequencyTable,
	/// Samples emitted per synthesizer-clock tick, cycled in order.
	cycle_samples: [u32; TRAIN_LENGTH],
	/// Clock budget carried between mix calls.
	spare_cycles: i32,
}

impl Apu {
	/// Initialize a new sound unit against the configured sample rate.
	pub fn new(config: &Config) -> Self {
		let mut apu = Apu {
			channel1: SquareChannel::new(0, true),
			channel2: SquareChannel::new(1, false),
			channel3: WaveChannel::new(),
			channel4: NoiseGenerator::new(config.sample_rate),
			output_level: 0,
			output_terminal: 0,
			output_enable: 0,
			frequency_table: Self::generate_frequency_table(config.sample_rate),
			cycle_samples: Self::generate_sample_train(config.sample_rate),
			spare_cycles: 0,
		};

		apu.reset();

		apu
	}

	/// Precompute the period-to-phase-increment mapping. Periods too
	/// fast to represent (a full waveform per sample or more) map to
	/// zero.
	pub(crate) fn generate_frequency_table(sample_rate: u32) -> FrequencyTable {
		let mut table = [0_u32; 2048];

		for (period, entry) in table.iter_mut().enumerate() {
			let skip = ((GAMEBOY_CLOCK as u64) << 22) /
					   ((2048 - period) as u64 * sample_rate as u64);

			if skip < (32 << 22) {
				*entry = skip as u32;
			}
		}

		table
	}

	/// Build the samples-per-tick train whose running average tracks
	/// `sample_rate / SOUND_CLOCK` exactly.
	fn generate_sample_train(sample_rate: u32) -> [u32; TRAIN_LENGTH] {
		let mut train = [sample_rate / SOUND_CLOCK; TRAIN_LENGTH];
		let mut total: u32 = 0;

		for index in 0..TRAIN_LENGTH {
			total += train[index];

			// Top up whenever the average falls short of the ratio.
			if total * SOUND_CLOCK < sample_rate * (index as u32 + 1) {
				train[index] += 1;
				total += 1;
			}
		}

		train
	}

	/// Reset the sound unit to boot state.
	pub fn reset(&mut self) {
		self.channel1.reset(&self.frequency_table);
		self.channel2.reset(&self.frequency_table);
		self.channel3.reset(&self.frequency_table);
		self.channel4.reset();

		self.set_output_level(0x00);
		self.set_output_terminal(0xF0);
		self.set_output_enable(0xFF);
		self.spare_cycles = 0;
	}

	/// Mix the next chunk of audio into an interleaved stereo buffer of
	/// unsigned 8-bit samples.
	///
	/// Every frame advances each channel's phase by one sample; the
	/// synthesizer clock ticks according to the precomputed train, with
	/// the leftover budget carried into the next call.
	pub fn mix_audio(&mut self, buffer: &mut [u8]) {
		if self.output_enable & 0x80 == 0 {
			for byte in buffer.iter_mut() {
				*byte = 0;
			}
			return;
		}

		let mut clock = self.spare_cycles;
		let mut train_index = 0;

		for frame in 0..buffer.len() / 2 {
			let mut left: i32 = 0;
			let mut right: i32 = 0;

			clock -= 1;
			let do_cycle = clock <= 0;
			if do_cycle {
				clock += self.cycle_samples[train_index] as i32;
				train_index = (train_index + 1) % TRAIN_LENGTH;

				self.channel1.update_audio(&self.frequency_table);
				self.channel2.update_audio(&self.frequency_table);
				self.channel3.update_audio();
				self.channel4.update_audio();
			}

			if self.channel1.enabled() {
				let (l, r) = self.channel1.next_samples(self.output_terminal);
				left += l;
				right += r;
			}
			if self.channel2.enabled() {
				let (l, r) = self.channel2.next_samples(self.output_terminal);
				left += l;
				right += r;
			}
			if self.channel3.enabled() {
				let (l, r) = self.channel3.next_samples(self.output_terminal);
				left += l;
				right += r;
			}
			if self.channel4.enabled() {
				let (l, r) = self.channel4.next_samples(self.output_terminal);
				left += l;
				right += r;
			}

			// The summed contributions wrap into an unsigned byte.
			buffer[frame * 2] = left as u8;
			buffer[frame * 2 + 1] = right as u8;
		}

		self.spare_cycles = clock;
	}

	/// The master volume register.
	pub fn get_output_level(&self) -> u8 {
		self.output_level
	}

	/// The terminal routing register.
	pub fn get_output_terminal(&self) -> u8 {
		self.output_terminal
	}

	/// The power register, with the live channel-enabled flags in its
	/// low bits.
	pub fn get_output_enable(&self) -> u8 {
		let mut status = 0x70 | (self.output_enable & 0x80);

		if self.channel1.enabled() { status |= 0x01; }
		if self.channel2.enabled() { status |= 0x02; }
		if self.channel3.enabled() { status |= 0x04; }
		if self.channel4.enabled() { status |= 0x08; }

		status
	}

	/// Set the master volume register.
	pub fn set_output_level(&mut self, data: u8) {
		self.output_level = data;
	}

	/// Set the terminal routing register.
	pub fn set_output_terminal(&mut self, data: u8) {
		self.output_terminal = data;
	}

	/// Set the power register; switching off silences every channel.
	pub fn set_output_enable(&mut self, data: u8) {
		self.output_enable = (self.output_enable & 0x7F) | (data & 0x80);

		if self.output_enable & 0x80 == 0 {
			self.channel1.disable();
			self.channel2.disable();
			self.channel3.disable();
			self.channel4.disable();
		}
	}
}

impl Memory for Apu {
	fn write(&mut self, address: u16, value: u8) -> Result<(), GameboyError> {
		// While powered off only the power switch and the pattern
		// memory respond.
		if self.output_enable & 0x80 == 0 && address != IO_NR52 {
			match address {
				memory_range!(MMAP_WAVE_RAM) => {}
				_ => return Ok(()),
			}
		}

		match address {
			IO_NR10 => self.channel1.set_sweep(value),
			IO_NR11 => self.channel1.set_length(value),
			IO_NR12 => self.channel1.set_envelope(value),
			IO_NR13 => self.channel1.set_frequency(&self.frequency_table, value),
			IO_NR14 => self.channel1.set_playback(&self.frequency_table, value),

			IO_NR21 => self.channel2.set_length(value),
			IO_NR22 => self.channel2.set_envelope(value),
			IO_NR23 => self.channel2.set_frequency(&self.frequency_table, value),
			IO_NR24 => self.channel2.set_playback(&self.frequency_table, value),

			IO_NR30 => self.channel3.set_enable(value),
			IO_NR31 => self.channel3.set_length(value),
			IO_NR32 => self.channel3.set_level(value),
			IO_NR33 => self.channel3.set_frequency(&self.frequency_table, value),
			IO_NR34 => self.channel3.set_playback(&self.frequency_table, value),

			IO_NR41 => self.channel4.set_length(value),
			IO_NR42 => self.channel4.set_envelope(value),
			IO_NR43 => self.channel4.set_polynomial(value),
			IO_NR44 => self.channel4.set_playback(value),

			IO_NR50 => self.set_output_level(value),
			IO_NR51 => self.set_output_terminal(value),
			IO_NR52 => self.set_output_enable(value),

			memory_range!(MMAP_WAVE_RAM) => {
				self.channel3.set_wave_pattern(address, value);
			}

			// The gaps between the sound registers are not wired.
			_ => {}
		}

		Ok(())
	}

	fn read(&self, address: u16) -> Result<u8, GameboyError> {
		let result = match address {
			IO_NR10 => self.channel1.get_sweep(),
			IO_NR11 => self.channel1.get_length(),
			IO_NR12 => self.channel1.get_envelope(),
			IO_NR13 => self.channel1.get_frequency(),
			IO_NR14 => self.channel1.get_playback(),

			IO_NR21 => self.channel2.get_length(),
			IO_NR22 => self.channel2.get_envelope(),
			IO_NR23 => self.channel2.get_frequency(),
			IO_NR24 => self.channel2.get_playback(),

			IO_NR30 => self.channel3.get_enable(),
			IO_NR31 => self.channel3.get_length(),
			IO_NR32 => self.channel3.get_level(),
			IO_NR33 => self.channel3.get_frequency(),
			IO_NR34 => self.channel3.get_playback(),

			IO_NR41 => self.channel4.get_length(),
			IO_NR42 => self.channel4.get_envelope(),
			IO_NR43 => self.channel4.get_polynomial(),
			IO_NR44 => self.channel4.get_playback(),

			IO_NR50 => self.get_output_level(),
			IO_NR51 => self.get_output_terminal(),
			IO_NR52 => self.get_output_enable(),

			memory_range!(MMAP_WAVE_RAM) => {
				self.channel3.get_wave_pattern(address)
			}

			_ => 0xFF,
		};

		Ok(result)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fresh() -> Apu {
		Apu::new(&Config::default())
	}

	#[test]
	fn test_sample_train_average() {
		let train = Apu::generate_sample_train(44_100);

		let total: u32 = train.iter().sum();
		let target = 44_100 * TRAIN_LENGTH as u32;

		// The train's sum approximates 64 ticks of the exact ratio to
		// within one sample per tick.
		assert!(total * SOUND_CLOCK >= target);
		assert!((total - TRAIN_LENGTH as u32) * SOUND_CLOCK < target);
	}

	#[test]
	fn test_frequency_table_scaling() {
		let table = Apu::generate_frequency_table(44_100);

		// 440Hz-ish period: 2048 - 131072/440 = 1750.
		// One waveform is 32 steps of 1 << 22.
		let samples_per_wave = (32_u64 << 22) / table[1750] as u64;
		let hz = 44_100 / samples_per_wave as u32;
		assert!(hz >= 435 && hz <= 445);

		// Out-of-range periods are muted.
		assert_eq!(0, table[2047]);
	}

	#[test]
	fn test_mix_fills_whole_buffer() {
		let mut apu = fresh();

		let mut buffer = [0xAA_u8; 512];
		apu.mix_audio(&mut buffer);

		// Silent channels mix to the unsigned zero level everywhere.
		assert!(buffer.iter().all(|&byte| byte == 0));
	}

	#[test]
	fn test_mix_carries_clock_budget() {
		let mut apu = fresh();

		// 44100 / 256 is about 172 samples per tick; a short buffer
		// leaves part of the tick budget for the next call.
		let longest = *apu.cycle_samples.iter().max().unwrap() as i32;

		let mut buffer = [0_u8; 200];
		apu.mix_audio(&mut buffer);

		assert!(apu.spare_cycles > 0 && apu.spare_cycles <= longest);

		// A second call keeps draining the same budget.
		let first = apu.spare_cycles;
		apu.mix_audio(&mut buffer);
		assert_ne!(first, apu.spare_cycles);
	}

	#[test]
	fn test_power_off_silences_and_gates_writes() -> Result<(), GameboyError> {
		let mut apu = fresh();

		// Start the first square channel.
		apu.write(IO_NR12, 0xF0)?;
		apu.write(IO_NR14, 0x80)?;
		assert_ne!(0, apu.read(IO_NR52)? & 0x01);

		// Power off: status clears and registers stop responding.
		apu.write(IO_NR52, 0x00)?;
		assert_eq!(0x70, apu.read(IO_NR52)?);

		apu.write(IO_NR14, 0x80)?;
		assert_eq!(0x70, apu.read(IO_NR52)?);

		let mut buffer = [0xAA_u8; 16];
		apu.mix_audio(&mut buffer);
		assert!(buffer.iter().all(|&byte| byte == 0));

		// Power back on; triggering works again.
		apu.write(IO_NR52, 0x80)?;
		apu.write(IO_NR12, 0xF0)?;
		apu.write(IO_NR14, 0x80)?;
		assert_ne!(0, apu.read(IO_NR52)? & 0x01);

		Ok(())
	}

	#[test]
	fn test_wave_ram_round_trip() -> Result<(), GameboyError> {
		let mut apu = fresh();

		for offset in 0..16_u16 {
			apu.write(0xFF30 + offset, offset as u8 * 0x11)?;
		}
		for offset in 0..16_u16 {
			assert_eq!(offset as u8 * 0x11, apu.read(0xFF30 + offset)?);
		}

		Ok(())
	}

	#[test]
	fn test_routing_registers_round_trip() -> Result<(), GameboyError> {
		let mut apu = fresh();

		apu.write(IO_NR50, 0x53)?;
		apu.write(IO_NR51, 0xA5)?;

		assert_eq!(0x53, apu.read(IO_NR50)?);
		assert_eq!(0xA5, apu.read(IO_NR51)?);

		Ok(())
	}

	#[test]
	fn test_enabled_channel_reaches_the_mix() -> Result<(), GameboyError> {
		let mut apu = fresh();

		// Square 1 at full volume, slow period, routed everywhere.
		apu.write(IO_NR51, 0xFF)?;
		apu.write(IO_NR10, 0x00)?;
		apu.write(IO_NR12, 0xF0)?;
		apu.write(IO_NR13, 0x00)?;
		apu.write(IO_NR14, 0x84)?;

		let mut buffer = [0_u8; 64];
		apu.mix_audio(&mut buffer);

		assert!(buffer.iter().any(|&byte| byte != 0));

		Ok(())
	}
}
