// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
//! A reference emulator frontend using the core library: a minifb
//! window for video and input, and a rodio stream for audio.

extern crate minifb;
extern crate rodio;

use std::fs;
use std::env;
use std::fmt;
use std::process;
use std::vec::Vec;
use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use std::sync::mpsc::{sync_channel, Receiver};

use minifb::{Key, Window, WindowOptions};
use rodio::{OutputStream, Source};

use dmg_core::GameboyError;
use dmg_core::bus::joypad;
use dmg_core::bus::cartridge::*;
use dmg_core::config::{Config, GAMEBOY_CLOCK};
use dmg_core::emulator::Emulator;

const WIDTH: usize = 160;
const HEIGHT: usize = 144;

// About 64 to make sure we have a clean distribution of about
// 64 frames per second
const FPS: usize = 64;

enum EmulatorError {
    Std(std::io::Error),
    Gameboy(GameboyError),
}

impl From<std::io::Error> for EmulatorError {
    fn from(e: std::io::Error) -> Self {
        EmulatorError::Std(e)
    }
}

impl From<GameboyError> for EmulatorError {
    fn from(e: GameboyError) -> Self {
        EmulatorError::Gameboy(e)
    }
}

impl fmt::Debug for EmulatorError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			EmulatorError::Std(ref err) => err.fmt(f),
            EmulatorError::Gameboy(ref err) => err.fmt(f),
        }
	}
}

/// The audio stream's producer side lives on the main loop; the rodio
/// mixer thread drains it, playing silence on underrun.
struct StreamSource {
	rx: Receiver<u8>,
	sample_rate: u32,
}

impl Iterator for StreamSource {
	type Item = f32;

	fn next(&mut self) -> Option<f32> {
		// The mixer's bytes are wrapped signed sums around zero.
		let sample = self.rx.try_recv().unwrap_or(0);
		Some((sample as i8) as f32 / 128.0)
	}
}

impl Source for StreamSource {
	fn current_frame_len(&self) -> Option<usize> {
		None
	}

	fn channels(&self) -> u16 {
		2
	}

	fn sample_rate(&self) -> u32 {
		self.sample_rate
	}

	fn total_duration(&self) -> Option<Duration> {
		None
	}
}

// Maps minifb keys to emulator keys.
fn map_input_key(key: &Key) -> joypad::Key {
	match key {
		Key::Right => joypad::Key::Right,
		Key::Left => joypad::Key::Left,
		Key::Down => joypad::Key::Down,
		Key::Up => joypad::Key::Up,
		Key::Z => joypad::Key::A,
		Key::X => joypad::Key::B,
		Key::Space => joypad::Key::Select,
		Key::Enter => joypad::Key::Start,
		_ => panic!("Received an unexpected key.")
	}
}

fn update_key_state(emulator: &mut Emulator, window: &Window) {
	for key in [Key::Right, Key::Left, Key::Down, Key::Up, Key::Z, Key::X, Key::Space, Key::Enter].iter() {
		let emulator_key = map_input_key(key);
		let key_down: bool = window.is_key_down(*key);

		if key_down {
			emulator.with_controller(|joypad| joypad.down(emulator_key))
		} else {
			emulator.with_controller(|joypad| joypad.up(emulator_key))
		}
	}
}

fn unix_time() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|elapsed| elapsed.as_secs())
		.unwrap_or(0)
}

fn main() {
	env_logger::init();

	let args: Vec<String> = env::args().collect();
	if args.len() < 2 {
		eprintln!("usage: {} <rom>", args[0]);
		process::exit(1);
	}

	let rom: Box<[u8]> = match fs::read(&args[1]) {
		Ok(data) => data.into(),
		Err(err) => {
			eprintln!("{}: {}", args[1], err);
			process::exit(1);
		}
	};

	if let Err(err) = run(&args[1], &rom) {
		eprintln!("{:?}", err);
		process::exit(1);
	}
}

fn run(rom_path: &str, rom: &[u8]) -> Result<(), EmulatorError> {
	let config = Config::default();
	let save_path = Path::new(rom_path).with_extension("sav");

	// Load the cartridge, restoring a previous battery save if any.
	let mut ram: Box<[u8]> = Cartridge::make_ram(rom)?;
	let save = fs::read(&save_path).ok();

	if let Some(ref data) = save {
		let length = ram.len().min(data.len());
		ram[..length].copy_from_slice(&data[..length]);
	}

	let mut cartridge = Cartridge::new(rom, &mut ram, config.verify_cartridge)?;

	let mut window = Window::new(
        "dmg",
        WIDTH,
        HEIGHT,
        WindowOptions::default(),
    ).unwrap_or_else(|e| { panic!("{}", e); });

	// Initialize the audio output; a missing device only disables sound.
	let (audio_tx, audio_rx) = sync_channel::<u8>(config.sample_rate as usize);
	let stream = OutputStream::try_default();
	match stream {
		Ok((ref _stream, ref handle)) => {
			let source = StreamSource {
				rx: audio_rx,
				sample_rate: config.sample_rate,
			};
			if let Err(err) = handle.play_raw(source) {
				eprintln!("audio disabled: {}", err);
			}
		}
		Err(ref err) => {
			eprintln!("audio disabled: {}", err);
		}
	}

	let mut emulator = Emulator::new(&config, &mut cartridge);
	emulator.reset()?;

	// Restore the clock from the save's trailing block.
	if let Some(ref data) = save {
		let ram_length = emulator.battery().map(|ram| ram.len()).unwrap_or(0);
		if data.len() > ram_length {
			let _ = emulator.rtc_restore(&data[ram_length..]);
		}
	}

	let mut frame_buffer: Vec<u32> = vec![0; WIDTH * HEIGHT];
	let mut audio_chunk = vec![0_u8; (config.sample_rate as usize / FPS) * 2];
	let frame_budget = Duration::from_micros(1_000_000 / FPS as u64);

	while window.is_open() && !window.is_key_down(Key::Escape) {
		let frame_start = Instant::now();

		// Come back to this point every 1/FPS seconds.
		emulator.emulate(GAMEBOY_CLOCK / FPS)?;

		if emulator.frame_ready() {
			emulator.flush(&mut frame_buffer);
		}
		window.update_with_buffer(&frame_buffer, WIDTH, HEIGHT).unwrap();

		update_key_state(&mut emulator, &window);

		// Hand this frame's worth of samples to the audio thread; a
		// full queue just drops them.
		emulator.mix_audio(&mut audio_chunk);
		for sample in audio_chunk.iter() {
			let _ = audio_tx.try_send(*sample);
		}

		if let Some(left) = frame_budget.checked_sub(frame_start.elapsed()) {
			sleep(left);
		}
	}

	// Persist the battery-backed RAM (and the clock) on the way out.
	if let Some(battery) = emulator.battery() {
		let mut data = battery.to_vec();
		if let Some(block) = emulator.rtc_save(unix_time()) {
			data.extend_from_slice(&block);
		}
		fs::write(&save_path, &data)?;
	}

	Ok(())
}
