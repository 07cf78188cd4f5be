//! Standalone MIDI file player.
//!
//! Parses a Standard MIDI File, binds it to the synthesis engine, and
//! streams the engine's unsigned 8-bit output to a cpal device.
//!
//! Usage: `synth-standalone <file.mid> [--device <name>]`

mod smf;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, StreamConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use synth_core::{EventSource, MidiPlayer, SAMPLE_RATE};

use smf::SmfSource;

fn main() {
  env_logger::init();
  if let Err(err) = run() {
    log::error!("{err}");
    std::process::exit(1);
  }
}

fn usage() -> String {
  "usage: synth-standalone <file.mid> [--device <name>]".to_string()
}

fn run() -> Result<(), String> {
  let mut path: Option<String> = None;
  let mut device_name: Option<String> = None;
  let mut args = std::env::args().skip(1);
  while let Some(arg) = args.next() {
    match arg.as_str() {
      "--device" => device_name = Some(args.next().ok_or_else(usage)?),
      _ if path.is_none() => path = Some(arg),
      _ => return Err(usage()),
    }
  }
  let path = path.ok_or_else(usage)?;

  let bytes = std::fs::read(&path).map_err(|err| format!("reading {path}: {err}"))?;
  let source = SmfSource::parse(&bytes)?;
  log::info!(
    "{path}: {} events, division {}, last tick {}",
    source.event_count(),
    source.division(),
    source.last_tick()
  );

  let mut player = MidiPlayer::new();
  player.set_text_callback(Box::new(|kind, text| log::info!("{kind:?}: {text}")));
  player.set_file(Box::new(source));
  let player = Arc::new(Mutex::new(player));

  let device = find_output_device(device_name.as_deref())?;
  log::info!("output device: {}", device.name().unwrap_or_default());
  let config = pick_output_config(&device)?;
  let sample_format = config.sample_format();
  let rate = config.sample_rate().0;
  if rate != SAMPLE_RATE {
    log::warn!(
      "device rate {rate} Hz, engine rate {SAMPLE_RATE} Hz: playback runs at {:.2}x speed",
      rate as f64 / SAMPLE_RATE as f64
    );
  }

  let stream_config: StreamConfig = config.into();
  let stream = match sample_format {
    SampleFormat::F32 => build_player_stream::<f32>(&device, &stream_config, Arc::clone(&player)),
    SampleFormat::I16 => build_player_stream::<i16>(&device, &stream_config, Arc::clone(&player)),
    SampleFormat::U16 => build_player_stream::<u16>(&device, &stream_config, Arc::clone(&player)),
    other => Err(format!("unsupported sample format '{other:?}'")),
  }?;
  stream.play().map_err(|err| err.to_string())?;

  // Block until the file has drained, then let the tail ring out.
  loop {
    std::thread::sleep(Duration::from_millis(200));
    let done = player.lock().map(|p| p.idle()).unwrap_or(true);
    if done {
      break;
    }
  }
  std::thread::sleep(Duration::from_millis(300));

  let player = player.lock().map_err(|_| "player lock poisoned".to_string())?;
  log::info!(
    "done: {} samples produced, {} clipped",
    player.sample_count(),
    player.clipped()
  );
  Ok(())
}

fn find_output_device(name: Option<&str>) -> Result<cpal::Device, String> {
  let host = cpal::default_host();
  if let Some(name) = name {
    let devices = host.output_devices().map_err(|err| err.to_string())?;
    for device in devices {
      let device_name = device.name().unwrap_or_default();
      if device_name == name {
        return Ok(device);
      }
    }
    return Err(format!("output device '{name}' not found"));
  }
  host
    .default_output_device()
    .ok_or_else(|| "no default output device".to_string())
}

fn is_supported_sample_format(format: SampleFormat) -> bool {
  matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
}

/// Prefer a config that can run at the engine's DAC rate; otherwise fall
/// back to the device default and accept the speed mismatch.
fn pick_output_config(device: &cpal::Device) -> Result<cpal::SupportedStreamConfig, String> {
  let configs = device
    .supported_output_configs()
    .map_err(|err| err.to_string())?;
  for config in configs {
    if config.min_sample_rate().0 <= SAMPLE_RATE
      && config.max_sample_rate().0 >= SAMPLE_RATE
      && is_supported_sample_format(config.sample_format())
    {
      return Ok(config.with_sample_rate(cpal::SampleRate(SAMPLE_RATE)));
    }
  }
  device.default_output_config().map_err(|err| err.to_string())
}

fn write_player_output<T>(
  output: &mut [T],
  channels: usize,
  player: &Arc<Mutex<MidiPlayer>>,
  mono: &mut Vec<u8>,
) where
  T: Sample + FromSample<f32>,
{
  if channels == 0 {
    return;
  }
  let frames = output.len() / channels;
  if frames == 0 {
    return;
  }
  if let Ok(mut player) = player.try_lock() {
    mono.resize(frames, 128);
    player.fill_buffer(&mut mono[..frames]);
    for (frame, &byte) in output.chunks_mut(channels).zip(mono.iter()) {
      let value = (byte as f32 - 128.0) / 128.0;
      for sample in frame.iter_mut() {
        *sample = T::from_sample(value);
      }
    }
  } else {
    for sample in output.iter_mut() {
      *sample = T::EQUILIBRIUM;
    }
  }
}

fn build_player_stream<T: Sample + FromSample<f32> + cpal::SizedSample>(
  device: &cpal::Device,
  config: &StreamConfig,
  player: Arc<Mutex<MidiPlayer>>,
) -> Result<cpal::Stream, String> {
  let channels = config.channels as usize;
  let mut mono: Vec<u8> = Vec::new();
  let err_fn = |err| eprintln!("audio stream error: {err}");
  device
    .build_output_stream(
      config,
      move |data: &mut [T], _| write_player_output(data, channels, &player, &mut mono),
      err_fn,
      None,
    )
    .map_err(|err| err.to_string())
}
