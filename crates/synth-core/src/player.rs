//! The player façade: channels, voice pools, event dispatch, and the
//! pull-driven mixer.
//!
//! All state mutation happens either through the public entry points
//! (external MIDI) or inside [`MidiPlayer::fill_buffer`] (file playback),
//! never concurrently. The fill path allocates nothing and costs
//! O(len * total oscillators).

use crate::channel::{Channel, Timbre, TimbreKind};
use crate::common::{
    DEFAULT_TEMPO, NUM_CHANNELS, PERCUSSION_CHANNEL, PERCUSSION_VOICES, SAMPLE_RATE, TextMetaKind,
};
use crate::events::{EventSource, MetaEvent, MidiEvent, TimedEvent};
use crate::osc::WaveShape;
use crate::tables::{self, bend_pitch};
use crate::voice::{allocate_voice, Voice, VoiceStates};

/// Where events come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerMode {
    /// Driven externally through the entry points.
    Stream,
    /// Pulled from a bound file reader during `fill_buffer`.
    File,
}

/// Callback for text-class meta events.
pub type TextCallback = Box<dyn FnMut(TextMetaKind, &str) + Send>;

/// Mix scale applied before clipping, about 0.4 in Q16: headroom for many
/// simultaneous voices.
const MIX_SCALE: i32 = 0x6666;

/// The synthesis engine.
///
/// Sixteen melodic channels plus a shared percussion pool, a tempo, and a
/// monotonic sample counter. Output is unsigned 8-bit PCM centered on 128.
pub struct MidiPlayer {
    pub channels: [Channel; NUM_CHANNELS],
    pub percussion_voices: [Voice; PERCUSSION_VOICES],
    pub percussion_states: VoiceStates,
    tempo: u32,
    sample_count: u64,
    clipped: u64,
    reader: Option<Box<dyn EventSource + Send>>,
    reader_done: bool,
    division: u16,
    pending: Option<TimedEvent>,
    mode: PlayerMode,
    text_cb: Option<TextCallback>,
}

impl MidiPlayer {
    /// Fresh player: zeroed state, default tempo, GM defaults installed.
    pub fn new() -> Self {
        let mut player = Self {
            channels: core::array::from_fn(|i| Channel::new(i == PERCUSSION_CHANNEL)),
            percussion_voices: [Voice::new(); PERCUSSION_VOICES],
            percussion_states: VoiceStates::new(),
            tempo: DEFAULT_TEMPO,
            sample_count: 0,
            clipped: 0,
            reader: None,
            reader_done: false,
            division: 0,
            pending: None,
            mode: PlayerMode::Stream,
            text_cb: None,
        };
        player.gm_on();
        player
    }

    /// Install General MIDI defaults.
    ///
    /// Channel 9 becomes the percussion channel with the built-in kit;
    /// every other channel gets the default wavetable timbre on program 0.
    /// Each oscillator's phase accumulator is seeded from the dither table
    /// by its position in the sweep so identical frequencies do not add
    /// coherently.
    pub fn gm_on(&mut self) {
        let mut ordinal = 0usize;
        for (i, ch) in self.channels.iter_mut().enumerate() {
            ch.percussion = i == PERCUSSION_CHANNEL;
            ch.timbre = if ch.percussion {
                Timbre::gm_percussion()
            } else {
                Timbre::gm_wavetable()
            };
            ch.program = 0;
            let shape = match ch.timbre.kind {
                TimbreKind::Noise => WaveShape::Noise,
                _ => WaveShape::Wavetable,
            };
            for voice in ch.voices.iter_mut() {
                for osc in voice.oscillators.iter_mut() {
                    osc.set_shape(shape);
                    osc.set_wave(tables::gm_wave, ch.program as u32);
                    osc.set_volume(0);
                    osc.seed_phase(tables::OSC_DITHER[ordinal % tables::OSC_DITHER.len()]);
                    ordinal += 1;
                }
            }
        }
        for voice in self.percussion_voices.iter_mut() {
            for osc in voice.oscillators.iter_mut() {
                osc.set_shape(WaveShape::Wavetable);
                osc.set_wave(tables::gm_wave, 0);
                osc.set_volume(0);
                osc.seed_phase(tables::OSC_DITHER[ordinal % tables::OSC_DITHER.len()]);
                ordinal += 1;
            }
        }
        log::info!("general MIDI defaults installed, {ordinal} oscillators seeded");
    }

    /// Samples produced since the session started.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Samples hard-clipped so far.
    pub fn clipped(&self) -> u64 {
        self.clipped
    }

    /// Current tempo in microseconds per quarter note.
    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn mode(&self) -> PlayerMode {
        self.mode
    }

    /// Install a callback for text-class meta events during file playback.
    pub fn set_text_callback(&mut self, cb: TextCallback) {
        self.text_cb = Some(cb);
    }

    /// Bind a file reader and switch to file mode.
    ///
    /// The sample counter restarts so the reader's tick zero lines up with
    /// the next sample produced.
    pub fn set_file(&mut self, reader: Box<dyn EventSource + Send>) {
        self.division = reader.division();
        self.reader = Some(reader);
        self.reader_done = false;
        self.pending = None;
        self.mode = PlayerMode::File;
        self.sample_count = 0;
        log::info!("file reader bound, division {} ticks per quarter", self.division);
    }

    /// Pull the next event from the bound reader, latching end-of-stream.
    fn fetch_event(&mut self) -> Option<TimedEvent> {
        if self.reader_done {
            return None;
        }
        let ev = self.reader.as_mut().and_then(|r| r.next_event());
        if ev.is_none() {
            self.reader_done = true;
        }
        ev
    }

    /// True once file playback has fully drained: reader exhausted, no
    /// pending event, every voice pool quiet.
    pub fn idle(&self) -> bool {
        self.mode == PlayerMode::File
            && self.reader_done
            && self.pending.is_none()
            && self.percussion_states.occupied() == 0
            && self.channels.iter().all(|ch| ch.states.occupied() == 0)
    }

    /// The voice pool a channel plays into: its own, or the shared
    /// percussion pool.
    fn pool_mut(&mut self, ch: usize) -> (&mut [Voice], &mut VoiceStates) {
        if self.channels[ch].percussion {
            (&mut self.percussion_voices, &mut self.percussion_states)
        } else {
            let channel = &mut self.channels[ch];
            (&mut channel.voices, &mut channel.states)
        }
    }

    /// Start a note.
    pub fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        let velocity = velocity & 0x7F;
        if velocity == 0 {
            // Running-status convention: note-on at velocity 0 releases.
            self.note_off(channel, note, 0x7F);
            return;
        }
        let ch = (channel & 0x0F) as usize;
        let timbre = self.channels[ch].timbre;
        let percussion = self.channels[ch].percussion;
        let pitch_bend = self.channels[ch].pitch_bend;

        let (voices, states) = self.pool_mut(ch);
        let idx = if timbre.is_mono() {
            0
        } else {
            allocate_voice(states, voices.len())
        };
        if idx >= voices.len() {
            return;
        }
        states.on |= 1 << idx;
        let target_vol = (velocity << 1) | 1;
        let voice = &mut voices[idx];
        voice.note = note;
        voice.target_vol = target_vol;
        if percussion {
            // The play function synthesizes directly from the tick.
            voice.sample_tick = 0;
        } else {
            let freq = bend_pitch(note, pitch_bend);
            let shape = match timbre.kind {
                TimbreKind::Noise => WaveShape::Noise,
                _ => WaveShape::Wavetable,
            };
            for osc in voice.oscillators.iter_mut() {
                osc.set_shape(shape);
                osc.set_volume(target_vol);
                osc.set_frequency(freq);
            }
        }
    }

    /// Release a note. Release velocity is accepted and ignored.
    pub fn note_off(&mut self, channel: u8, note: u8, _velocity: u8) {
        let ch = (channel & 0x0F) as usize;
        let pedal = self.channels[ch].held;
        let (voices, states) = self.pool_mut(ch);
        let mut occupied = states.occupied();
        while occupied != 0 {
            let idx = occupied.trailing_zeros() as usize;
            occupied &= occupied - 1;
            if voices[idx].note != note {
                continue;
            }
            let bit = 1u32 << idx;
            states.on &= !bit;
            if pedal {
                states.held |= bit;
            } else {
                voices[idx].silence();
            }
            return;
        }
        // No voice is sounding this note: nothing to do.
    }

    /// Sustain pedal, 0..=127; values >= 64 mean down.
    pub fn sustain(&mut self, channel: u8, value: u8) {
        let ch = (channel & 0x0F) as usize;
        let new_held = value >= 64;
        let was_held = self.channels[ch].held;
        self.channels[ch].held = new_held;
        if new_held && !was_held {
            // Pedal down: snapshot the sounding voices.
            let (_, states) = self.pool_mut(ch);
            states.held |= states.on;
        } else if !new_held && was_held {
            // Pedal up: cancel voices released while the pedal was down.
            let (voices, states) = self.pool_mut(ch);
            let mut cancel = states.held & !states.on;
            while cancel != 0 {
                let idx = cancel.trailing_zeros() as usize;
                cancel &= cancel - 1;
                voices[idx].silence();
            }
            states.held = 0;
        }
    }

    /// Pitch-wheel, 14-bit, center 0x2000.
    ///
    /// Re-bends every sounding or pedal-held voice on the channel.
    /// Percussion channels store the value but leave their voices alone.
    pub fn pitch_wheel(&mut self, channel: u8, value: u16) {
        let ch = (channel & 0x0F) as usize;
        let value = value & 0x3FFF;
        self.channels[ch].pitch_bend = value;
        if self.channels[ch].percussion {
            return;
        }
        let (voices, states) = self.pool_mut(ch);
        let mut active = states.occupied();
        while active != 0 {
            let idx = active.trailing_zeros() as usize;
            active &= active - 1;
            let freq = bend_pitch(voices[idx].note, value);
            for osc in voices[idx].oscillators.iter_mut() {
                osc.set_frequency(freq);
            }
        }
    }

    /// Controller change. Recognized: channel volume (7), sustain (64),
    /// all-sound-off (120), all-notes-off (123). Everything else is
    /// silently ignored.
    pub fn control_change(&mut self, channel: u8, control: u8, value: u8) {
        let ch = (channel & 0x0F) as usize;
        match control {
            0x07 => self.channels[ch].volume = ((value & 0x7F) as u16) << 7,
            0x40 => self.sustain(channel, value),
            0x78 => self.all_sound_off(),
            0x7B => self.all_notes_off(channel),
            _ => {}
        }
    }

    /// Program change: silences the channel's voices and rebinds their
    /// waveform argument to the new program.
    pub fn set_program(&mut self, channel: u8, program: u8) {
        let ch = (channel & 0x0F) as usize;
        let program = program & 0x7F;
        self.channels[ch].program = program;
        self.channels[ch].timbre.wave_index = tables::wave_index_for_program(program);
        let (voices, _) = self.pool_mut(ch);
        for voice in voices.iter_mut() {
            for osc in voice.oscillators.iter_mut() {
                osc.set_volume(0);
                osc.set_wave(tables::gm_wave, program as u32);
            }
        }
    }

    /// Release every sounding or held note on a channel, observing the
    /// pedal.
    pub fn all_notes_off(&mut self, channel: u8) {
        let ch = (channel & 0x0F) as usize;
        let (voices, states) = self.pool_mut(ch);
        let mut notes = [0u8; 32];
        let mut count = 0usize;
        let mut occupied = states.occupied();
        while occupied != 0 {
            let idx = occupied.trailing_zeros() as usize;
            occupied &= occupied - 1;
            notes[count] = voices[idx].note;
            count += 1;
        }
        for &note in &notes[..count] {
            self.note_off(channel, note, 0);
        }
    }

    /// Panic: every voice in every pool is stopped dead, pedal state
    /// ignored, bitmaps cleared.
    pub fn all_sound_off(&mut self) {
        for ch in self.channels.iter_mut() {
            for voice in ch.voices.iter_mut() {
                voice.kill();
            }
            ch.states.clear();
        }
        for voice in self.percussion_voices.iter_mut() {
            voice.kill();
        }
        self.percussion_states.clear();
    }

    /// Absolute MIDI tick for a sample position at the current tempo and
    /// division.
    fn ticks(&self, samples: u64) -> u64 {
        if self.division == 0 || self.tempo == 0 {
            return 0;
        }
        let numer = samples as u128 * 1_000_000u128 * self.division as u128;
        (numer / (SAMPLE_RATE as u128 * self.tempo as u128)) as u64
    }

    /// Route one decoded event to its state mutation.
    fn dispatch(&mut self, event: MidiEvent) {
        match event {
            MidiEvent::Message { status, data } => {
                let channel = status & 0x0F;
                match status >> 4 {
                    0x8 => self.note_off(channel, data[0], data[1]),
                    0x9 => self.note_on(channel, data[0], data[1]),
                    0xB => self.control_change(channel, data[0], data[1]),
                    0xC => self.set_program(channel, data[0]),
                    0xE => self.pitch_wheel(channel, ((data[1] as u16) << 7) | data[0] as u16),
                    // Aftertouch and channel pressure are not synthesized.
                    _ => {}
                }
            }
            MidiEvent::Meta(meta) => match meta {
                MetaEvent::Tempo(t) => {
                    if t > 0 {
                        self.tempo = t;
                    }
                }
                MetaEvent::Text { kind, text } => {
                    if let Some(cb) = self.text_cb.as_mut() {
                        cb(kind, &text);
                    }
                }
                MetaEvent::EndOfTrack | MetaEvent::Other => {}
            },
            MidiEvent::SysEx => {}
        }
    }

    /// Sum the active percussion voices for one sample.
    fn percussion_sum(&mut self) -> i32 {
        let Some(play) = self.channels[PERCUSSION_CHANNEL].timbre.percussion else {
            return 0;
        };
        let mut sum = 0i32;
        let mut active = self.percussion_states.on;
        while active != 0 {
            let idx = active.trailing_zeros() as usize;
            active &= active - 1;
            let voice = &mut self.percussion_voices[idx];
            let mut done = false;
            sum += play(voice.note, voice.sample_tick, &mut done, &mut voice.scratch) as i32;
            voice.sample_tick += 1;
            if done {
                // One-shot: the hit retires itself.
                self.percussion_states.on &= !(1u32 << idx);
                voice.sample_tick = 0;
                voice.scratch = [0; 4];
            }
        }
        sum
    }

    /// Produce `out.len()` unsigned 8-bit samples.
    ///
    /// In file mode, pending events whose tick time falls inside this
    /// buffer are dispatched between samples, so playback is
    /// sample-accurate to the tempo/division mapping. The tick window is
    /// computed once per call from the tempo at entry; a tempo event
    /// landing inside the window shifts dispatch of the events behind it
    /// by a sample or two.
    pub fn fill_buffer(&mut self, out: &mut [u8]) {
        let len = out.len();
        let mut check_events = false;
        if self.mode == PlayerMode::File {
            if self.pending.is_none() {
                self.pending = self.fetch_event();
            }
            if let Some(ev) = &self.pending {
                check_events = ev.abs_time <= self.ticks(self.sample_count + len as u64);
            }
        }

        for slot in out.iter_mut() {
            if check_events {
                let now = self.ticks(self.sample_count);
                while let Some(ev) = &self.pending {
                    if ev.abs_time > now {
                        break;
                    }
                    let ev = self.pending.take().expect("pending event");
                    self.dispatch(ev.event);
                    self.pending = self.fetch_event();
                    if self.pending.is_none() {
                        check_events = false;
                    }
                }
            }

            let mut sample: i32 = 0;
            for ch in self.channels.iter_mut() {
                for voice in ch.voices.iter_mut() {
                    for osc in voice.oscillators.iter_mut() {
                        sample += osc.step();
                    }
                }
            }
            for voice in self.percussion_voices.iter_mut() {
                for osc in voice.oscillators.iter_mut() {
                    sample += osc.step();
                }
            }
            sample += self.percussion_sum();

            let scaled = (sample * MIX_SCALE) >> 16;
            *slot = if scaled < -128 {
                self.clipped += 1;
                0
            } else if scaled > 127 {
                self.clipped += 1;
                255
            } else {
                (scaled + 128) as u8
            };
            self.sample_count += 1;
        }
    }
}

impl Default for MidiPlayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::VOICE_PER_CHANNEL;
    use crate::tables::note_freq;

    fn dc_full(_phase: u8, _arg: u32) -> i8 {
        127
    }

    struct ScriptSource {
        events: Vec<TimedEvent>,
        pos: usize,
        division: u16,
    }

    impl ScriptSource {
        fn new(division: u16, events: Vec<TimedEvent>) -> Self {
            Self {
                events,
                pos: 0,
                division,
            }
        }
    }

    impl EventSource for ScriptSource {
        fn next_event(&mut self) -> Option<TimedEvent> {
            let ev = self.events.get(self.pos).cloned();
            self.pos += 1;
            ev
        }

        fn division(&self) -> u16 {
            self.division
        }
    }

    #[test]
    fn test_single_note_round_trip() {
        let mut player = MidiPlayer::new();
        let mut buf = [0u8; 256];

        player.note_on(0, 60, 100);
        player.fill_buffer(&mut buf);
        assert_eq!(player.channels[0].states.on, 1);
        assert_eq!(player.channels[0].voices[0].target_vol, 201);
        assert_eq!(player.channels[0].voices[0].oscillators[0].volume(), 201);

        player.note_off(0, 60, 64);
        player.fill_buffer(&mut buf);
        assert_eq!(player.channels[0].states.on, 0);
        assert_eq!(player.channels[0].voices[0].oscillators[0].volume(), 0);
    }

    #[test]
    fn test_pedal_holds_released_note() {
        let mut player = MidiPlayer::new();
        player.sustain(0, 127);
        player.note_on(0, 60, 100);
        player.note_off(0, 60, 0);

        assert_eq!(player.channels[0].states.on, 0);
        assert_eq!(player.channels[0].states.held, 1);
        assert_eq!(player.channels[0].voices[0].oscillators[0].volume(), 201);

        player.sustain(0, 0);
        assert_eq!(player.channels[0].states.held, 0);
        assert!(!player.channels[0].held);
        assert_eq!(player.channels[0].voices[0].oscillators[0].volume(), 0);
    }

    #[test]
    fn test_pedal_up_keeps_still_sounding_notes() {
        let mut player = MidiPlayer::new();
        player.sustain(0, 127);
        player.note_on(0, 60, 100);
        player.note_on(0, 64, 100);
        player.note_off(0, 60, 0);
        player.sustain(0, 0);

        // Note 64 was never released; it keeps sounding.
        assert_eq!(player.channels[0].states.on, 0b10);
        assert_eq!(player.channels[0].states.held, 0);
        assert_eq!(player.channels[0].voices[1].oscillators[0].volume(), 201);
        assert_eq!(player.channels[0].voices[0].oscillators[0].volume(), 0);
    }

    #[test]
    fn test_note_on_off_restores_bitmaps() {
        let mut player = MidiPlayer::new();
        let before = (player.channels[3].states.on, player.channels[3].states.held);
        player.note_on(3, 72, 80);
        player.note_off(3, 72, 0);
        let after = (player.channels[3].states.on, player.channels[3].states.held);
        assert_eq!(before, after);
    }

    #[test]
    fn test_voice_stealing_takes_slot_zero() {
        let mut player = MidiPlayer::new();
        for k in 0..VOICE_PER_CHANNEL as u8 {
            player.note_on(0, 60 + k, 100);
        }
        assert_eq!(
            player.channels[0].states.on,
            (1u32 << VOICE_PER_CHANNEL) - 1
        );

        player.note_on(0, 80, 100);
        assert_eq!(player.channels[0].voices[0].note, 80);
        assert_eq!(
            player.channels[0].states.on,
            (1u32 << VOICE_PER_CHANNEL) - 1
        );
    }

    #[test]
    fn test_all_sound_off_panic() {
        let mut player = MidiPlayer::new();
        player.sustain(0, 127);
        player.note_on(0, 60, 100);
        player.note_off(0, 60, 0);
        player.note_on(5, 70, 90);
        player.note_on(9, 38, 110);
        assert_ne!(player.percussion_states.on, 0);

        player.all_sound_off();
        for ch in player.channels.iter() {
            assert_eq!(ch.states.on, 0);
            assert_eq!(ch.states.held, 0);
            for voice in ch.voices.iter() {
                for osc in voice.oscillators.iter() {
                    assert_eq!(osc.volume(), 0);
                }
            }
        }
        assert_eq!(player.percussion_states.on, 0);
        assert_eq!(player.percussion_states.held, 0);
    }

    #[test]
    fn test_clipping_accounting() {
        let mut player = MidiPlayer::new();
        // Four full-velocity voices pinned to a DC waveform sum far past
        // the clip point after scaling.
        for k in 0..4 {
            player.note_on(0, 60 + k, 127);
            player.channels[0].voices[k as usize].oscillators[0].set_wave(dc_full, 0);
        }
        let mut buf = [0u8; 64];
        player.fill_buffer(&mut buf);
        assert!(buf.iter().all(|&b| b == 255));
        assert_eq!(player.clipped(), 64);
    }

    #[test]
    fn test_fill_advances_exactly_len() {
        let mut player = MidiPlayer::new();
        let mut buf = [0u8; 313];
        let before = player.sample_count();
        player.fill_buffer(&mut buf);
        assert_eq!(player.sample_count(), before + 313);
    }

    #[test]
    fn test_silence_is_centered() {
        let mut player = MidiPlayer::new();
        let mut buf = [0u8; 128];
        player.fill_buffer(&mut buf);
        assert!(buf.iter().all(|&b| b == 128));
        assert_eq!(player.clipped(), 0);
    }

    #[test]
    fn test_pitch_wheel_rebends_sounding_voices() {
        let mut player = MidiPlayer::new();
        player.note_on(0, 69, 100);
        assert_eq!(
            player.channels[0].voices[0].oscillators[0].frequency(),
            note_freq(69)
        );
        player.pitch_wheel(0, 0x3FFF);
        let bent = player.channels[0].voices[0].oscillators[0].frequency();
        assert!(bent > note_freq(69));
        player.pitch_wheel(0, 0x2000);
        assert_eq!(
            player.channels[0].voices[0].oscillators[0].frequency(),
            note_freq(69)
        );
    }

    #[test]
    fn test_percussion_channel_ignores_pitch_wheel_voices() {
        let mut player = MidiPlayer::new();
        player.note_on(9, 38, 100);
        let freq_before = player.percussion_voices[0].oscillators[0].frequency();
        player.pitch_wheel(9, 0x3FFF);
        assert_eq!(player.channels[9].pitch_bend, 0x3FFF);
        assert_eq!(
            player.percussion_voices[0].oscillators[0].frequency(),
            freq_before
        );
    }

    #[test]
    fn test_percussion_hit_retires_itself() {
        let mut player = MidiPlayer::new();
        player.note_on(9, 42, 100);
        assert_eq!(player.percussion_states.on, 1);
        // A closed hat lasts well under a second; drain it.
        let mut buf = [0u8; 256];
        for _ in 0..8 {
            player.fill_buffer(&mut buf);
        }
        assert_eq!(player.percussion_states.on, 0);
        assert_eq!(player.percussion_voices[0].sample_tick, 0);
        assert_eq!(player.percussion_voices[0].scratch, [0; 4]);
    }

    #[test]
    fn test_program_change_silences_and_rebinds() {
        let mut player = MidiPlayer::new();
        player.note_on(0, 60, 100);
        player.set_program(0, 81);
        assert_eq!(player.channels[0].program, 81);
        assert_eq!(player.channels[0].voices[0].oscillators[0].volume(), 0);
        assert_eq!(player.channels[0].voices[0].oscillators[0].wave_arg(), 81);
    }

    #[test]
    fn test_all_notes_off_observes_pedal() {
        let mut player = MidiPlayer::new();
        player.sustain(0, 127);
        player.note_on(0, 60, 100);
        player.note_on(0, 62, 100);
        player.all_notes_off(0);
        // Pedal down: notes move to held, still sounding.
        assert_eq!(player.channels[0].states.on, 0);
        assert_eq!(player.channels[0].states.held, 0b11);
        assert_eq!(player.channels[0].voices[0].oscillators[0].volume(), 201);
    }

    #[test]
    fn test_controller_routing() {
        let mut player = MidiPlayer::new();
        player.note_on(0, 60, 100);
        player.control_change(0, 0x7B, 0);
        assert_eq!(player.channels[0].states.on, 0);

        player.note_on(1, 61, 100);
        player.control_change(1, 0x78, 0);
        assert_eq!(player.channels[1].states.on, 0);

        player.control_change(2, 0x07, 100);
        assert_eq!(player.channels[2].volume, 100 << 7);
    }

    #[test]
    fn test_tick_mapping() {
        let mut player = MidiPlayer::new();
        player.set_file(Box::new(ScriptSource::new(480, vec![])));
        // One quarter note at 120 BPM is half a second: 16384 samples.
        assert_eq!(player.ticks(16_384), 480);
        assert_eq!(player.ticks(0), 0);
    }

    #[test]
    fn test_file_event_dispatch_is_sample_accurate() {
        // division 100, default tempo: tick 10 lands at sample 1639
        // (ticks(1638) == 9, ticks(1639) == 10).
        let source = ScriptSource::new(
            100,
            vec![TimedEvent {
                abs_time: 10,
                event: MidiEvent::message(0x90, 60, 100),
            }],
        );
        let mut player = MidiPlayer::new();
        player.set_file(Box::new(source));

        let mut buf = vec![0u8; 1600];
        player.fill_buffer(&mut buf);
        assert_eq!(player.channels[0].states.on, 0, "event dispatched early");

        let mut buf = vec![0u8; 100];
        player.fill_buffer(&mut buf);
        assert_eq!(player.channels[0].states.on, 1, "event missed its window");
    }

    #[test]
    fn test_file_tempo_meta_applies() {
        let source = ScriptSource::new(
            480,
            vec![TimedEvent {
                abs_time: 0,
                event: MidiEvent::Meta(MetaEvent::Tempo(250_000)),
            }],
        );
        let mut player = MidiPlayer::new();
        player.set_file(Box::new(source));
        let mut buf = [0u8; 32];
        player.fill_buffer(&mut buf);
        assert_eq!(player.tempo(), 250_000);
    }

    #[test]
    fn test_text_meta_invokes_callback() {
        use std::sync::{Arc, Mutex};
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let source = ScriptSource::new(
            480,
            vec![TimedEvent {
                abs_time: 0,
                event: MidiEvent::Meta(MetaEvent::Text {
                    kind: TextMetaKind::TrackName,
                    text: "fugue".to_string(),
                }),
            }],
        );
        let mut player = MidiPlayer::new();
        player.set_text_callback(Box::new(move |_, text| {
            sink.lock().unwrap().push(text.to_string());
        }));
        player.set_file(Box::new(source));
        let mut buf = [0u8; 32];
        player.fill_buffer(&mut buf);
        assert_eq!(seen.lock().unwrap().as_slice(), ["fugue"]);
    }

    #[test]
    fn test_idle_after_file_drains() {
        let source = ScriptSource::new(
            100,
            vec![
                TimedEvent {
                    abs_time: 0,
                    event: MidiEvent::message(0x90, 60, 100),
                },
                TimedEvent {
                    abs_time: 5,
                    event: MidiEvent::message(0x80, 60, 0),
                },
            ],
        );
        let mut player = MidiPlayer::new();
        player.set_file(Box::new(source));
        assert!(!player.idle());
        let mut buf = [0u8; 2048];
        player.fill_buffer(&mut buf);
        assert!(player.idle());
    }

    #[test]
    fn test_note_on_velocity_zero_releases() {
        let mut player = MidiPlayer::new();
        player.note_on(0, 60, 100);
        player.note_on(0, 60, 0);
        assert_eq!(player.channels[0].states.on, 0);
        assert_eq!(player.channels[0].voices[0].oscillators[0].volume(), 0);
    }

    #[test]
    fn test_note_off_unknown_note_is_noop() {
        let mut player = MidiPlayer::new();
        player.note_on(0, 60, 100);
        player.note_off(0, 61, 0);
        assert_eq!(player.channels[0].states.on, 1);
        assert_eq!(player.channels[0].voices[0].oscillators[0].volume(), 201);
    }
}
