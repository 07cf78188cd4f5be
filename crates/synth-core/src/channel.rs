//! Per-channel state and timbre descriptors.

use crate::common::{PercussionFn, PITCH_WHEEL_CENTER, VOICE_PER_CHANNEL};
use crate::drums;
use crate::tables;
use crate::voice::{Voice, VoiceStates};

/// Timbre flag: voices allocate from the shared percussion pool and sound
/// through a play function instead of oscillators.
pub const TF_PERCUSSION: u8 = 1 << 0;

/// Timbre flag: monophonic; note-on always targets voice slot 0.
pub const TF_MONO: u8 = 1 << 1;

/// Sound source class of a timbre.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimbreKind {
    /// Wavetable oscillator voices.
    Wavetable,
    /// Sampled instrument. Reserved; no sample playback is wired up.
    Sample,
    /// LFSR noise voices.
    Noise,
}

/// Reserved envelope timing fields.
///
/// The shipping voice model is two-state (sounding / silent); these carry
/// the shape a multi-stage envelope would use.
#[derive(Debug, Clone, Copy, Default)]
pub struct Envelope {
    /// Attack time in samples.
    pub attack: u32,
    /// Decay time in samples.
    pub decay: u32,
    /// Sustain level, 0..=255.
    pub sustain: u8,
    /// Release time in samples.
    pub release: u32,
}

/// Immutable per-program sound descriptor.
///
/// Channels hold timbres by value, so a per-channel edit never affects
/// other channels.
#[derive(Clone, Copy)]
pub struct Timbre {
    pub kind: TimbreKind,
    pub flags: u8,
    /// Wavetable bank index for `TimbreKind::Wavetable`.
    pub wave_index: u8,
    /// Play function for percussion timbres.
    pub percussion: Option<PercussionFn>,
    pub envelope: Envelope,
    pub name: &'static str,
}

impl Timbre {
    /// Default melodic timbre: built-in wavetable bank, program 0.
    pub fn gm_wavetable() -> Self {
        Self {
            kind: TimbreKind::Wavetable,
            flags: 0,
            wave_index: tables::wave_index_for_program(0),
            percussion: None,
            envelope: Envelope::default(),
            name: "Acoustic Grand Piano",
        }
    }

    /// The GM channel-10 drum kit.
    pub fn gm_percussion() -> Self {
        Self {
            kind: TimbreKind::Wavetable,
            flags: TF_PERCUSSION,
            wave_index: 0,
            percussion: Some(drums::gm_drum),
            envelope: Envelope::default(),
            name: "Standard Kit",
        }
    }

    #[inline]
    pub fn is_percussion(&self) -> bool {
        self.flags & TF_PERCUSSION != 0
    }

    #[inline]
    pub fn is_mono(&self) -> bool {
        self.flags & TF_MONO != 0
    }
}

/// One of the 16 logical MIDI channels.
pub struct Channel {
    /// Channel volume, 14-bit (controller 7 coarse in the high 7 bits).
    /// Stored for completeness; it does not participate in mixing.
    pub volume: u16,
    /// Pitch-wheel value, 14-bit, center 0x2000.
    pub pitch_bend: u16,
    /// Current program number.
    pub program: u8,
    /// Sustain pedal down.
    pub held: bool,
    /// Channel routes to the shared percussion pool.
    pub percussion: bool,
    /// Active timbre, by value.
    pub timbre: Timbre,
    pub voices: [Voice; VOICE_PER_CHANNEL],
    pub states: VoiceStates,
}

impl Channel {
    pub fn new(percussion: bool) -> Self {
        Self {
            volume: 0x3FFF,
            pitch_bend: PITCH_WHEEL_CENTER,
            program: 0,
            held: false,
            percussion,
            timbre: if percussion {
                Timbre::gm_percussion()
            } else {
                Timbre::gm_wavetable()
            },
            voices: [Voice::new(); VOICE_PER_CHANNEL],
            states: VoiceStates::new(),
        }
    }
}
