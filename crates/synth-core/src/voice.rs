//! Voice slots and the bitmap-based voice allocator.
//!
//! A pool is a fixed array of voices plus a [`VoiceStates`] pair of
//! bitmaps. `on` marks voices currently sounding; `held` marks voices
//! released by note-off while the sustain pedal was down, still sounding
//! until pedal-up. Bitmaps keep allocation and scanning to a couple of
//! integer ops per event.

use crate::common::OSC_PER_VOICE;
use crate::osc::Oscillator;

/// Sounding / pedal-held bitmaps over a pool of at most 32 voices.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoiceStates {
    /// Voices currently sounding.
    pub on: u32,
    /// Voices released under a down pedal, awaiting pedal-up.
    pub held: u32,
}

impl VoiceStates {
    pub fn new() -> Self {
        Self { on: 0, held: 0 }
    }

    /// Union of sounding and pedal-held voices.
    #[inline]
    pub fn occupied(&self) -> u32 {
        self.on | self.held
    }

    pub fn clear(&mut self) {
        self.on = 0;
        self.held = 0;
    }
}

/// Pick a slot for a new note in a pool of `count` voices.
///
/// Prefers the lowest-indexed free slot; with every slot occupied, steals
/// slot 0. Both choices are deterministic so event-for-event replays
/// allocate identically.
pub fn allocate_voice(states: &VoiceStates, count: usize) -> usize {
    let mask = if count >= 32 { u32::MAX } else { (1u32 << count) - 1 };
    let free = !states.occupied() & mask;
    if free != 0 {
        free.trailing_zeros() as usize
    } else {
        0
    }
}

/// One simultaneous sounding instance of a note.
#[derive(Clone, Copy)]
pub struct Voice {
    /// MIDI note currently assigned to this slot.
    pub note: u8,
    /// Target volume from note-on velocity (0 after release).
    pub target_vol: u8,
    /// Envelope transition counter. Reserved; the shipping voice model is
    /// two-state on/off.
    pub transition_ticks: u32,
    pub oscillators: [Oscillator; OSC_PER_VOICE],
    /// Samples since note-on; drives percussion play functions.
    pub sample_tick: u32,
    /// Working storage for percussion play functions.
    pub scratch: [i32; 4],
}

impl Voice {
    pub fn new() -> Self {
        Self {
            note: 0,
            target_vol: 0,
            transition_ticks: 0,
            oscillators: [Oscillator::new(); OSC_PER_VOICE],
            sample_tick: 0,
            scratch: [0; 4],
        }
    }

    /// Drop all oscillator volumes to zero.
    pub fn silence(&mut self) {
        self.target_vol = 0;
        for osc in self.oscillators.iter_mut() {
            osc.set_volume(0);
        }
    }

    /// Panic-stop: volumes and frequencies zeroed, counters reset.
    pub fn kill(&mut self) {
        self.target_vol = 0;
        self.sample_tick = 0;
        self.scratch = [0; 4];
        for osc in self.oscillators.iter_mut() {
            osc.set_volume(0);
            osc.set_frequency(0);
        }
    }
}

impl Default for Voice {
    fn default() -> Self {
        Self::new()
    }
}
