// =============================================================================
// Synth Core Library
// =============================================================================
//
// Real-time General MIDI synthesis engine: consumes a stream of decoded MIDI
// events (externally driven or pulled from a Standard MIDI File reader) and
// produces unsigned 8-bit PCM at a fixed DAC sample rate. Designed for a
// single-threaded cooperative host: the audio callback pulls a buffer on
// demand, per-sample cost stays bounded, and nothing allocates after
// initialization.
//
// ## Module Organization
//
// - `common` - Build-time constants and callback types
// - `tables` - Note-frequency, pitch-bend, dither, and wavetable data
// - `osc` - Phase-accumulator tone generator (wavetable / noise)
// - `drums` - Built-in GM channel-10 percussion synthesis
// - `voice` - Voice slots, state bitmaps, and the voice allocator
// - `channel` - Per-channel state and timbre descriptors
// - `events` - Decoded event model and the file-reader interface
// - `player` - The façade: entry points, dispatcher, and mixer

pub mod channel;
pub mod common;
pub mod drums;
pub mod events;
pub mod osc;
pub mod player;
pub mod tables;
pub mod voice;

// Re-export the surface most hosts need at the crate root.
pub use common::{
    NUM_CHANNELS, OSC_PER_VOICE, PERCUSSION_CHANNEL, PERCUSSION_VOICES, SAMPLE_RATE,
    TextMetaKind, VOICE_PER_CHANNEL,
};
pub use events::{EventSource, MetaEvent, MidiEvent, TimedEvent};
pub use player::{MidiPlayer, PlayerMode, TextCallback};
pub use tables::{bend_pitch, note_freq};
