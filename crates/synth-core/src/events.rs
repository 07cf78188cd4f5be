//! Decoded MIDI event model and the file-reader interface.
//!
//! The engine never parses wire bytes itself: a reader (Standard MIDI
//! File or otherwise) hands it decoded, absolute-tick-stamped events
//! through [`EventSource`]. Text payloads are owned strings built by the
//! reader at load time, outside the real-time path.

use crate::common::TextMetaKind;

/// A decoded event with its absolute time in MIDI ticks.
#[derive(Debug, Clone)]
pub struct TimedEvent {
    /// Absolute time in ticks; ticks per quarter note come from the
    /// reader's `division`.
    pub abs_time: u64,
    pub event: MidiEvent,
}

/// A decoded MIDI stream event.
#[derive(Debug, Clone)]
pub enum MidiEvent {
    /// Channel voice message: raw status byte plus up to two data bytes.
    Message { status: u8, data: [u8; 2] },
    Meta(MetaEvent),
    /// System exclusive payload. Accepted and ignored.
    SysEx,
}

/// Meta events the engine cares about; the rest collapse to `Other`.
#[derive(Debug, Clone)]
pub enum MetaEvent {
    /// Tempo in microseconds per quarter note.
    Tempo(u32),
    /// Text-class event, forwarded to the host's text callback.
    Text { kind: TextMetaKind, text: String },
    EndOfTrack,
    /// Time/key signature, SMPTE offset, sequence number, channel prefix,
    /// proprietary data. Ignored.
    Other,
}

/// Producer of timestamped events, typically backed by a Standard MIDI
/// File.
pub trait EventSource {
    /// Next event in absolute-tick order, or `None` at end of stream.
    fn next_event(&mut self) -> Option<TimedEvent>;

    /// Ticks per quarter note, as in the SMF header.
    fn division(&self) -> u16;
}

impl MidiEvent {
    /// Build a channel voice message event.
    pub fn message(status: u8, data0: u8, data1: u8) -> Self {
        Self::Message {
            status,
            data: [data0, data1],
        }
    }
}
