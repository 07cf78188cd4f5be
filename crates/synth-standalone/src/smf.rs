//! Standard MIDI File event source.
//!
//! Parses an SMF with `midly` and flattens every track into one
//! absolute-tick-ordered event queue up front, so the real-time path only
//! ever pops the next event. Same-tick events keep their track order.

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use synth_core::{EventSource, MetaEvent, MidiEvent, TextMetaKind, TimedEvent};

/// An in-memory, pre-merged SMF event stream.
pub struct SmfSource {
    events: Vec<TimedEvent>,
    pos: usize,
    division: u16,
}

impl SmfSource {
    /// Parse SMF bytes. Format 0 and 1 files with metrical timing are
    /// accepted; SMPTE-timed and format 2 files are rejected.
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        let smf = Smf::parse(bytes).map_err(|err| format!("SMF parse error: {err}"))?;
        if matches!(smf.header.format, midly::Format::Sequential) {
            return Err("format 2 (sequential) files are not supported".to_string());
        }
        let division = match smf.header.timing {
            Timing::Metrical(ticks) => ticks.as_int(),
            Timing::Timecode(..) => {
                return Err("SMPTE-timed files are not supported".to_string());
            }
        };

        let mut events = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for ev in track {
                tick += ev.delta.as_int() as u64;
                events.push(TimedEvent {
                    abs_time: tick,
                    event: decode(&ev.kind),
                });
            }
        }
        // Stable sort: same-tick events stay in track order.
        events.sort_by_key(|ev| ev.abs_time);

        Ok(Self {
            events,
            pos: 0,
            division,
        })
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Absolute tick of the final event.
    pub fn last_tick(&self) -> u64 {
        self.events.last().map_or(0, |ev| ev.abs_time)
    }
}

impl EventSource for SmfSource {
    fn next_event(&mut self) -> Option<TimedEvent> {
        let ev = self.events.get(self.pos).cloned();
        self.pos += 1;
        ev
    }

    fn division(&self) -> u16 {
        self.division
    }
}

/// Map a midly track event onto the core's decoded event model.
fn decode(kind: &TrackEventKind) -> MidiEvent {
    match kind {
        TrackEventKind::Midi { channel, message } => {
            let ch = channel.as_int();
            match *message {
                MidiMessage::NoteOff { key, vel } => {
                    MidiEvent::message(0x80 | ch, key.as_int(), vel.as_int())
                }
                MidiMessage::NoteOn { key, vel } => {
                    MidiEvent::message(0x90 | ch, key.as_int(), vel.as_int())
                }
                MidiMessage::Aftertouch { key, vel } => {
                    MidiEvent::message(0xA0 | ch, key.as_int(), vel.as_int())
                }
                MidiMessage::Controller { controller, value } => {
                    MidiEvent::message(0xB0 | ch, controller.as_int(), value.as_int())
                }
                MidiMessage::ProgramChange { program } => {
                    MidiEvent::message(0xC0 | ch, program.as_int(), 0)
                }
                MidiMessage::ChannelAftertouch { vel } => {
                    MidiEvent::message(0xD0 | ch, vel.as_int(), 0)
                }
                MidiMessage::PitchBend { bend } => {
                    let raw = bend.0.as_int();
                    MidiEvent::message(0xE0 | ch, (raw & 0x7F) as u8, (raw >> 7) as u8)
                }
            }
        }
        TrackEventKind::Meta(meta) => MidiEvent::Meta(decode_meta(meta)),
        TrackEventKind::SysEx(_) | TrackEventKind::Escape(_) => MidiEvent::SysEx,
    }
}

fn decode_meta(meta: &MetaMessage) -> MetaEvent {
    match meta {
        MetaMessage::Tempo(tempo) => MetaEvent::Tempo(tempo.as_int()),
        MetaMessage::EndOfTrack => MetaEvent::EndOfTrack,
        MetaMessage::Text(bytes) => text_event(TextMetaKind::Text, bytes),
        MetaMessage::Copyright(bytes) => text_event(TextMetaKind::Copyright, bytes),
        MetaMessage::TrackName(bytes) => text_event(TextMetaKind::TrackName, bytes),
        MetaMessage::InstrumentName(bytes) => text_event(TextMetaKind::InstrumentName, bytes),
        MetaMessage::Lyric(bytes) => text_event(TextMetaKind::Lyric, bytes),
        MetaMessage::Marker(bytes) => text_event(TextMetaKind::Marker, bytes),
        MetaMessage::CuePoint(bytes) => text_event(TextMetaKind::CuePoint, bytes),
        _ => MetaEvent::Other,
    }
}

fn text_event(kind: TextMetaKind, bytes: &[u8]) -> MetaEvent {
    MetaEvent::Text {
        kind,
        text: String::from_utf8_lossy(bytes).into_owned(),
    }
}
