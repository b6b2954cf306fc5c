//! Note events and the sink they are delivered to
//!
//! The arpeggiator and keyboard router emit notes into a `NoteSink`. The
//! render engine is the production sink (it forwards into the message queue);
//! a `Vec<NoteEvent>` records them for inspection.

use crate::audio::message::ControlMessage;

/// Note event produced on the control side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteEvent {
    On {
        /// MIDI note number (0-127)
        note: u8,
        /// Velocity (1-127)
        velocity: u8,
    },
    Off {
        note: u8,
    },
    AllOff,
}

impl NoteEvent {
    pub fn to_message(self) -> ControlMessage {
        match self {
            NoteEvent::On { note, velocity } => ControlMessage::NoteOn { note, velocity },
            NoteEvent::Off { note } => ControlMessage::NoteOff { note },
            NoteEvent::AllOff => ControlMessage::AllNotesOff,
        }
    }
}

/// Destination for note events
pub trait NoteSink {
    fn note_on(&mut self, note: u8, velocity: u8);
    fn note_off(&mut self, note: u8);
    fn all_notes_off(&mut self);
}

impl NoteSink for Vec<NoteEvent> {
    fn note_on(&mut self, note: u8, velocity: u8) {
        self.push(NoteEvent::On { note, velocity });
    }

    fn note_off(&mut self, note: u8) {
        self.push(NoteEvent::Off { note });
    }

    fn all_notes_off(&mut self) {
        self.push(NoteEvent::AllOff);
    }
}

/// Parse a comma-separated note list such as `60,64,67` or `C4,E4,G4`
pub fn parse_note_list(text: &str) -> Result<Vec<u8>, String> {
    text.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_note)
        .collect()
}

/// Parse a MIDI note number or a note name (`C4`, `F#3`, `Bb2`; C4 = 60)
pub fn parse_note(text: &str) -> Result<u8, String> {
    if let Ok(number) = text.parse::<u8>() {
        return if number <= 127 {
            Ok(number)
        } else {
            Err(format!("note {} out of range 0-127", number))
        };
    }

    let mut chars = text.chars();
    let base = match chars.next().map(|c| c.to_ascii_uppercase()) {
        Some('C') => 0,
        Some('D') => 2,
        Some('E') => 4,
        Some('F') => 5,
        Some('G') => 7,
        Some('A') => 9,
        Some('B') => 11,
        _ => return Err(format!("invalid note '{}'", text)),
    };

    let rest = chars.as_str();
    let (accidental, octave) = match rest.chars().next() {
        Some('#') => (1, &rest[1..]),
        Some('b') => (-1, &rest[1..]),
        _ => (0, rest),
    };
    let octave: i32 = octave
        .parse()
        .map_err(|_| format!("invalid octave in note '{}'", text))?;

    let number = (octave + 1) * 12 + base + accidental;
    u8::try_from(number)
        .ok()
        .filter(|n| *n <= 127)
        .ok_or_else(|| format!("note '{}' out of range", text))
}
