//! Note handling on the control side
//!
//! Note events, the arpeggiator step sequencer, and keyboard routing between
//! direct play and the arpeggiator.

mod arpeggiator;
mod events;
mod keyboard;

pub use arpeggiator::{
    ArpPattern, ArpSettings, Arpeggiator, StepDivision, MAX_BPM, MAX_GATE, MIN_BPM, MIN_GATE,
};
pub use events::{parse_note, parse_note_list, NoteEvent, NoteSink};
pub use keyboard::KeyboardRouter;
