//! Keyboard routing between direct play and the arpeggiator
//!
//! Direct notes and arpeggiator-held notes are tracked as two separate sets.
//! A key press either sounds immediately (arpeggiator off) or joins the
//! arpeggiator's held set (arpeggiator on), never both.

use super::arpeggiator::{ArpSettings, Arpeggiator};
use super::events::NoteSink;

pub struct KeyboardRouter {
    /// Notes sounding because a key is down and the arpeggiator is off
    direct: Vec<u8>,
    arp: Arpeggiator,
    velocity: u8,
}

impl KeyboardRouter {
    pub fn new(settings: ArpSettings) -> Self {
        Self::with_arpeggiator(Arpeggiator::new(settings))
    }

    pub fn with_arpeggiator(arp: Arpeggiator) -> Self {
        let velocity = arp.settings().velocity;
        Self {
            direct: Vec::new(),
            arp,
            velocity,
        }
    }

    pub fn arpeggiator(&self) -> &Arpeggiator {
        &self.arp
    }

    /// Tempo, division, pattern and gate setters
    pub fn arpeggiator_mut(&mut self) -> &mut Arpeggiator {
        &mut self.arp
    }

    pub fn direct_notes(&self) -> &[u8] {
        &self.direct
    }

    pub fn set_velocity(&mut self, velocity: u8) {
        self.velocity = velocity.clamp(1, 127);
        self.arp.set_velocity(velocity);
    }

    pub fn press(&mut self, note: u8, sink: &mut dyn NoteSink) {
        let note = note.min(127);
        self.arp.note_pressed(note);

        if self.arp.is_enabled() {
            return;
        }
        if let Err(pos) = self.direct.binary_search(&note) {
            self.direct.insert(pos, note);
            sink.note_on(note, self.velocity);
        }
    }

    pub fn release(&mut self, note: u8, sink: &mut dyn NoteSink) {
        self.arp.note_released(note);

        if let Ok(pos) = self.direct.binary_search(&note) {
            self.direct.remove(pos);
            sink.note_off(note);
        }
    }

    /// Switching the arpeggiator on hands every directly sounding note over
    /// to it; switching off silences the arpeggiator. Keys still down do not
    /// retrigger after switching off.
    pub fn set_arpeggiator_enabled(&mut self, enabled: bool, sink: &mut dyn NoteSink) {
        if enabled && !self.arp.is_enabled() {
            for note in self.direct.drain(..) {
                sink.note_off(note);
            }
        }
        self.arp.set_enabled(enabled, sink);
    }

    pub fn set_hold(&mut self, hold: bool, sink: &mut dyn NoteSink) {
        self.arp.set_hold(hold, sink);
    }

    /// Drive the arpeggiator clock (call on every control tick)
    pub fn advance(&mut self, sink: &mut dyn NoteSink) {
        self.arp.advance(sink);
    }

    pub fn advance_to(&mut self, now: f64, sink: &mut dyn NoteSink) {
        self.arp.advance_to(now, sink);
    }

    /// Release every key and silence everything this router started
    pub fn release_all(&mut self, sink: &mut dyn NoteSink) {
        for note in self.direct.drain(..) {
            sink.note_off(note);
        }
        if self.arp.is_enabled() {
            self.arp.set_enabled(false, sink);
        }
    }
}
