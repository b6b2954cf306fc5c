//! Arpeggiator step sequencer
//!
//! Turns the set of held notes into a stream of timed note-on/note-off events.
//! Stepping runs on wall-clock time from the control context: call `advance`
//! (or `advance_to` with an explicit time) from a polling loop a few times per
//! step. At most one arpeggiator note sounds at a time.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::events::NoteSink;

pub const MIN_BPM: f32 = 40.0;
pub const MAX_BPM: f32 = 240.0;
pub const MIN_GATE: f32 = 10.0;
pub const MAX_GATE: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArpPattern {
    #[default]
    Up,
    Down,
    UpDown,
    Random,
}

impl ArpPattern {
    /// Index into `count` held notes for step number `step`
    fn index(self, step: usize, count: usize, rng: &mut StdRng) -> usize {
        match self {
            ArpPattern::Up => step % count,
            ArpPattern::Down => count - 1 - step % count,
            ArpPattern::UpDown => {
                let cycle = (2 * (count - 1)).max(1);
                let pos = step % cycle;
                if pos < count {
                    pos
                } else {
                    cycle - pos
                }
            }
            ArpPattern::Random => rng.gen_range(0..count),
        }
    }
}

impl FromStr for ArpPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "up" => Ok(ArpPattern::Up),
            "down" => Ok(ArpPattern::Down),
            "updown" => Ok(ArpPattern::UpDown),
            "random" => Ok(ArpPattern::Random),
            _ => Err(format!("unknown pattern '{}' (up, down, up-down, random)", s)),
        }
    }
}

impl fmt::Display for ArpPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArpPattern::Up => "up",
            ArpPattern::Down => "down",
            ArpPattern::UpDown => "up-down",
            ArpPattern::Random => "random",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepDivision {
    Quarter,
    Eighth,
    #[default]
    Sixteenth,
    ThirtySecond,
}

impl StepDivision {
    pub fn steps_per_beat(self) -> f64 {
        match self {
            StepDivision::Quarter => 1.0,
            StepDivision::Eighth => 2.0,
            StepDivision::Sixteenth => 4.0,
            StepDivision::ThirtySecond => 8.0,
        }
    }
}

impl FromStr for StepDivision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1/4" | "4" | "quarter" => Ok(StepDivision::Quarter),
            "1/8" | "8" | "eighth" => Ok(StepDivision::Eighth),
            "1/16" | "16" | "sixteenth" => Ok(StepDivision::Sixteenth),
            "1/32" | "32" | "thirty_second" | "thirtysecond" => Ok(StepDivision::ThirtySecond),
            _ => Err(format!("unknown division '{}' (1/4, 1/8, 1/16, 1/32)", s)),
        }
    }
}

impl fmt::Display for StepDivision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepDivision::Quarter => "1/4",
            StepDivision::Eighth => "1/8",
            StepDivision::Sixteenth => "1/16",
            StepDivision::ThirtySecond => "1/32",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArpSettings {
    pub enabled: bool,
    pub hold: bool,
    pub bpm: f32,
    pub division: StepDivision,
    pub pattern: ArpPattern,
    /// Percentage of the step the note stays on
    pub gate_length: f32,
    pub velocity: u8,
}

impl Default for ArpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            hold: false,
            bpm: 120.0,
            division: StepDivision::Sixteenth,
            pattern: ArpPattern::Up,
            gate_length: 80.0,
            velocity: 100,
        }
    }
}

pub struct Arpeggiator {
    settings: ArpSettings,
    /// Notes being arpeggiated, ascending
    held: Vec<u8>,
    /// Keys physically down right now, ascending
    pressed: Vec<u8>,
    step: usize,
    last_step: Option<f64>,
    note_off_at: f64,
    sounding: Option<u8>,
    rng: StdRng,
    clock: Instant,
}

fn insert_sorted(notes: &mut Vec<u8>, note: u8) {
    if let Err(pos) = notes.binary_search(&note) {
        notes.insert(pos, note);
    }
}

fn remove_sorted(notes: &mut Vec<u8>, note: u8) {
    if let Ok(pos) = notes.binary_search(&note) {
        notes.remove(pos);
    }
}

impl Arpeggiator {
    pub fn new(settings: ArpSettings) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    /// Deterministic random pattern
    pub fn with_seed(settings: ArpSettings, seed: u64) -> Self {
        Self::with_rng(settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(settings: ArpSettings, rng: StdRng) -> Self {
        let mut arp = Self {
            settings: ArpSettings::default(),
            held: Vec::new(),
            pressed: Vec::new(),
            step: 0,
            last_step: None,
            note_off_at: 0.0,
            sounding: None,
            rng,
            clock: Instant::now(),
        };
        arp.set_bpm(settings.bpm);
        arp.set_gate_length(settings.gate_length);
        arp.settings.enabled = settings.enabled;
        arp.settings.hold = settings.hold;
        arp.settings.division = settings.division;
        arp.settings.pattern = settings.pattern;
        arp.settings.velocity = settings.velocity.clamp(1, 127);
        arp
    }

    pub fn settings(&self) -> &ArpSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn held_notes(&self) -> &[u8] {
        &self.held
    }

    pub fn sounding(&self) -> Option<u8> {
        self.sounding
    }

    /// Seconds per step for the current tempo and division
    pub fn step_duration(&self) -> f64 {
        60.0 / (self.settings.bpm as f64 * self.settings.division.steps_per_beat())
    }

    pub fn set_bpm(&mut self, bpm: f32) {
        self.settings.bpm = if bpm.is_finite() { bpm.clamp(MIN_BPM, MAX_BPM) } else { 120.0 };
    }

    pub fn set_gate_length(&mut self, gate: f32) {
        self.settings.gate_length = if gate.is_finite() { gate.clamp(MIN_GATE, MAX_GATE) } else { 80.0 };
    }

    pub fn set_division(&mut self, division: StepDivision) {
        self.settings.division = division;
    }

    pub fn set_pattern(&mut self, pattern: ArpPattern) {
        self.settings.pattern = pattern;
    }

    pub fn set_velocity(&mut self, velocity: u8) {
        self.settings.velocity = velocity.clamp(1, 127);
    }

    /// Enabling starts from the keys currently down. Disabling silences the
    /// sounding note, forgets every held note and sends all-notes-off.
    pub fn set_enabled(&mut self, enabled: bool, sink: &mut dyn NoteSink) {
        if enabled == self.settings.enabled {
            return;
        }
        self.settings.enabled = enabled;

        if enabled {
            self.held = self.pressed.clone();
            self.reset_steps();
        } else {
            self.release_sounding(sink);
            self.held.clear();
            self.reset_steps();
            sink.all_notes_off();
        }
        log::debug!("Arpeggiator {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Releasing hold drops latched notes (only keys still down remain) and
    /// silences the sounding note.
    pub fn set_hold(&mut self, hold: bool, sink: &mut dyn NoteSink) {
        if hold == self.settings.hold {
            return;
        }
        self.settings.hold = hold;

        if !hold {
            self.release_sounding(sink);
            if self.settings.enabled {
                self.held = self.pressed.clone();
            }
        }
    }

    pub fn note_pressed(&mut self, note: u8) {
        insert_sorted(&mut self.pressed, note);
        if self.settings.enabled {
            insert_sorted(&mut self.held, note);
        }
    }

    pub fn note_released(&mut self, note: u8) {
        remove_sorted(&mut self.pressed, note);
        if self.settings.enabled && !self.settings.hold {
            remove_sorted(&mut self.held, note);
        }
    }

    /// Poll against the arpeggiator's own monotonic clock
    pub fn advance(&mut self, sink: &mut dyn NoteSink) {
        let now = self.clock.elapsed().as_secs_f64();
        self.advance_to(now, sink);
    }

    /// Poll at `now` seconds. Times must not go backwards between calls.
    pub fn advance_to(&mut self, now: f64, sink: &mut dyn NoteSink) {
        if !self.settings.enabled {
            return;
        }

        if self.held.is_empty() {
            self.release_sounding(sink);
            self.reset_steps();
            return;
        }

        let step_duration = self.step_duration();

        // Gate first, so a note whose gate ends on the step boundary is
        // released before the next one starts
        if let Some(note) = self.sounding {
            if now >= self.note_off_at {
                sink.note_off(note);
                self.sounding = None;
            }
        }

        let due = self
            .last_step
            .map_or(true, |last| now - last >= step_duration);
        if !due {
            return;
        }

        self.release_sounding(sink);

        let index = self
            .settings
            .pattern
            .index(self.step, self.held.len(), &mut self.rng);
        let note = self.held[index];
        sink.note_on(note, self.settings.velocity);
        self.sounding = Some(note);
        self.note_off_at = now + step_duration * (self.settings.gate_length as f64 / 100.0);
        self.step = self.step.wrapping_add(1);
        self.last_step = Some(now);
    }

    fn release_sounding(&mut self, sink: &mut dyn NoteSink) {
        if let Some(note) = self.sounding.take() {
            sink.note_off(note);
        }
    }

    fn reset_steps(&mut self) {
        self.step = 0;
        self.last_step = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::midi::NoteEvent;

    fn enabled(pattern: ArpPattern) -> ArpSettings {
        ArpSettings {
            enabled: true,
            bpm: 120.0,
            division: StepDivision::Quarter,
            pattern,
            gate_length: 50.0,
            ..ArpSettings::default()
        }
    }

    fn note_ons(events: &[NoteEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                NoteEvent::On { note, .. } => Some(*note),
                _ => None,
            })
            .collect()
    }

    fn press_all(arp: &mut Arpeggiator, notes: &[u8]) {
        for &note in notes {
            arp.note_pressed(note);
        }
    }

    /// Poll every 1/64 s (exact in binary) across `steps` steps of 0.5 s
    fn run_steps(arp: &mut Arpeggiator, steps: usize, sink: &mut Vec<NoteEvent>) {
        for tick in 0..(steps * 32) {
            arp.advance_to(tick as f64 / 64.0, sink);
        }
    }

    #[test]
    fn test_step_duration() {
        let mut arp = Arpeggiator::new(enabled(ArpPattern::Up));
        assert_eq!(arp.step_duration(), 0.5);
        arp.set_division(StepDivision::Sixteenth);
        assert_eq!(arp.step_duration(), 0.125);
        arp.set_bpm(10.0);
        assert_eq!(arp.settings().bpm, MIN_BPM);
        arp.set_bpm(500.0);
        assert_eq!(arp.settings().bpm, MAX_BPM);
        arp.set_gate_length(0.0);
        assert_eq!(arp.settings().gate_length, MIN_GATE);
    }

    #[test]
    fn test_up_sequence_and_gate() {
        let mut arp = Arpeggiator::new(enabled(ArpPattern::Up));
        press_all(&mut arp, &[67, 60, 64]);

        let mut events = Vec::new();
        arp.advance_to(0.0, &mut events);
        assert_eq!(events, vec![NoteEvent::On { note: 60, velocity: 100 }]);

        // 50% gate of a 0.5 s step
        arp.advance_to(0.24, &mut events);
        assert_eq!(events.len(), 1);
        arp.advance_to(0.25, &mut events);
        assert_eq!(events[1], NoteEvent::Off { note: 60 });

        arp.advance_to(0.5, &mut events);
        assert_eq!(events[2], NoteEvent::On { note: 64, velocity: 100 });

        let mut events = Vec::new();
        let mut arp = Arpeggiator::new(enabled(ArpPattern::Up));
        press_all(&mut arp, &[60, 64, 67]);
        run_steps(&mut arp, 6, &mut events);
        assert_eq!(note_ons(&events), vec![60, 64, 67, 60, 64, 67]);
        // Every note-on is followed by its own note-off before the next note-on
        for pair in events.chunks(2) {
            match pair {
                [NoteEvent::On { note: on, .. }, NoteEvent::Off { note: off }] => assert_eq!(on, off),
                other => panic!("unexpected event order: {:?}", other),
            }
        }
    }

    #[test]
    fn test_down_and_up_down() {
        let mut events = Vec::new();
        let mut arp = Arpeggiator::new(enabled(ArpPattern::Down));
        press_all(&mut arp, &[60, 64, 67]);
        run_steps(&mut arp, 4, &mut events);
        assert_eq!(note_ons(&events), vec![67, 64, 60, 67]);

        let mut events = Vec::new();
        let mut arp = Arpeggiator::new(enabled(ArpPattern::UpDown));
        press_all(&mut arp, &[60, 64, 67]);
        run_steps(&mut arp, 8, &mut events);
        assert_eq!(note_ons(&events), vec![60, 64, 67, 64, 60, 64, 67, 64]);

        // A single note degenerates to repeating it
        let mut events = Vec::new();
        let mut arp = Arpeggiator::new(enabled(ArpPattern::UpDown));
        arp.note_pressed(72);
        run_steps(&mut arp, 3, &mut events);
        assert_eq!(note_ons(&events), vec![72, 72, 72]);
    }

    #[test]
    fn test_random_stays_in_held_set() {
        let mut events = Vec::new();
        let mut arp = Arpeggiator::with_seed(enabled(ArpPattern::Random), 7);
        press_all(&mut arp, &[48, 55, 62]);
        run_steps(&mut arp, 30, &mut events);

        let notes = note_ons(&events);
        assert_eq!(notes.len(), 30);
        assert!(notes.iter().all(|n| [48, 55, 62].contains(n)));
    }

    #[test]
    fn test_full_gate_releases_before_next_step() {
        let mut settings = enabled(ArpPattern::Up);
        settings.gate_length = 100.0;
        let mut arp = Arpeggiator::new(settings);
        press_all(&mut arp, &[60, 62]);

        let mut events = Vec::new();
        arp.advance_to(0.0, &mut events);
        arp.advance_to(0.5, &mut events);
        assert_eq!(
            events,
            vec![
                NoteEvent::On { note: 60, velocity: 100 },
                NoteEvent::Off { note: 60 },
                NoteEvent::On { note: 62, velocity: 100 },
            ]
        );
    }

    #[test]
    fn test_disable_while_sounding() {
        let mut arp = Arpeggiator::new(enabled(ArpPattern::Up));
        press_all(&mut arp, &[60, 64, 67]);

        let mut events = Vec::new();
        arp.advance_to(0.0, &mut events);
        assert_eq!(arp.sounding(), Some(60));

        let mut after = Vec::new();
        arp.set_enabled(false, &mut after);
        for tick in 1..200 {
            arp.advance_to(tick as f64 * 0.01, &mut after);
        }

        let offs: Vec<_> = after
            .iter()
            .filter(|e| matches!(e, NoteEvent::Off { .. }))
            .collect();
        assert_eq!(offs, vec![&NoteEvent::Off { note: 60 }]);
        assert!(note_ons(&after).is_empty());
        assert!(after.contains(&NoteEvent::AllOff));
        assert!(arp.held_notes().is_empty());
        assert_eq!(arp.sounding(), None);
    }

    #[test]
    fn test_release_without_hold_empties_and_silences() {
        let mut arp = Arpeggiator::new(enabled(ArpPattern::Up));
        press_all(&mut arp, &[60, 64]);

        let mut events = Vec::new();
        arp.advance_to(0.0, &mut events);
        arp.note_released(60);
        arp.note_released(64);
        assert!(arp.held_notes().is_empty());

        arp.advance_to(0.1, &mut events);
        assert_eq!(events.last(), Some(&NoteEvent::Off { note: 60 }));
        arp.advance_to(1.0, &mut events);
        assert_eq!(note_ons(&events), vec![60]);
    }

    #[test]
    fn test_hold_latches_notes() {
        let mut settings = enabled(ArpPattern::Up);
        settings.hold = true;
        let mut arp = Arpeggiator::new(settings);

        arp.note_pressed(60);
        arp.note_released(60);
        arp.note_pressed(64);
        arp.note_released(64);
        assert_eq!(arp.held_notes(), &[60, 64]);

        let mut events = Vec::new();
        run_steps(&mut arp, 3, &mut events);
        assert_eq!(note_ons(&events), vec![60, 64, 60]);

        // Releasing hold keeps only keys still down
        arp.note_pressed(67);
        let mut events = Vec::new();
        arp.advance_to(1.6, &mut events);
        arp.set_hold(false, &mut events);
        assert_eq!(arp.held_notes(), &[67]);
        assert_eq!(arp.sounding(), None);
        assert!(matches!(events.last(), Some(NoteEvent::Off { .. })));
    }

    #[test]
    fn test_enable_picks_up_pressed_keys() {
        let mut arp = Arpeggiator::new(ArpSettings::default());
        arp.note_pressed(60);
        arp.note_pressed(63);
        assert!(arp.held_notes().is_empty());

        let mut events = Vec::new();
        // Disabled arpeggiator emits nothing
        arp.advance_to(0.0, &mut events);
        assert!(events.is_empty());

        arp.set_enabled(true, &mut events);
        assert_eq!(arp.held_notes(), &[60, 63]);
        arp.advance_to(0.0, &mut events);
        assert_eq!(note_ons(&events), vec![60]);
    }

    #[test]
    fn test_parse_settings() {
        assert_eq!("up-down".parse::<ArpPattern>().unwrap(), ArpPattern::UpDown);
        assert_eq!("Random".parse::<ArpPattern>().unwrap(), ArpPattern::Random);
        assert!("sideways".parse::<ArpPattern>().is_err());
        assert_eq!("1/32".parse::<StepDivision>().unwrap(), StepDivision::ThirtySecond);
        assert_eq!("eighth".parse::<StepDivision>().unwrap(), StepDivision::Eighth);
        assert_eq!(StepDivision::Sixteenth.to_string(), "1/16");
    }
}
