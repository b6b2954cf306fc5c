//! Messages carried from the control context to the audio callback

/// A single queued write into the loaded unit.
///
/// Kept `Copy` and small: the queue moves these by value and never allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    SetParameter { id: u8, value: i32 },
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    AllNotesOff,
    LoadPreset { index: u8 },
    /// Tempo as 16.16 fixed-point BPM
    SetTempo { tempo: u32 },
}

impl ControlMessage {
    /// Tempo message for a floating-point BPM value
    pub fn tempo(bpm: f32) -> Self {
        let tempo = (bpm.max(0.0) as f64 * 65536.0).round() as u32;
        Self::SetTempo { tempo }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tempo_fixed_point() {
        assert_eq!(ControlMessage::tempo(120.0), ControlMessage::SetTempo { tempo: 120 << 16 });
        assert_eq!(
            ControlMessage::tempo(90.5),
            ControlMessage::SetTempo { tempo: (90 << 16) | 0x8000 }
        );
    }

    #[test]
    fn test_message_is_small() {
        assert!(std::mem::size_of::<ControlMessage>() <= 12);
    }
}
