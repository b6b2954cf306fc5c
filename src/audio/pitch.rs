//! Pitch detection on the engine's pre-shaping output
//!
//! YIN-style detector over a rolling mono window:
//!
//! 1. RMS gate: below the noise floor nothing is analyzed
//! 2. Difference function d(τ) = Σ(x[j] - x[j+τ])², expanded into two
//!    energy terms minus twice the cross-correlation, which comes from one
//!    FFT round trip instead of a sum per lag
//! 3. Cumulative mean normalized difference d'(τ)
//! 4. First τ with d'(τ) under the threshold, walked down to its local minimum
//! 5. Parabolic interpolation for sub-sample accuracy
//!
//! The reported value only moves when the new estimate differs from it by more
//! than the hysteresis, and is retained through silence and unpitched input.
//!
//! All buffers are allocated up front so `push_samples` and `analyze` can run
//! inside the audio callback.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use serde::Serialize;

/// Samples in the analysis window (~85 ms at 48 kHz). Also the FFT size.
pub const PITCH_WINDOW: usize = 4096;
pub const MIN_FREQUENCY_HZ: f32 = 50.0;
pub const MAX_FREQUENCY_HZ: f32 = 1500.0;
/// RMS below which the window is treated as silence
pub const RMS_FLOOR: f32 = 0.01;
/// Normalized difference a lag must fall under to count as periodic
pub const YIN_THRESHOLD: f64 = 0.25;
/// Minimum change before a new estimate replaces the reported one
pub const HYSTERESIS_HZ: f32 = 1.0;

pub struct PitchDetector {
    sample_rate: f32,
    min_period: usize,
    max_period: usize,

    ring: Vec<f32>,
    write_pos: usize,
    filled: usize,

    // Pre-allocated analysis buffers
    window: Vec<f32>,
    /// Prefix sums of squared window samples
    energy: Vec<f64>,
    difference: Vec<f64>,
    normalized: Vec<f64>,

    forward: Arc<dyn RealToComplex<f64>>,
    inverse: Arc<dyn ComplexToReal<f64>>,
    fft_input: Vec<f64>,
    head_spectrum: Vec<Complex<f64>>,
    window_spectrum: Vec<Complex<f64>>,
    correlation: Vec<f64>,
    forward_scratch: Vec<Complex<f64>>,
    inverse_scratch: Vec<Complex<f64>>,

    detected: f32,
}

impl PitchDetector {
    pub fn new(sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(1) as f32;
        // Keep at least half the window for the difference sum. Very low
        // rates collapse the lag range instead of inverting it.
        let max_period = ((sample_rate / MIN_FREQUENCY_HZ) as usize).clamp(2, PITCH_WINDOW / 2);
        let min_period = ((sample_rate / MAX_FREQUENCY_HZ) as usize).clamp(2, max_period);

        let mut planner = RealFftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(PITCH_WINDOW);
        let inverse = planner.plan_fft_inverse(PITCH_WINDOW);

        Self {
            sample_rate,
            min_period,
            max_period,
            ring: vec![0.0; PITCH_WINDOW],
            write_pos: 0,
            filled: 0,
            window: vec![0.0; PITCH_WINDOW],
            energy: vec![0.0; PITCH_WINDOW + 1],
            difference: vec![0.0; max_period + 2],
            normalized: vec![0.0; max_period + 2],
            fft_input: forward.make_input_vec(),
            head_spectrum: forward.make_output_vec(),
            window_spectrum: forward.make_output_vec(),
            correlation: inverse.make_output_vec(),
            forward_scratch: forward.make_scratch_vec(),
            inverse_scratch: inverse.make_scratch_vec(),
            forward,
            inverse,
            detected: 0.0,
        }
    }

    /// Append mono samples to the rolling window
    pub fn push_samples(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.ring[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % PITCH_WINDOW;
        }
        self.filled = (self.filled + samples.len()).min(PITCH_WINDOW);
    }

    /// Last reported pitch in Hz (0 = none yet)
    pub fn detected_hz(&self) -> f32 {
        self.detected
    }

    /// Forget the window and the reported pitch
    pub fn reset(&mut self) {
        self.ring.fill(0.0);
        self.write_pos = 0;
        self.filled = 0;
        self.detected = 0.0;
    }

    /// Run one analysis pass and return the reported pitch.
    ///
    /// Returns 0 until something has been detected. Silence, a partially
    /// filled window, or a window with no periodicity keep the previous value.
    pub fn analyze(&mut self) -> f32 {
        if self.filled < PITCH_WINDOW {
            return self.detected;
        }

        // Oldest sample first
        let (newer, older) = self.ring.split_at(self.write_pos);
        self.window[..older.len()].copy_from_slice(older);
        self.window[older.len()..].copy_from_slice(newer);

        let rms = (self.window.iter().map(|s| s * s).sum::<f32>() / PITCH_WINDOW as f32).sqrt();
        if rms < RMS_FLOOR {
            return self.detected;
        }

        if let Some(estimate) = self.estimate() {
            if self.detected == 0.0 || (estimate - self.detected).abs() > HYSTERESIS_HZ {
                self.detected = estimate;
            }
        }
        self.detected
    }

    fn estimate(&mut self) -> Option<f32> {
        let max_period = self.max_period;
        let span = PITCH_WINDOW - max_period - 1;

        self.difference_function(span)?;

        // Cumulative mean normalized difference
        self.normalized[0] = 1.0;
        let mut running = 0.0f64;
        for tau in 1..=max_period + 1 {
            running += self.difference[tau];
            self.normalized[tau] = if running > 0.0 {
                self.difference[tau] * tau as f64 / running
            } else {
                1.0
            };
        }

        // First dip under the threshold, then down to its local minimum
        let mut tau = (self.min_period..=max_period).find(|&t| self.normalized[t] < YIN_THRESHOLD)?;
        while tau < max_period && self.normalized[tau + 1] < self.normalized[tau] {
            tau += 1;
        }

        let period = self.parabolic_interpolation(tau);
        (period > 0.0).then(|| (self.sample_rate as f64 / period) as f32)
    }

    /// d(τ) = E[0, span) + E[τ, τ + span) - 2·r(τ), where r is the
    /// cross-correlation of the first `span` samples with the whole window.
    ///
    /// j + τ never passes the end of the window for τ <= max_period + 1, so
    /// the circular correlation of a window-sized FFT has no wraparound.
    fn difference_function(&mut self, span: usize) -> Option<()> {
        let n = PITCH_WINDOW;

        self.energy[0] = 0.0;
        for (i, &sample) in self.window.iter().enumerate() {
            let sample = sample as f64;
            self.energy[i + 1] = self.energy[i] + sample * sample;
        }

        // Spectrum of the leading span, zero-padded
        for (dst, &src) in self.fft_input[..span].iter_mut().zip(&self.window) {
            *dst = src as f64;
        }
        self.fft_input[span..].fill(0.0);
        self.forward
            .process_with_scratch(&mut self.fft_input, &mut self.head_spectrum, &mut self.forward_scratch)
            .ok()?;

        // Spectrum of the whole window
        for (dst, &src) in self.fft_input.iter_mut().zip(&self.window) {
            *dst = src as f64;
        }
        self.forward
            .process_with_scratch(&mut self.fft_input, &mut self.window_spectrum, &mut self.forward_scratch)
            .ok()?;

        for (head, whole) in self.head_spectrum.iter_mut().zip(&self.window_spectrum) {
            *head = head.conj() * whole;
        }
        // DC and Nyquist bins of a real signal's spectrum are real
        if let Some(first) = self.head_spectrum.first_mut() {
            first.im = 0.0;
        }
        if let Some(last) = self.head_spectrum.last_mut() {
            last.im = 0.0;
        }
        self.inverse
            .process_with_scratch(&mut self.head_spectrum, &mut self.correlation, &mut self.inverse_scratch)
            .ok()?;

        // The inverse transform is unnormalized
        let scale = 1.0 / n as f64;
        let head_energy = self.energy[span];
        self.difference[0] = 0.0;
        for tau in 1..=self.max_period + 1 {
            let shifted_energy = self.energy[tau + span] - self.energy[tau];
            let cross = self.correlation[tau] * scale;
            self.difference[tau] = (head_energy + shifted_energy - 2.0 * cross).max(0.0);
        }
        Some(())
    }

    fn parabolic_interpolation(&self, tau: usize) -> f64 {
        if tau < 1 || tau + 1 >= self.normalized.len() {
            return tau as f64;
        }

        let s0 = self.normalized[tau - 1];
        let s1 = self.normalized[tau];
        let s2 = self.normalized[tau + 1];
        let denominator = 2.0 * (2.0 * s1 - s2 - s0);
        if denominator.abs() < f64::EPSILON {
            return tau as f64;
        }

        tau as f64 + (s2 - s0) / denominator
    }
}

/// Nearest equal-tempered note for a frequency
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteReading {
    pub frequency: f32,
    pub midi_note: u8,
    pub name: String,
    /// Deviation from the nearest note, -50..50
    pub cents: f32,
}

impl NoteReading {
    /// `None` for "no pitch" (0 Hz or below)
    pub fn from_frequency(hz: f32, reference_hz: f32) -> Option<Self> {
        const NAMES: [&str; 12] = [
            "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
        ];

        if hz <= 0.0 || reference_hz <= 0.0 {
            return None;
        }

        let midi = 69.0 + 12.0 * (hz / reference_hz).log2();
        let nearest = midi.round().clamp(0.0, 127.0);
        let note = nearest as u8;

        Some(Self {
            frequency: hz,
            midi_note: note,
            name: format!("{}{}", NAMES[(note % 12) as usize], (note / 12) as i32 - 1),
            cents: (midi - nearest) * 100.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f32::consts::PI;
    use std::time::Instant;

    fn sine(hz: f32, sample_rate: f32, start: usize, len: usize) -> Vec<f32> {
        (start..start + len)
            .map(|i| 0.5 * (2.0 * PI * hz * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn test_detects_440_and_holds() {
        let mut detector = PitchDetector::new(48_000);

        // Nothing is analyzed until the window is full
        detector.push_samples(&sine(440.0, 48_000.0, 0, 1024));
        assert_eq!(detector.analyze(), 0.0);

        detector.push_samples(&sine(440.0, 48_000.0, 1024, PITCH_WINDOW));
        let first = detector.analyze();
        assert_abs_diff_eq!(first, 440.0, epsilon = 1.0);

        let mut position = 1024 + PITCH_WINDOW;
        for _ in 0..5 {
            detector.push_samples(&sine(440.0, 48_000.0, position, 512));
            position += 512;
            assert_eq!(detector.analyze(), first);
        }
    }

    #[test]
    fn test_other_frequencies() {
        for hz in [110.0f32, 261.63, 880.0] {
            let mut detector = PitchDetector::new(48_000);
            detector.push_samples(&sine(hz, 48_000.0, 0, PITCH_WINDOW));
            assert_abs_diff_eq!(detector.analyze(), hz, epsilon = hz * 0.01);
        }
    }

    #[test]
    fn test_silence_reports_none_then_retains() {
        let mut detector = PitchDetector::new(48_000);
        detector.push_samples(&vec![0.0; PITCH_WINDOW]);
        assert_eq!(detector.analyze(), 0.0);

        detector.push_samples(&sine(440.0, 48_000.0, 0, PITCH_WINDOW));
        let detected = detector.analyze();
        assert!(detected > 0.0);

        detector.push_samples(&vec![0.0; PITCH_WINDOW]);
        assert_eq!(detector.analyze(), detected);
        assert_eq!(detector.detected_hz(), detected);

        detector.reset();
        assert_eq!(detector.detected_hz(), 0.0);
    }

    /// Σ(x[j] - x[j+τ])² summed lag by lag
    fn direct_difference(window: &[f32], max_period: usize) -> Vec<f64> {
        let span = PITCH_WINDOW - max_period - 1;
        let mut difference = vec![0.0; max_period + 2];
        for tau in 1..=max_period + 1 {
            difference[tau] = (0..span)
                .map(|j| {
                    let delta = (window[j] - window[j + tau]) as f64;
                    delta * delta
                })
                .sum();
        }
        difference
    }

    fn rich_signal() -> Vec<f32> {
        (0..PITCH_WINDOW)
            .map(|i| {
                let t = i as f32 / 48_000.0;
                0.4 * (2.0 * PI * 196.0 * t).sin()
                    + 0.2 * (2.0 * PI * 392.0 * t + 0.3).sin()
                    + 0.1 * (2.0 * PI * 1234.5 * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_fft_difference_matches_direct_sum() {
        let mut detector = PitchDetector::new(48_000);
        detector.push_samples(&rich_signal());
        assert_abs_diff_eq!(detector.analyze(), 196.0, epsilon = 2.0);

        let expected = direct_difference(&detector.window, detector.max_period);
        let scale = detector.energy[PITCH_WINDOW];
        for tau in 1..=detector.max_period + 1 {
            assert_abs_diff_eq!(
                detector.difference[tau] / scale,
                expected[tau] / scale,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_analysis_cost_is_not_per_lag() {
        let mut detector = PitchDetector::new(48_000);
        detector.push_samples(&rich_signal());
        detector.analyze();

        const PASSES: u32 = 10;
        let started = Instant::now();
        for _ in 0..PASSES {
            detector.analyze();
        }
        let per_pass = started.elapsed() / PASSES;

        let started = Instant::now();
        let direct = direct_difference(&detector.window, detector.max_period);
        let per_lag_sum = started.elapsed();
        assert!(direct[1] > 0.0);

        // Same build profile on both sides, so the ratio holds in debug and
        // release alike
        assert!(
            per_pass * 4 < per_lag_sum,
            "analysis pass {:?} vs per-lag difference {:?}",
            per_pass,
            per_lag_sum
        );
    }

    #[test]
    fn test_low_sample_rates_degrade() {
        for rate in [0, 1, 50, 99, 100, 8_000] {
            let mut detector = PitchDetector::new(rate);
            assert!(detector.min_period <= detector.max_period);
            detector.push_samples(&rich_signal());
            assert!(detector.analyze().is_finite());
        }
    }

    #[test]
    fn test_note_reading() {
        let reading = NoteReading::from_frequency(440.0, 440.0).unwrap();
        assert_eq!(reading.midi_note, 69);
        assert_eq!(reading.name, "A4");
        assert_abs_diff_eq!(reading.cents, 0.0, epsilon = 0.01);

        let reading = NoteReading::from_frequency(261.63, 440.0).unwrap();
        assert_eq!(reading.name, "C4");

        // A4 = 432 reference shifts 440 Hz sharp by ~31.8 cents
        let reading = NoteReading::from_frequency(440.0, 432.0).unwrap();
        assert_eq!(reading.midi_note, 69);
        assert_abs_diff_eq!(reading.cents, 31.77, epsilon = 0.1);

        assert!(NoteReading::from_frequency(0.0, 440.0).is_none());
    }
}
