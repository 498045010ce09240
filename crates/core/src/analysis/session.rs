use std::fmt;

use serde::{Deserialize, Serialize};

use super::spectrum::{fit_to_length, rms, BandBins, SpectralAnalyzer};
use crate::{
    AnalysisConfig, AutoGainNormalizer, BandSpec, DualRateSmoother, Result, TransientDetector,
};

/// Lifecycle of a session. There is no terminal state: restarting a stream
/// means constructing a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Configuration validated, nothing analysed yet.
    Ready,
    /// At least one buffer has been analysed.
    Running,
}

/// Smoothed, normalised band values in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandLevels {
    pub bass: f32,
    pub mids: f32,
    pub treble: f32,
}

impl BandLevels {
    pub fn average(&self) -> f32 {
        (self.bass + self.mids + self.treble) / 3.0
    }
}

/// Control signals produced for one buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFrame {
    pub bands: BandLevels,
    pub amplitude: f32,
    pub level: f32,
    pub flux_boost: f32,
}

struct BandChannel {
    bins: BandBins,
    gain: AutoGainNormalizer,
    smoother: DualRateSmoother,
}

impl BandChannel {
    fn new(spectral: &SpectralAnalyzer, band: &BandSpec, config: &AnalysisConfig) -> Self {
        Self {
            bins: spectral.band_bins(band),
            gain: AutoGainNormalizer::new(config.gain_decay, config.initial_peak),
            smoother: DualRateSmoother::new(config.band_smoothing),
        }
    }

    fn update(&mut self, magnitudes: &[f32], dt: f32) -> f32 {
        let normalised = self.gain.update(self.bins.energy(magnitudes));
        self.smoother.update(normalised, dt).clamp(0.0, 1.0)
    }
}

/// Per-stream analysis façade. Owns every piece of analysis state; all of it
/// is mutated only through [`analyze`](Self::analyze) and
/// [`amplitude`](Self::amplitude).
pub struct AnalysisSession {
    config: AnalysisConfig,
    state: SessionState,
    spectral: SpectralAnalyzer,
    frame: Vec<f32>,
    bass: BandChannel,
    mids: BandChannel,
    treble: BandChannel,
    transient: TransientDetector,
    bands: BandLevels,
    smoothed_rms: f32,
    amplitude: f32,
    buffers_analyzed: u64,
}

impl AnalysisSession {
    /// Validates `config` and builds a session in the [`SessionState::Ready`]
    /// state.
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;

        let spectral = SpectralAnalyzer::new(config.sample_rate, config.buffer_size, config.window);
        let bass = BandChannel::new(&spectral, &config.bands.bass, &config);
        let mids = BandChannel::new(&spectral, &config.bands.mids, &config);
        let treble = BandChannel::new(&spectral, &config.bands.treble, &config);

        tracing::debug!(
            sample_rate = config.sample_rate,
            buffer_size = config.buffer_size,
            bin_hz = spectral.bin_hz(),
            bass_bins = ?bass.bins.range(),
            mids_bins = ?mids.bins.range(),
            treble_bins = ?treble.bins.range(),
            "analysis session ready"
        );
        for (band, channel) in config.bands.iter().zip([&bass, &mids, &treble]) {
            if channel.bins.is_empty() {
                tracing::debug!(band = %band.name, "band contains no fft bins and will read as zero");
            }
        }

        Ok(Self {
            transient: TransientDetector::new(config.transient.clone(), config.level_smoothing),
            frame: vec![0.0; config.buffer_size],
            state: SessionState::Ready,
            spectral,
            bass,
            mids,
            treble,
            bands: BandLevels::default(),
            smoothed_rms: 0.0,
            amplitude: 0.0,
            buffers_analyzed: 0,
            config,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Returns `Running` once a buffer has been analysed.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns how many buffers have been analysed.
    pub fn buffers_analyzed(&self) -> u64 {
        self.buffers_analyzed
    }

    /// Analyses one buffer, advancing smoothing by the audio time the
    /// delivered samples represent.
    pub fn analyze(&mut self, buffer: &[f32]) -> BandLevels {
        let dt = buffer.len() as f32 / self.config.sample_rate as f32;
        self.analyze_with_dt(buffer, dt)
    }

    /// Like [`analyze`](Self::analyze) with an explicit elapsed time in
    /// seconds, for callers that measure wall-clock intervals themselves.
    pub fn analyze_with_dt(&mut self, buffer: &[f32], dt: f32) -> BandLevels {
        fit_to_length(buffer, &mut self.frame);
        let magnitudes = self.spectral.transform(&self.frame);

        self.bands = BandLevels {
            bass: self.bass.update(magnitudes, dt),
            mids: self.mids.update(magnitudes, dt),
            treble: self.treble.update(magnitudes, dt),
        };

        let flux = self.transient.observe(magnitudes);
        let loudness = rms(&self.frame);
        self.transient.composite_level(loudness, flux, dt);

        self.buffers_analyzed += 1;
        self.state = SessionState::Running;
        self.bands
    }

    /// Smoothed RMS of the buffer scaled onto [0, 1]. Uses its own smoothing
    /// state, separate from the bands.
    pub fn amplitude(&mut self, buffer: &[f32]) -> f32 {
        fit_to_length(buffer, &mut self.frame);
        let alpha = self.config.amplitude_smoothing;
        self.smoothed_rms = alpha * rms(&self.frame) + (1.0 - alpha) * self.smoothed_rms;
        self.amplitude = (self.smoothed_rms * self.config.amplitude_scale).clamp(0.0, 1.0);
        self.amplitude
    }

    /// Runs [`analyze`](Self::analyze) and [`amplitude`](Self::amplitude) on
    /// the same buffer and returns the combined snapshot.
    pub fn process(&mut self, buffer: &[f32]) -> AnalysisFrame {
        self.analyze(buffer);
        self.amplitude(buffer);
        self.snapshot()
    }

    /// Composite level clamped to [0, 1]; 0 before the first buffer.
    pub fn level(&self) -> f32 {
        self.transient.level()
    }

    /// Transient overshoot above a level of 1.0; 0 before the first buffer.
    pub fn flux_boost(&self) -> f32 {
        self.transient.flux_boost()
    }

    /// Returns the latest smoothed band levels.
    pub fn bands(&self) -> BandLevels {
        self.bands
    }

    pub fn snapshot(&self) -> AnalysisFrame {
        AnalysisFrame {
            bands: self.bands,
            amplitude: self.amplitude,
            level: self.level(),
            flux_boost: self.flux_boost(),
        }
    }

    /// Magnitude spectrum of the most recent buffer.
    pub fn spectrum(&self) -> &[f32] {
        self.spectral.magnitudes()
    }
}

impl fmt::Debug for AnalysisSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisSession")
            .field("state", &self.state)
            .field("sample_rate", &self.config.sample_rate)
            .field("buffer_size", &self.config.buffer_size)
            .field("bands", &self.bands)
            .field("level", &self.transient.raw_level())
            .field("buffers_analyzed", &self.buffers_analyzed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;
    use crate::{LightshowError, Smoothing};

    const SAMPLE_RATE: u32 = 22_050;
    const BUFFER: usize = 1024;

    fn session() -> AnalysisSession {
        AnalysisSession::new(AnalysisConfig::default()).unwrap()
    }

    fn tone(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / SAMPLE_RATE as f32).sin())
            .collect()
    }

    fn noise(len: usize, seed: &mut u32) -> Vec<f32> {
        (0..len)
            .map(|_| {
                *seed ^= *seed << 13;
                *seed ^= *seed >> 17;
                *seed ^= *seed << 5;
                (*seed as f32 / u32::MAX as f32) * 2.0 - 1.0
            })
            .collect()
    }

    #[test]
    fn rejects_invalid_configuration() {
        let config = AnalysisConfig {
            gain_decay: 1.2,
            ..AnalysisConfig::default()
        };
        let err = AnalysisSession::new(config).unwrap_err();
        assert!(matches!(err, LightshowError::InvalidConfig(_)));
    }

    #[test]
    fn reports_zero_before_first_buffer() {
        let session = session();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.level(), 0.0);
        assert_eq!(session.flux_boost(), 0.0);
        assert_eq!(session.snapshot(), AnalysisFrame::default());
    }

    #[test]
    fn first_buffer_moves_to_running() {
        let mut session = session();
        session.analyze(&[0.0; BUFFER]);
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.buffers_analyzed(), 1);
    }

    #[test]
    fn mismatched_lengths_match_manual_padding_and_truncation() {
        let mut seed = 7;
        let chunks: Vec<Vec<f32>> = (0..12)
            .map(|i| noise(if i % 2 == 0 { 700 } else { 1500 }, &mut seed))
            .collect();

        let mut raw = session();
        let mut fitted = session();
        for chunk in &chunks {
            let mut manual = chunk.clone();
            manual.resize(BUFFER, 0.0);

            // identical elapsed time so only the length policy differs
            let dt = chunk.len() as f32 / SAMPLE_RATE as f32;
            let a = raw.analyze_with_dt(chunk, dt);
            let b = fitted.analyze_with_dt(&manual, dt);
            assert_eq!(a, b);
            assert_eq!(raw.level(), fitted.level());
            assert_eq!(raw.amplitude(chunk), fitted.amplitude(&manual));
        }
    }

    #[test]
    fn empty_buffer_is_treated_as_silence() {
        let mut session = session();
        let bands = session.analyze(&[]);
        assert_eq!(bands, BandLevels::default());
        assert_eq!(session.amplitude(&[]), 0.0);
    }

    #[test]
    fn bass_tone_drives_only_the_bass_band() {
        let mut session = session();
        let buffer = tone(100.0, 0.8, BUFFER);
        let mut bands = BandLevels::default();
        for _ in 0..50 {
            bands = session.analyze(&buffer);
        }
        assert!(bands.bass >= 0.9, "{bands:?}");
        assert!(bands.mids <= 0.1, "{bands:?}");
        assert!(bands.treble <= 0.1, "{bands:?}");
    }

    #[test]
    fn band_values_stay_in_unit_range() {
        let mut session = session();
        let mut seed = 99;
        for i in 0..200 {
            let amplitude = if i % 17 == 0 { 1.0 } else { 0.01 };
            let chunk: Vec<f32> = noise(BUFFER, &mut seed)
                .into_iter()
                .map(|s| s * amplitude)
                .collect();
            let bands = session.analyze(&chunk);
            for value in [bands.bass, bands.mids, bands.treble] {
                assert!((0.0..=1.0).contains(&value));
            }
            assert!((0.0..=1.0).contains(&session.level()));
            assert!(session.flux_boost() >= 0.0);
        }
    }

    #[test]
    fn impulse_after_silence_produces_flux_boost_that_decays() {
        let mut session = session();
        let silence = vec![0.0; BUFFER];
        let silent_frames = (2 * SAMPLE_RATE as usize) / BUFFER;
        for _ in 0..silent_frames {
            session.analyze(&silence);
        }
        assert_eq!(session.flux_boost(), 0.0);

        let mut impulse = vec![0.0; BUFFER];
        impulse[BUFFER / 2] = 1.0;
        session.analyze(&impulse);
        assert!(session.flux_boost() > 0.0);

        let decayed_after = (1..=10)
            .find(|_| {
                session.analyze(&silence);
                session.flux_boost() == 0.0
            })
            .expect("flux boost should decay");
        assert!(decayed_after <= 3);
    }

    /// Returns the overshoot peak of an impulse after two seconds of silence
    /// and the number of silent frames until the boost is gone again.
    fn boost_decay(release_tau: f32) -> (f32, usize) {
        let config = AnalysisConfig {
            level_smoothing: Smoothing::TimeConstants {
                attack_tau: 0.0,
                release_tau,
            },
            ..AnalysisConfig::default()
        };
        let mut session = AnalysisSession::new(config).unwrap();
        let silence = vec![0.0; BUFFER];
        for _ in 0..(2 * SAMPLE_RATE as usize) / BUFFER {
            session.analyze(&silence);
        }

        let mut impulse = vec![0.0; BUFFER];
        impulse[BUFFER / 2] = 1.0;
        session.analyze(&impulse);
        let peak = 1.0 + session.flux_boost();
        assert!(peak > 1.0, "tau {release_tau}: no overshoot");

        let frames = (1..=200)
            .find(|_| {
                session.analyze(&silence);
                session.flux_boost() == 0.0
            })
            .expect("flux boost should decay");
        (peak, frames)
    }

    #[test]
    fn flux_boost_decay_scales_with_release_time_constant() {
        let dt = BUFFER as f32 / SAMPLE_RATE as f32;
        let mut previous = 0;
        for release_tau in [0.05, 0.2, 0.5] {
            let (peak, frames) = boost_decay(release_tau);
            // exponential release from `peak` crosses 1.0 after tau * ln(peak) seconds
            let expected = (release_tau * peak.ln() / dt).ceil() as usize;
            assert!(
                frames <= expected.max(1) + 1,
                "tau {release_tau}: cleared after {frames} frames, expected about {expected}"
            );
            assert!(
                frames > previous,
                "tau {release_tau}: {frames} frames is not longer than {previous}"
            );
            previous = frames;
        }
    }

    #[test]
    fn silence_brings_level_back_to_zero() {
        let mut session = session();
        let mut seed = 3;
        for _ in 0..30 {
            session.analyze(&noise(BUFFER, &mut seed));
        }
        assert!(session.level() > 0.0);

        let silence = vec![0.0; BUFFER];
        for _ in 0..50 {
            session.analyze(&silence);
        }
        assert!(session.level() < 1e-3, "level {}", session.level());
        assert_eq!(session.flux_boost(), 0.0);
    }

    #[test]
    fn amplitude_is_scaled_and_clamped() {
        let mut session = session();
        assert_eq!(session.amplitude(&[0.0; BUFFER]), 0.0);

        let loud = vec![1.0; BUFFER];
        let mut amplitude = 0.0;
        for _ in 0..40 {
            amplitude = session.amplitude(&loud);
        }
        assert_eq!(amplitude, 1.0);

        let mut session = AnalysisSession::new(AnalysisConfig::default()).unwrap();
        let quiet = tone(440.0, 0.2, BUFFER);
        for _ in 0..80 {
            amplitude = session.amplitude(&quiet);
        }
        // rms of a 0.2 sine is ~0.1414, scaled by 2
        assert!((amplitude - 0.2828).abs() < 0.01, "{amplitude}");
    }

    #[test]
    fn time_constant_smoothing_handles_variable_buffers() {
        let config = AnalysisConfig {
            band_smoothing: Smoothing::TimeConstants {
                attack_tau: 0.01,
                release_tau: 0.3,
            },
            level_smoothing: Smoothing::TimeConstants {
                attack_tau: 0.0,
                release_tau: 0.2,
            },
            ..AnalysisConfig::default()
        };
        let mut session = AnalysisSession::new(config).unwrap();
        for len in [256, 1024, 512, 2048, 128, 1024] {
            let bands = session.analyze(&tone(100.0, 0.5, len));
            assert!((0.0..=1.0).contains(&bands.bass));
        }
        assert!(session.bands().bass > 0.5);
    }

    #[test]
    fn process_combines_all_signals() {
        let mut session = session();
        let frame = session.process(&tone(100.0, 0.8, BUFFER));
        assert_eq!(frame.bands, session.bands());
        assert!(frame.amplitude > 0.0);
        assert_eq!(frame.level, session.level());
    }
}
