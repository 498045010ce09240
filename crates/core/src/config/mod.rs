use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{ColorMode, LightshowError, Result, Smoothing};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub analysis: AnalysisConfig,
    pub dispatch: DispatchConfig,
    pub mode: ColorMode,
}

impl AppConfig {
    /// Parses a (possibly partial) JSON document; missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.analysis.validate()?;
        self.dispatch.validate()
    }
}

/// A named frequency range `[low_hz, high_hz)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandSpec {
    pub name: String,
    pub low_hz: f32,
    pub high_hz: f32,
}

impl BandSpec {
    pub fn new(name: impl Into<String>, low_hz: f32, high_hz: f32) -> Self {
        Self {
            name: name.into(),
            low_hz,
            high_hz,
        }
    }

    pub fn contains(&self, hz: f32) -> bool {
        hz >= self.low_hz && hz < self.high_hz
    }

    fn validate(&self) -> Result<()> {
        if !self.low_hz.is_finite() || !self.high_hz.is_finite() {
            return Err(LightshowError::invalid(format!(
                "band `{}` bounds must be finite",
                self.name
            )));
        }
        if self.low_hz < 0.0 || self.high_hz < 0.0 {
            return Err(LightshowError::invalid(format!(
                "band `{}` bounds must not be negative",
                self.name
            )));
        }
        if self.low_hz >= self.high_hz {
            return Err(LightshowError::invalid(format!(
                "band `{}` requires low_hz < high_hz (got {} >= {})",
                self.name, self.low_hz, self.high_hz
            )));
        }
        Ok(())
    }
}

/// The three analysed bands. Ranges need not be contiguous or exhaustive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandLayout {
    pub bass: BandSpec,
    pub mids: BandSpec,
    pub treble: BandSpec,
}

impl Default for BandLayout {
    /// Log-ish split tuned for punchy response.
    fn default() -> Self {
        Self {
            bass: BandSpec::new("bass", 30.0, 200.0),
            mids: BandSpec::new("mids", 200.0, 2_500.0),
            treble: BandSpec::new("treble", 2_500.0, 12_000.0),
        }
    }
}

impl BandLayout {
    /// Wide bands: kick drums and bass guitar, vocals, cymbals and hi-hats.
    pub fn classic() -> Self {
        Self {
            bass: BandSpec::new("bass", 20.0, 250.0),
            mids: BandSpec::new("mids", 250.0, 4_000.0),
            treble: BandSpec::new("treble", 4_000.0, 20_000.0),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &BandSpec> {
        [&self.bass, &self.mids, &self.treble].into_iter()
    }
}

/// Analysis window applied before the transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    #[default]
    Hann,
    None,
}

/// Parameters of the loudness/flux normalisation and composite level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransientConfig {
    pub history_capacity: usize,
    /// Percentile of the rolling history used as the normalisation reference.
    pub percentile: f32,
    /// The history must hold more than this many samples before the percentile
    /// reference is used.
    pub bootstrap_samples: usize,
    /// Stand-in gain applied to raw values while the history is bootstrapping.
    pub bootstrap_multiplier: f32,
    pub loudness_weight: f32,
    pub flux_weight: f32,
    /// Upper clamp applied to each normalised component before weighting.
    pub component_ceiling: f32,
}

impl Default for TransientConfig {
    fn default() -> Self {
        Self {
            history_capacity: 50,
            percentile: 75.0,
            bootstrap_samples: 10,
            bootstrap_multiplier: 10.0,
            loudness_weight: 0.6,
            flux_weight: 0.4,
            component_ceiling: 1.5,
        }
    }
}

impl TransientConfig {
    fn validate(&self) -> Result<()> {
        if self.history_capacity == 0 {
            return Err(LightshowError::invalid("history_capacity must be at least 1"));
        }
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(LightshowError::invalid(format!(
                "percentile must lie in [0, 100] (got {})",
                self.percentile
            )));
        }
        for (name, value) in [
            ("bootstrap_multiplier", self.bootstrap_multiplier),
            ("loudness_weight", self.loudness_weight),
            ("flux_weight", self.flux_weight),
            ("component_ceiling", self.component_ceiling),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(LightshowError::invalid(format!(
                    "{name} must be finite and non-negative (got {value})"
                )));
            }
        }
        Ok(())
    }
}

/// Immutable configuration of an [`AnalysisSession`](crate::AnalysisSession).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub window: WindowKind,
    pub bands: BandLayout,
    pub band_smoothing: Smoothing,
    pub level_smoothing: Smoothing,
    /// Per-frame decay of the auto-gain peak hold, exclusive range (0, 1).
    pub gain_decay: f32,
    /// Peak every gain tracker starts from.
    pub initial_peak: f32,
    pub amplitude_smoothing: f32,
    /// Maps smoothed RMS onto [0, 1]; 2.0 treats an RMS of 0.5 as full scale.
    pub amplitude_scale: f32,
    pub transient: TransientConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22_050,
            buffer_size: 1024,
            window: WindowKind::Hann,
            bands: BandLayout::default(),
            band_smoothing: Smoothing::Coefficients {
                attack: 0.55,
                release: 0.15,
            },
            level_smoothing: Smoothing::Coefficients {
                attack: 0.8,
                release: 0.15,
            },
            gain_decay: 0.997,
            initial_peak: 1.0,
            amplitude_smoothing: 0.3,
            amplitude_scale: 2.0,
            transient: TransientConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// First-generation analyser: no window, wide bands, symmetric smoothing.
    pub fn classic() -> Self {
        Self {
            buffer_size: 2048,
            window: WindowKind::None,
            bands: BandLayout::classic(),
            band_smoothing: Smoothing::Coefficients {
                attack: 0.3,
                release: 0.3,
            },
            gain_decay: 0.995,
            ..Self::default()
        }
    }

    /// Spacing between FFT bins in Hz.
    pub fn bin_hz(&self) -> f32 {
        self.sample_rate as f32 / self.buffer_size.max(1) as f32
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(LightshowError::invalid("buffer_size must be greater than zero"));
        }
        if self.sample_rate == 0 {
            return Err(LightshowError::invalid("sample_rate must be greater than zero"));
        }
        for band in self.bands.iter() {
            band.validate()?;
        }
        self.band_smoothing.validate("band_smoothing")?;
        self.level_smoothing.validate("level_smoothing")?;
        if !(self.gain_decay > 0.0 && self.gain_decay < 1.0) {
            return Err(LightshowError::invalid(format!(
                "gain_decay must lie in (0, 1) (got {})",
                self.gain_decay
            )));
        }
        if !(self.initial_peak.is_finite() && self.initial_peak > 0.0) {
            return Err(LightshowError::invalid("initial_peak must be positive"));
        }
        if !(0.0..=1.0).contains(&self.amplitude_smoothing) {
            return Err(LightshowError::invalid(format!(
                "amplitude_smoothing must lie in [0, 1] (got {})",
                self.amplitude_smoothing
            )));
        }
        if !self.amplitude_scale.is_finite() || self.amplitude_scale < 0.0 {
            return Err(LightshowError::invalid("amplitude_scale must be non-negative"));
        }
        self.transient.validate()
    }
}

/// Configuration of the background consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// How long the consumer waits for a command before re-checking its
    /// running flag.
    pub poll_timeout_ms: u64,
    /// Upper bound on how long `stop` waits for the consumer thread.
    pub join_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
            join_timeout_ms: 1_000,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_timeout_ms == 0 {
            return Err(LightshowError::invalid("poll_timeout_ms must be greater than zero"));
        }
        Ok(())
    }
}
