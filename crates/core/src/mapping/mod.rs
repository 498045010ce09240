use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{AnalysisFrame, ColorCommand, LightshowError};

/// Shared parameters of the band-colour modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrightnessParams {
    pub brightness_boost: f32,
    /// Keeps the light visible during quiet passages.
    pub min_brightness: u8,
}

impl Default for BrightnessParams {
    fn default() -> Self {
        Self {
            brightness_boost: 1.5,
            min_brightness: 10,
        }
    }
}

/// Static colour whose brightness follows the overall energy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseParams {
    pub color: [u8; 3],
    pub min_brightness: u8,
    pub max_brightness: u8,
    /// Higher values flatten the response curve for more dramatic swings.
    pub sensitivity: f32,
}

impl Default for PulseParams {
    fn default() -> Self {
        Self {
            color: [255, 200, 150],
            min_brightness: 10,
            max_brightness: 100,
            sensitivity: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrobeParams {
    pub color: [u8; 3],
    /// Energy ratio against the tracked energy that triggers a flash.
    pub threshold: f32,
    pub min_brightness: u8,
    pub max_brightness: u8,
    pub sensitivity: f32,
}

impl Default for StrobeParams {
    fn default() -> Self {
        Self {
            color: [255, 255, 255],
            threshold: 1.3,
            min_brightness: 5,
            max_brightness: 100,
            sensitivity: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumPulseParams {
    pub brightness_emphasis: f32,
    pub min_brightness: u8,
    pub max_brightness: u8,
    pub sensitivity: f32,
}

impl Default for SpectrumPulseParams {
    fn default() -> Self {
        Self {
            brightness_emphasis: 2.0,
            min_brightness: 5,
            max_brightness: 100,
            sensitivity: 1.0,
        }
    }
}

/// Dominant-band hue with brightness driven by the composite level and
/// pushed past `max_brightness` by transient overshoot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransientPulseParams {
    pub min_brightness: u8,
    pub max_brightness: u8,
    pub gamma: f32,
    /// Brightness points added per unit of flux boost.
    pub boost_gain: f32,
    /// Levels below this read as silence.
    pub noise_gate: f32,
}

impl Default for TransientPulseParams {
    fn default() -> Self {
        Self {
            min_brightness: 10,
            max_brightness: 70,
            gamma: 0.9,
            boost_gain: 60.0,
            noise_gate: 0.05,
        }
    }
}

/// Colour policy: the algorithm kind plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColorMode {
    /// Bass → red, mids → green, treble → blue.
    FrequencyBands(BrightnessParams),
    /// Warm colours for high energy, cool for low.
    Energy(BrightnessParams),
    /// Palette chosen by the dominant band.
    Rainbow(BrightnessParams),
    Pulse(PulseParams),
    Strobe(StrobeParams),
    SpectrumPulse(SpectrumPulseParams),
    TransientPulse(TransientPulseParams),
}

impl Default for ColorMode {
    fn default() -> Self {
        Self::FrequencyBands(BrightnessParams::default())
    }
}

impl ColorMode {
    pub const NAMES: [&'static str; 7] = [
        "frequency_bands",
        "energy",
        "rainbow",
        "pulse",
        "strobe",
        "spectrum_pulse",
        "transient_pulse",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::FrequencyBands(_) => "frequency_bands",
            Self::Energy(_) => "energy",
            Self::Rainbow(_) => "rainbow",
            Self::Pulse(_) => "pulse",
            Self::Strobe(_) => "strobe",
            Self::SpectrumPulse(_) => "spectrum_pulse",
            Self::TransientPulse(_) => "transient_pulse",
        }
    }
}

impl FromStr for ColorMode {
    type Err = LightshowError;

    /// Parses a mode name into that mode with default parameters.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Ok(match name {
            "frequency_bands" => Self::FrequencyBands(BrightnessParams::default()),
            "energy" => Self::Energy(BrightnessParams::default()),
            "rainbow" => Self::Rainbow(BrightnessParams::default()),
            "pulse" => Self::Pulse(PulseParams::default()),
            "strobe" => Self::Strobe(StrobeParams::default()),
            "spectrum_pulse" => Self::SpectrumPulse(SpectrumPulseParams::default()),
            "transient_pulse" => Self::TransientPulse(TransientPulseParams::default()),
            other => {
                return Err(LightshowError::msg(format!(
                    "unknown colour mode `{other}` (expected one of {})",
                    Self::NAMES.join(", ")
                )))
            }
        })
    }
}

/// Evaluates a [`ColorMode`] against analysis frames. Holds the little state
/// some modes need between frames.
#[derive(Debug, Clone)]
pub struct ColorMapper {
    mode: ColorMode,
    strobe_energy: f32,
}

impl ColorMapper {
    pub fn new(mode: ColorMode) -> Self {
        Self {
            mode,
            strobe_energy: 0.0,
        }
    }

    pub fn mode(&self) -> &ColorMode {
        &self.mode
    }

    pub fn evaluate(&mut self, frame: &AnalysisFrame) -> ColorCommand {
        match &self.mode {
            ColorMode::FrequencyBands(params) => frequency_bands(params, frame),
            ColorMode::Energy(params) => energy(params, frame),
            ColorMode::Rainbow(params) => rainbow(params, frame),
            ColorMode::Pulse(params) => pulse(params, frame),
            ColorMode::Strobe(params) => strobe(params, frame, &mut self.strobe_energy),
            ColorMode::SpectrumPulse(params) => spectrum_pulse(params, frame),
            ColorMode::TransientPulse(params) => transient_pulse(params, frame),
        }
    }
}

fn channel(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 255.0) as u8
}

fn percent(value: f32, min: u8, max: u8) -> u8 {
    let max = max.min(100);
    let (min, max) = (min.min(max) as f32, max as f32);
    if value.is_nan() {
        return min as u8;
    }
    value.clamp(min, max) as u8
}

fn boosted_brightness(params: &BrightnessParams, intensity: f32) -> u8 {
    percent(
        params.min_brightness as f32 + intensity * 90.0 * params.brightness_boost,
        0,
        100,
    )
}

fn frequency_bands(params: &BrightnessParams, frame: &AnalysisFrame) -> ColorCommand {
    let bands = &frame.bands;
    ColorCommand::new(
        channel(bands.bass.powf(1.5) * 255.0),
        channel(bands.mids.powf(1.5) * 255.0),
        channel(bands.treble.powf(1.5) * 255.0),
        boosted_brightness(params, frame.amplitude),
    )
}

fn energy(params: &BrightnessParams, frame: &AnalysisFrame) -> ColorCommand {
    let total = frame.bands.average();
    let (r, g, b) = if total > 0.5 {
        (255.0 * total, 165.0 * total, 50.0 * (1.0 - total))
    } else {
        (128.0 * total, 50.0 * total, 255.0 * (1.0 - total))
    };
    ColorCommand::new(
        channel(r),
        channel(g),
        channel(b),
        boosted_brightness(params, total),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dominant {
    Bass,
    Mids,
    Treble,
}

/// Ties go to the lower band.
fn dominant_band(frame: &AnalysisFrame) -> (Dominant, f32) {
    let bands = &frame.bands;
    let mut best = (Dominant::Bass, bands.bass);
    for candidate in [(Dominant::Mids, bands.mids), (Dominant::Treble, bands.treble)] {
        if candidate.1 > best.1 {
            best = candidate;
        }
    }
    best
}

fn rainbow(params: &BrightnessParams, frame: &AnalysisFrame) -> ColorCommand {
    let (band, intensity) = dominant_band(frame);
    let palette: [f32; 3] = match band {
        Dominant::Bass => [255.0, 50.0, 200.0],
        Dominant::Mids => [200.0, 255.0, 50.0],
        Dominant::Treble => [50.0, 200.0, 255.0],
    };
    ColorCommand::new(
        channel(palette[0] * intensity),
        channel(palette[1] * intensity),
        channel(palette[2] * intensity),
        boosted_brightness(params, intensity),
    )
}

fn curve_power(base: f32, sensitivity: f32) -> f32 {
    if sensitivity > 0.0 {
        base / sensitivity
    } else {
        base
    }
}

fn pulse(params: &PulseParams, frame: &AnalysisFrame) -> ColorCommand {
    let power = curve_power(1.5, params.sensitivity);
    let range = params.max_brightness.saturating_sub(params.min_brightness) as f32;
    let brightness = params.min_brightness as f32 + frame.amplitude.max(0.0).powf(power) * range;
    let [r, g, b] = params.color;
    ColorCommand::new(
        r,
        g,
        b,
        percent(brightness, params.min_brightness, params.max_brightness),
    )
}

fn strobe(params: &StrobeParams, frame: &AnalysisFrame, tracked: &mut f32) -> ColorCommand {
    let threshold = if params.sensitivity > 0.0 {
        params.threshold / params.sensitivity
    } else {
        params.threshold
    };
    let current = if frame.amplitude.is_finite() {
        frame.amplitude
    } else {
        0.0
    };
    let ratio = if *tracked > 0.01 {
        current / *tracked
    } else {
        1.0
    };
    *tracked = current * 0.7 + *tracked * 0.3;

    let brightness = if ratio > threshold || current > 0.7 {
        params.max_brightness.min(100)
    } else {
        let ceiling = (params.max_brightness as f32 * 0.3).max(params.min_brightness as f32);
        let low = (current * 40.0).clamp(params.min_brightness as f32, ceiling);
        percent(low, params.min_brightness, params.max_brightness)
    };
    let [r, g, b] = params.color;
    ColorCommand::new(r, g, b, brightness)
}

fn dominant_palette(frame: &AnalysisFrame) -> [f32; 3] {
    let bands = &frame.bands;
    if bands.bass > bands.mids && bands.bass > bands.treble {
        [200.0, 50.0, 150.0]
    } else if bands.treble > bands.bass && bands.treble > bands.mids {
        [50.0, 150.0, 255.0]
    } else {
        [255.0, 180.0, 50.0]
    }
}

fn spectrum_pulse(params: &SpectrumPulseParams, frame: &AnalysisFrame) -> ColorCommand {
    // muted hue; brightness carries the music
    let [r, g, b] = dominant_palette(frame).map(|c| channel(c * 0.8));
    let emphasis = if params.brightness_emphasis > 0.0 {
        params.brightness_emphasis
    } else {
        1.0
    };
    let power = curve_power(1.0 / emphasis, params.sensitivity);
    let range = params.max_brightness.saturating_sub(params.min_brightness) as f32;
    let brightness = params.min_brightness as f32 + frame.amplitude.max(0.0).powf(power) * range;
    ColorCommand::new(
        r,
        g,
        b,
        percent(brightness, params.min_brightness, params.max_brightness),
    )
}

fn transient_pulse(params: &TransientPulseParams, frame: &AnalysisFrame) -> ColorCommand {
    let [r, g, b] = dominant_palette(frame).map(channel);
    let level = if frame.level < params.noise_gate {
        0.0
    } else {
        frame.level
    };
    let range = params.max_brightness.saturating_sub(params.min_brightness) as f32;
    let brightness = params.min_brightness as f32
        + level.powf(params.gamma.max(0.0)) * range
        + frame.flux_boost * params.boost_gain;
    ColorCommand::new(r, g, b, percent(brightness, params.min_brightness, 100))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BandLevels;

    fn frame(bass: f32, mids: f32, treble: f32, amplitude: f32) -> AnalysisFrame {
        AnalysisFrame {
            bands: BandLevels { bass, mids, treble },
            amplitude,
            level: amplitude,
            flux_boost: 0.0,
        }
    }

    #[test]
    fn frequency_bands_map_to_rgb_channels() {
        let mut mapper = ColorMapper::new(ColorMode::default());
        let command = mapper.evaluate(&frame(1.0, 0.0, 0.25, 0.5));
        assert_eq!(command.rgb(), [255, 0, 31]);
        // 10 + 0.5 * 90 * 1.5
        assert_eq!(command.brightness, 77);

        let command = mapper.evaluate(&frame(0.0, 0.0, 0.0, 1.0));
        assert_eq!(command.brightness, 100);
    }

    #[test]
    fn rainbow_follows_the_dominant_band() {
        let mut mapper = ColorMapper::new("rainbow".parse().unwrap());
        let command = mapper.evaluate(&frame(0.2, 0.1, 1.0, 0.0));
        assert_eq!(command.rgb(), [50, 200, 255]);
    }

    #[test]
    fn pulse_keeps_colour_and_stays_in_range() {
        let mut mapper = ColorMapper::new("pulse".parse().unwrap());
        let quiet = mapper.evaluate(&frame(0.0, 0.0, 0.0, 0.0));
        let loud = mapper.evaluate(&frame(0.0, 0.0, 0.0, 1.0));
        assert_eq!(quiet.rgb(), [255, 200, 150]);
        assert_eq!(quiet.brightness, 10);
        assert_eq!(loud.brightness, 100);
    }

    #[test]
    fn strobe_flashes_on_energy_spikes() {
        let mut mapper = ColorMapper::new("strobe".parse().unwrap());
        // let the energy tracker settle on the quiet level
        for _ in 0..10 {
            mapper.evaluate(&frame(0.0, 0.0, 0.0, 0.1));
        }
        let quiet = mapper.evaluate(&frame(0.0, 0.0, 0.0, 0.1));
        assert_eq!(quiet.brightness, 5);
        let flash = mapper.evaluate(&frame(0.0, 0.0, 0.0, 0.5));
        assert_eq!(flash.brightness, 100);
    }

    #[test]
    fn transient_pulse_uses_flux_boost() {
        let mut mapper = ColorMapper::new("transient_pulse".parse().unwrap());
        let steady = mapper.evaluate(&AnalysisFrame {
            level: 1.0,
            ..frame(0.9, 0.1, 0.1, 0.5)
        });
        assert_eq!(steady.brightness, 70);
        assert_eq!(steady.rgb(), [200, 50, 150]);

        let burst = mapper.evaluate(&AnalysisFrame {
            level: 1.0,
            flux_boost: 0.4,
            ..frame(0.9, 0.1, 0.1, 0.5)
        });
        assert_eq!(burst.brightness, 94);

        let gated = mapper.evaluate(&AnalysisFrame {
            level: 0.01,
            ..frame(0.0, 0.0, 0.0, 0.0)
        });
        assert_eq!(gated.brightness, 10);
    }

    #[test]
    fn every_mode_produces_valid_commands() {
        let frames = [
            frame(0.0, 0.0, 0.0, 0.0),
            frame(1.0, 1.0, 1.0, 1.0),
            frame(0.3, 0.8, 0.1, 0.6),
            AnalysisFrame {
                flux_boost: 0.5,
                ..frame(0.5, 0.2, 0.9, 1.0)
            },
            frame(f32::NAN, 0.5, 0.5, f32::NAN),
        ];
        for name in ColorMode::NAMES {
            let mode: ColorMode = name.parse().unwrap();
            assert_eq!(mode.name(), name);
            let mut mapper = ColorMapper::new(mode);
            for frame in &frames {
                assert!(mapper.evaluate(frame).brightness <= 100, "{name}");
            }
        }
    }

    #[test]
    fn unknown_mode_names_are_rejected() {
        let err = "disco".parse::<ColorMode>().unwrap_err();
        assert!(err.to_string().contains("disco"));
    }

    #[test]
    fn modes_deserialise_with_partial_parameters() {
        let mode: ColorMode =
            serde_json::from_str(r#"{ "kind": "pulse", "color": [0, 0, 255] }"#).unwrap();
        let ColorMode::Pulse(params) = mode else {
            panic!("expected pulse mode");
        };
        assert_eq!(params.color, [0, 0, 255]);
        assert_eq!(params.max_brightness, 100);
    }
}
