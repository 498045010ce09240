/// Floor for the running peak and guard for the normalisation denominator.
pub const GAIN_EPSILON: f32 = 1e-9;

/// Immediate-attack, exponential-release peak hold used to normalise a
/// signal against its recent loudness.
///
/// A loud passage raises the peak at once, so quieter content that follows
/// reads lower until the peak has decayed again.
#[derive(Debug, Clone)]
pub struct AutoGainNormalizer {
    decay: f32,
    peak: f32,
}

impl AutoGainNormalizer {
    /// `decay` must lie in (0, 1); the session validates it before
    /// constructing trackers.
    pub fn new(decay: f32, initial_peak: f32) -> Self {
        Self {
            decay,
            peak: initial_peak.max(GAIN_EPSILON),
        }
    }

    /// Updates the peak with `raw` and returns `raw` normalised against it,
    /// clamped to [0, 1].
    pub fn update(&mut self, raw: f32) -> f32 {
        let raw = if raw.is_finite() { raw.max(0.0) } else { 0.0 };
        self.peak = raw.max(self.peak * self.decay).max(GAIN_EPSILON);
        (raw / (self.peak + GAIN_EPSILON)).clamp(0.0, 1.0)
    }

    /// Returns the current peak reference.
    pub fn peak(&self) -> f32 {
        self.peak
    }

    /// Returns the per-update decay factor.
    pub fn decay(&self) -> f32 {
        self.decay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_tracks_rises_immediately_and_decays_slowly() {
        let mut gain = AutoGainNormalizer::new(0.9, 1.0);
        let inputs = [0.5, 3.0, 0.2, 0.1, 2.0, 0.0, 0.0, 5.0, 1.0];

        for raw in inputs {
            let before = gain.peak();
            gain.update(raw);
            let after = gain.peak();

            assert!(after >= before * 0.9 - 1e-6);
            if raw > before * 0.9 {
                assert_eq!(after, raw);
            } else {
                assert!((after - before * 0.9).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn loud_passage_lowers_following_quiet_content() {
        let mut gain = AutoGainNormalizer::new(0.995, 1.0);
        let before = gain.update(0.5);
        gain.update(10.0);
        let after = gain.update(0.5);
        assert!(after < before);
    }

    #[test]
    fn silence_never_drives_peak_below_the_floor() {
        let mut gain = AutoGainNormalizer::new(0.5, 1.0);
        for _ in 0..500 {
            let normalised = gain.update(0.0);
            assert_eq!(normalised, 0.0);
        }
        assert!(gain.peak() >= GAIN_EPSILON);

        let normalised = gain.update(1e-12);
        assert!((0.0..=1.0).contains(&normalised));
        let normalised = gain.update(f32::NAN);
        assert_eq!(normalised, 0.0);
    }

    #[test]
    fn constant_input_normalises_to_one() {
        let mut gain = AutoGainNormalizer::new(0.997, 1.0);
        let mut last = 0.0;
        for _ in 0..20 {
            last = gain.update(42.0);
        }
        assert!(last > 0.999 && last <= 1.0);
    }
}
