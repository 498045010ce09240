use crate::{DualRateSmoother, Smoothing, TransientConfig};

/// Guards the percentile reference against an all-silent history.
const REFERENCE_EPSILON: f32 = 1e-6;

/// Fixed-capacity ring buffer of recent samples with an on-demand percentile.
#[derive(Debug, Clone)]
pub struct RollingHistory {
    samples: Vec<f32>,
    capacity: usize,
    next: usize,
    sorted: Vec<f32>,
}

impl RollingHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            next: 0,
            sorted: Vec::with_capacity(capacity),
        }
    }

    /// Appends a sample, evicting the oldest one once the buffer is full.
    pub fn push(&mut self, value: f32) {
        if self.samples.len() < self.capacity {
            self.samples.push(value);
        } else {
            self.samples[self.next] = value;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the number of samples kept before the oldest is evicted.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        let split = if self.samples.len() < self.capacity {
            0
        } else {
            self.next
        };
        self.samples[split..]
            .iter()
            .chain(&self.samples[..split])
            .copied()
    }

    /// Percentile in [0, 100] with linear interpolation between the closest
    /// ranks. `None` while the history is empty.
    pub fn percentile(&mut self, percentile: f32) -> Option<f32> {
        if self.samples.is_empty() {
            return None;
        }
        self.sorted.clear();
        self.sorted.extend_from_slice(&self.samples);
        self.sorted.sort_unstable_by(f32::total_cmp);

        let rank = (percentile.clamp(0.0, 100.0) / 100.0) * (self.sorted.len() - 1) as f32;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        let fraction = rank - lower as f32;
        let low = self.sorted[lower];
        let high = self.sorted[upper];
        Some(low + (high - low) * fraction)
    }
}

/// Half-wave rectified spectral flux plus the loudness/flux composite level.
#[derive(Debug, Clone)]
pub struct TransientDetector {
    config: TransientConfig,
    previous: Vec<f32>,
    loudness_history: RollingHistory,
    flux_history: RollingHistory,
    smoother: DualRateSmoother,
}

impl TransientDetector {
    pub fn new(config: TransientConfig, smoothing: Smoothing) -> Self {
        Self {
            loudness_history: RollingHistory::new(config.history_capacity),
            flux_history: RollingHistory::new(config.history_capacity),
            smoother: DualRateSmoother::new(smoothing),
            previous: Vec::new(),
            config,
        }
    }

    /// Mean positive change per bin since the previous spectrum; the current
    /// spectrum then replaces the previous one. The first frame is compared
    /// against silence.
    pub fn observe(&mut self, spectrum: &[f32]) -> f32 {
        if self.previous.len() != spectrum.len() {
            self.previous.clear();
            self.previous.resize(spectrum.len(), 0.0);
        }

        let rising: f32 = spectrum
            .iter()
            .zip(&self.previous)
            .map(|(current, previous)| (current - previous).max(0.0))
            .filter(|delta| delta.is_finite())
            .sum();
        self.previous.copy_from_slice(spectrum);

        rising / spectrum.len().max(1) as f32
    }

    /// Normalises loudness and flux against their recent history, blends them
    /// and smooths the result. The returned level is not clamped and may
    /// exceed 1 on transients.
    pub fn composite_level(&mut self, loudness: f32, flux: f32, dt: f32) -> f32 {
        let loudness_norm = normalise(&mut self.loudness_history, loudness, &self.config);
        let flux_norm = normalise(&mut self.flux_history, flux, &self.config);

        let ceiling = self.config.component_ceiling;
        let level = self.config.loudness_weight * loudness_norm.clamp(0.0, ceiling)
            + self.config.flux_weight * flux_norm.clamp(0.0, ceiling);
        self.smoother.update(level, dt)
    }

    /// Smoothed composite level before clamping.
    pub fn raw_level(&self) -> f32 {
        self.smoother.value()
    }

    /// Baseline level clamped to [0, 1].
    pub fn level(&self) -> f32 {
        self.smoother.value().clamp(0.0, 1.0)
    }

    /// Portion of the level above 1.0; the transient overshoot.
    pub fn flux_boost(&self) -> f32 {
        (self.smoother.value() - 1.0).max(0.0)
    }

    pub fn loudness_history(&self) -> &RollingHistory {
        &self.loudness_history
    }

    pub fn flux_history(&self) -> &RollingHistory {
        &self.flux_history
    }
}

/// Until the history holds more than `bootstrap_samples` entries the raw
/// value is scaled by a fixed multiplier instead, so the output jumps when
/// the percentile reference takes over.
fn normalise(history: &mut RollingHistory, raw: f32, config: &TransientConfig) -> f32 {
    let raw = if raw.is_finite() { raw.max(0.0) } else { 0.0 };
    history.push(raw);
    if history.len() > config.bootstrap_samples {
        let reference = history.percentile(config.percentile).unwrap_or(0.0);
        raw / (reference + REFERENCE_EPSILON)
    } else {
        raw * config.bootstrap_multiplier
    }
}
