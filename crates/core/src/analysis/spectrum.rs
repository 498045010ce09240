use std::{f32::consts::PI, fmt, ops::Range, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{BandSpec, WindowKind};

/// Copies `src` into `dst`, zero-padding or truncating to `dst.len()`.
///
/// Non-finite samples are replaced by silence. Every analysis path goes
/// through here, so the transform always sees exactly the configured length.
pub fn fit_to_length(src: &[f32], dst: &mut [f32]) {
    let copied = src.len().min(dst.len());
    for (out, sample) in dst.iter_mut().zip(&src[..copied]) {
        *out = if sample.is_finite() { *sample } else { 0.0 };
    }
    dst[copied..].fill(0.0);
}

/// Root mean square of a buffer; 0 for an empty one.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

/// Windowed real FFT over a fixed buffer length, producing `N/2 + 1`
/// magnitudes at a spacing of `sample_rate / N` Hz.
pub struct SpectralAnalyzer {
    size: usize,
    bin_hz: f32,
    plan: Arc<dyn RealToComplex<f32>>,
    window: Option<Vec<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    magnitudes: Vec<f32>,
}

impl SpectralAnalyzer {
    /// `size` must be non-zero; the session validates it first.
    pub fn new(sample_rate: u32, size: usize, window: WindowKind) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);
        let window = match window {
            WindowKind::Hann => Some((0..size).map(|i| hann_value(i, size)).collect()),
            WindowKind::None => None,
        };

        Self {
            size,
            bin_hz: sample_rate as f32 / size as f32,
            input: plan.make_input_vec(),
            spectrum: plan.make_output_vec(),
            scratch: plan.make_scratch_vec(),
            magnitudes: vec![0.0; size / 2 + 1],
            window,
            plan,
        }
    }

    /// Returns the transform length in samples.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the spacing between bins in Hz.
    pub fn bin_hz(&self) -> f32 {
        self.bin_hz
    }

    /// Returns the number of magnitude bins, `size / 2 + 1`.
    pub fn bin_count(&self) -> usize {
        self.magnitudes.len()
    }

    /// Transforms `buffer` and returns the magnitude spectrum. A buffer of the
    /// wrong length is fitted to the configured size first.
    pub fn transform(&mut self, buffer: &[f32]) -> &[f32] {
        fit_to_length(buffer, &mut self.input);
        if let Some(window) = &self.window {
            for (sample, weight) in self.input.iter_mut().zip(window) {
                *sample *= weight;
            }
        }

        match self
            .plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
        {
            Ok(()) => {
                for (magnitude, bin) in self.magnitudes.iter_mut().zip(&self.spectrum) {
                    *magnitude = bin.norm();
                }
            }
            Err(err) => {
                tracing::warn!(%err, "fft failed; emitting a silent spectrum");
                self.magnitudes.fill(0.0);
            }
        }

        &self.magnitudes
    }

    /// Magnitudes of the most recent transform.
    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    /// Resolves the bins whose centre frequency lies in the band.
    pub fn band_bins(&self, band: &BandSpec) -> BandBins {
        let mut hits = (0..self.bin_count()).filter(|&bin| band.contains(bin as f32 * self.bin_hz));
        let range = match hits.next() {
            Some(first) => {
                let last = hits.last().unwrap_or(first);
                first..last + 1
            }
            None => 0..0,
        };
        BandBins { range }
    }
}

impl fmt::Debug for SpectralAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("size", &self.size)
            .field("bin_hz", &self.bin_hz)
            .field("windowed", &self.window.is_some())
            .finish()
    }
}

/// Precomputed bin range of a band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandBins {
    range: Range<usize>,
}

impl BandBins {
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Mean magnitude over the band; 0 when no bin falls inside it.
    pub fn energy(&self, magnitudes: &[f32]) -> f32 {
        let end = self.range.end.min(magnitudes.len());
        let start = self.range.start.min(end);
        let bins = &magnitudes[start..end];
        if bins.is_empty() {
            return 0.0;
        }
        bins.iter().sum::<f32>() / bins.len() as f32
    }
}
