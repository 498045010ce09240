//! Signal processing chain that turns fixed-size mono buffers into band
//! levels, loudness and transient strength.
//!
//! `spectrum` → `gain` → `smoothing` per band, with `transient` fed from the
//! same spectrum. [`AnalysisSession`] wires the pieces together.

mod gain;
mod session;
mod smoothing;
mod spectrum;
mod transient;

pub use gain::{AutoGainNormalizer, GAIN_EPSILON};
pub use session::{AnalysisFrame, AnalysisSession, BandLevels, SessionState};
pub use smoothing::{DualRateSmoother, Smoothing};
pub use spectrum::{fit_to_length, rms, BandBins, SpectralAnalyzer};
pub use transient::{RollingHistory, TransientDetector};
