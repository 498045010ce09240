//! Core library for the Lightshow audio-reactive lighting pipeline.
//!
//! Fixed-size mono buffers go in; smoothed, auto-gained control signals (band
//! energies, loudness, transient strength) come out of the analysis session.
//! A colour policy turns them into [`ColorCommand`]s, which a latest-wins
//! dispatcher hands to sinks on a separate thread so that sink I/O never
//! stalls the audio path.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod mapping;

pub use analysis::{
    AnalysisFrame, AnalysisSession, AutoGainNormalizer, BandLevels, DualRateSmoother,
    RollingHistory, SessionState, Smoothing, SpectralAnalyzer, TransientDetector,
};
pub use audio::{StopHandle, Visualizer};
pub use config::{
    AnalysisConfig, AppConfig, BandLayout, BandSpec, DispatchConfig, TransientConfig, WindowKind,
};
pub use dispatch::{
    ColorCommand, ColorSink, CommandDispatcher, CommandPublisher, DispatchStats, FnSink,
    LatestSlot,
};
pub use error::{LightshowError, Result};
pub use mapping::{ColorMapper, ColorMode};
