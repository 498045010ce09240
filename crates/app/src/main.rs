use std::{f32::consts::PI, path::PathBuf, sync::Arc, thread, time::Duration};

use clap::{Parser, Subcommand};
use lightshow_core::{
    AnalysisConfig, AppConfig, ColorCommand, ColorMode, ColorSink, CommandDispatcher, Visualizer,
};
use tracing_subscriber::EnvFilter;

fn main() -> lightshow_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo {
            config,
            mode,
            seconds,
            realtime,
        } => run_demo(config.as_ref(), mode, seconds, realtime),
        Commands::PrintConfig { classic } => print_config(classic),
        Commands::Modes => {
            for name in ColorMode::NAMES {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn run_demo(
    config_path: Option<&PathBuf>,
    mode: Option<String>,
    seconds: f32,
    realtime: bool,
) -> lightshow_core::Result<()> {
    let mut config = match config_path {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(mode) = mode {
        config.mode = mode.parse()?;
    }
    tracing::info!(
        mode = config.mode.name(),
        sample_rate = config.analysis.sample_rate,
        buffer_size = config.analysis.buffer_size,
        seconds,
        "starting demo"
    );

    let sinks: Vec<Arc<dyn ColorSink>> = vec![Arc::new(LogSink::new("console"))];
    let mut dispatcher = CommandDispatcher::new(sinks, config.dispatch.clone())?;
    dispatcher.start()?;

    let mut visualizer = Visualizer::from_config(&config, dispatcher.publisher())?;
    let signal = DemoSignal::new(&config.analysis, seconds);
    let sample_rate = config.analysis.sample_rate as f32;
    let processed = visualizer.run(signal.inspect(|chunk| {
        if realtime {
            thread::sleep(Duration::from_secs_f32(chunk.len() as f32 / sample_rate));
        }
    }));

    dispatcher.stop();
    let stats = dispatcher.stats();
    tracing::info!(
        processed,
        published = stats.published,
        replaced = stats.replaced,
        dispatched = stats.dispatched,
        sink_failures = stats.sink_failures,
        last = ?visualizer.last_command(),
        "demo finished"
    );
    Ok(())
}

fn print_config(classic: bool) -> lightshow_core::Result<()> {
    let config = AppConfig {
        analysis: if classic {
            AnalysisConfig::classic()
        } else {
            AnalysisConfig::default()
        },
        ..AppConfig::default()
    };
    println!("{}", config.to_json_pretty()?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Sink that reports colours through the log instead of a light.
struct LogSink {
    name: String,
}

impl LogSink {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl ColorSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_color(&self, command: &ColorCommand) -> lightshow_core::Result<()> {
        tracing::debug!(sink = %self.name, %command, "set colour");
        Ok(())
    }
}

/// Synthetic test track: a kick every half second, a sustained mid chord and
/// hi-hat noise on the off-beats. Chunk lengths wobble around the configured
/// buffer size the way real capture callbacks do.
struct DemoSignal {
    sample_rate: f32,
    buffer_size: usize,
    position: usize,
    total: usize,
    chunk_index: usize,
    noise: u32,
}

impl DemoSignal {
    fn new(config: &AnalysisConfig, seconds: f32) -> Self {
        Self {
            sample_rate: config.sample_rate as f32,
            buffer_size: config.buffer_size,
            position: 0,
            total: (seconds.max(0.0) * config.sample_rate as f32) as usize,
            chunk_index: 0,
            noise: 0x1234_5678,
        }
    }

    fn next_noise(&mut self) -> f32 {
        self.noise ^= self.noise << 13;
        self.noise ^= self.noise >> 17;
        self.noise ^= self.noise << 5;
        (self.noise as f32 / u32::MAX as f32) * 2.0 - 1.0
    }

    fn sample(&mut self, index: usize) -> f32 {
        let t = index as f32 / self.sample_rate;
        let beat = t % 0.5;
        let kick = (-beat * 18.0).exp() * (2.0 * PI * 60.0 * t).sin();
        let chord = [330.0, 415.0, 495.0]
            .iter()
            .map(|freq| (2.0 * PI * freq * t).sin())
            .sum::<f32>()
            * 0.08;
        let off_beat = (t + 0.25) % 0.5;
        let hat = (-off_beat * 60.0).exp() * self.next_noise() * 0.3;
        (0.6 * kick + chord + hat).clamp(-1.0, 1.0)
    }
}

impl Iterator for DemoSignal {
    type Item = Vec<f32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.total {
            return None;
        }
        let wobble = [0, 64, 0, 96, 0, 32][self.chunk_index % 6];
        let len = (self.buffer_size.saturating_sub(wobble))
            .max(1)
            .min(self.total - self.position);
        let start = self.position;
        let chunk = (start..start + len).map(|i| self.sample(i)).collect();
        self.position += len;
        self.chunk_index += 1;
        Some(chunk)
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive lighting pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a synthetic track through the analysis pipeline and log the colours.
    Demo {
        /// JSON configuration file; defaults are used when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Colour mode overriding the configuration.
        #[arg(short, long)]
        mode: Option<String>,
        /// Length of the synthetic track in seconds.
        #[arg(short, long, default_value_t = 10.0)]
        seconds: f32,
        /// Pace chunks at the audio rate instead of as fast as possible.
        #[arg(long)]
        realtime: bool,
    },
    /// Print the default configuration as JSON.
    PrintConfig {
        /// Print the first-generation analyser preset instead.
        #[arg(long)]
        classic: bool,
    },
    /// List the available colour modes.
    Modes,
}
