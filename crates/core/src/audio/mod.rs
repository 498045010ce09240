use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    AnalysisFrame, AnalysisSession, AppConfig, ColorCommand, ColorMapper, CommandPublisher, Result,
};

/// Cooperative stop flag shared between the producer loop and whoever wants
/// to end it.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Requests the loop to finish after the buffer it is processing.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Producer-side pipeline: analyse a chunk, map it to a colour and hand the
/// colour to the dispatcher. Everything here runs on the audio context and
/// never blocks on sink I/O.
#[derive(Debug)]
pub struct Visualizer {
    session: AnalysisSession,
    mapper: ColorMapper,
    publisher: CommandPublisher,
    stop: StopHandle,
    last_frame: AnalysisFrame,
    last_command: Option<ColorCommand>,
}

impl Visualizer {
    pub fn new(session: AnalysisSession, mapper: ColorMapper, publisher: CommandPublisher) -> Self {
        Self {
            session,
            mapper,
            publisher,
            stop: StopHandle::new(),
            last_frame: AnalysisFrame::default(),
            last_command: None,
        }
    }

    /// Builds the session and mapper described by `config`.
    pub fn from_config(config: &AppConfig, publisher: CommandPublisher) -> Result<Self> {
        let session = AnalysisSession::new(config.analysis.clone())?;
        Ok(Self::new(
            session,
            ColorMapper::new(config.mode.clone()),
            publisher,
        ))
    }

    /// Processes one chunk of mono samples and publishes the resulting colour.
    pub fn process_chunk(&mut self, chunk: &[f32]) -> ColorCommand {
        self.last_frame = self.session.process(chunk);
        let command = self.mapper.evaluate(&self.last_frame);
        self.publisher.publish(command);
        self.last_command = Some(command);
        command
    }

    /// Feeds chunks until the source ends or the stop handle fires; the flag
    /// is checked once per chunk. Returns the number of chunks processed.
    pub fn run<I, C>(&mut self, chunks: I) -> usize
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[f32]>,
    {
        let mut processed = 0;
        for chunk in chunks {
            if !self.stop.is_running() {
                tracing::debug!(processed, "visualizer stopped by request");
                break;
            }
            self.process_chunk(chunk.as_ref());
            processed += 1;
        }
        processed
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn session(&self) -> &AnalysisSession {
        &self.session
    }

    pub fn last_frame(&self) -> &AnalysisFrame {
        &self.last_frame
    }

    pub fn last_command(&self) -> Option<ColorCommand> {
        self.last_command
    }
}

#[cfg(test)]
mod tests {
    use std::{
        f32::consts::PI,
        sync::Mutex,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::{ColorSink, CommandDispatcher, DispatchConfig, FnSink};

    fn tone(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.8 * (2.0 * PI * 100.0 * i as f32 / 22_050.0).sin())
            .collect()
    }

    #[test]
    fn pushes_colours_through_to_sinks() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();
        let sink: Arc<dyn ColorSink> = Arc::new(FnSink::new("memory", move |c: &ColorCommand| {
            log.lock().unwrap().push(*c);
            Ok(())
        }));
        let mut dispatcher = CommandDispatcher::new(
            vec![sink],
            DispatchConfig {
                poll_timeout_ms: 5,
                ..DispatchConfig::default()
            },
        )
        .unwrap();
        dispatcher.start().unwrap();

        let config = AppConfig::default();
        let mut visualizer = Visualizer::from_config(&config, dispatcher.publisher()).unwrap();
        let chunk = tone(config.analysis.buffer_size);
        let mut last = None;
        for _ in 0..20 {
            last = Some(visualizer.process_chunk(&chunk));
        }
        assert_eq!(visualizer.last_command(), last);
        assert!(visualizer.last_frame().bands.bass > 0.9);

        let deadline = Instant::now() + Duration::from_secs(5);
        while received.lock().unwrap().last().copied() != last && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        dispatcher.stop();

        let received = received.lock().unwrap();
        assert_eq!(received.last().copied(), last);
        // bass drives red in the default mode
        assert!(received.last().unwrap().r > 200);
    }

    #[test]
    fn stop_handle_ends_the_run_loop() {
        let dispatcher = CommandDispatcher::new(Vec::new(), DispatchConfig::default()).unwrap();
        let mut visualizer =
            Visualizer::from_config(&AppConfig::default(), dispatcher.publisher()).unwrap();
        let stop = visualizer.stop_handle();

        let mut produced = 0;
        let source = std::iter::from_fn(|| {
            produced += 1;
            if produced == 5 {
                stop.stop();
            }
            Some(vec![0.0_f32; 512])
        });

        assert_eq!(visualizer.run(source), 4);
        assert!(!visualizer.stop_handle().is_running());
        assert_eq!(visualizer.session().buffers_analyzed(), 4);
    }

    #[test]
    fn run_consumes_finite_sources() {
        let dispatcher = CommandDispatcher::new(Vec::new(), DispatchConfig::default()).unwrap();
        let mut visualizer =
            Visualizer::from_config(&AppConfig::default(), dispatcher.publisher()).unwrap();
        let chunks = vec![tone(1024), tone(700), tone(1500)];
        assert_eq!(visualizer.run(&chunks), 3);
        assert_eq!(dispatcher.stats().published, 3);
    }
}
