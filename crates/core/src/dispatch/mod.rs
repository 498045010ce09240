//! Hand-off between the audio producer and the sink I/O.
//!
//! The producer publishes into a single-slot, latest-wins [`LatestSlot`]; a
//! background consumer takes whatever is newest and fans it out to every
//! [`ColorSink`]. Publishing never takes a lock or waits on the consumer, and
//! sink failures never travel back to the producer.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle, Scope},
    time::Duration,
};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};

use crate::{DispatchConfig, LightshowError, Result};

/// Colour and brightness for a light; the only value that leaves the core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorCommand {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// Percentage in [0, 100].
    pub brightness: u8,
}

impl ColorCommand {
    pub const MAX_BRIGHTNESS: u8 = 100;

    /// Builds a command, clamping brightness to 100.
    pub fn new(r: u8, g: u8, b: u8, brightness: u8) -> Self {
        Self {
            r,
            g,
            b,
            brightness: brightness.min(Self::MAX_BRIGHTNESS),
        }
    }

    /// Returns the colour without the brightness.
    pub fn rgb(&self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl fmt::Display for ColorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:02x}{:02x}{:02x} @ {}%",
            self.r, self.g, self.b, self.brightness
        )
    }
}

/// Destination for colour commands, typically a networked light.
///
/// Implementations are called from the consumer thread, possibly
/// concurrently with other sinks. Errors are logged and dropped; there are no
/// retries.
pub trait ColorSink: Send + Sync {
    fn name(&self) -> &str;

    fn set_color(&self, command: &ColorCommand) -> Result<()>;
}

/// Adapts a closure into a [`ColorSink`].
pub struct FnSink<F> {
    name: String,
    f: F,
}

impl<F> FnSink<F>
where
    F: Fn(&ColorCommand) -> Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> ColorSink for FnSink<F>
where
    F: Fn(&ColorCommand) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn set_color(&self, command: &ColorCommand) -> Result<()> {
        (self.f)(command)
    }
}

const PRESENT: u64 = 1 << 32;

fn pack(command: ColorCommand) -> u64 {
    PRESENT | u64::from(u32::from_le_bytes([command.r, command.g, command.b, command.brightness]))
}

fn unpack(word: u64) -> Option<ColorCommand> {
    if word & PRESENT == 0 {
        return None;
    }
    let [r, g, b, brightness] = (word as u32).to_le_bytes();
    Some(ColorCommand {
        r,
        g,
        b,
        brightness,
    })
}

/// Single-slot channel where a new command unconditionally replaces an
/// unconsumed one.
///
/// The command lives packed in one atomic word, so `put` and `take` are a
/// single swap. A one-token doorbell channel wakes a waiting consumer; ringing
/// a doorbell that already holds a token is a no-op.
#[derive(Debug)]
pub struct LatestSlot {
    value: AtomicU64,
    doorbell: Sender<()>,
    wakeups: Receiver<()>,
}

impl Default for LatestSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestSlot {
    pub fn new() -> Self {
        let (doorbell, wakeups) = bounded(1);
        Self {
            value: AtomicU64::new(0),
            doorbell,
            wakeups,
        }
    }

    /// Stores `command`, returning the unconsumed command it displaced.
    pub fn put(&self, command: ColorCommand) -> Option<ColorCommand> {
        let replaced = unpack(self.value.swap(pack(command), Ordering::AcqRel));
        self.wake();
        replaced
    }

    /// Takes the pending command without waiting.
    pub fn take(&self) -> Option<ColorCommand> {
        unpack(self.value.swap(0, Ordering::AcqRel))
    }

    /// Waits up to `timeout` for a command. Returns early, possibly with
    /// `None`, when [`wake`](Self::wake) is called.
    pub fn take_timeout(&self, timeout: Duration) -> Option<ColorCommand> {
        if let Some(command) = self.take() {
            return Some(command);
        }
        // the slot owns the sender, so the only error is a timeout
        let _ = self.wakeups.recv_timeout(timeout);
        self.take()
    }

    /// Returns `true` when no command is pending.
    pub fn is_empty(&self) -> bool {
        self.value.load(Ordering::Acquire) & PRESENT == 0
    }

    /// Wakes a waiting consumer so it can re-check external state such as a
    /// running flag.
    pub fn wake(&self) {
        let _ = self.doorbell.try_send(());
    }
}

/// Counters describing dispatcher activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub published: u64,
    /// Commands overwritten in the slot before the consumer saw them.
    pub replaced: u64,
    /// Commands taken by the consumer and fanned out.
    pub dispatched: u64,
    pub sink_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    replaced: AtomicU64,
    dispatched: AtomicU64,
    sink_failures: AtomicU64,
}

struct Shared {
    slot: LatestSlot,
    counters: Counters,
}

impl Shared {
    fn publish(&self, command: ColorCommand) {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        if self.slot.put(command).is_some() {
            self.counters.replaced.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Cloneable producer-side handle onto a dispatcher's slot.
#[derive(Clone)]
pub struct CommandPublisher {
    shared: Arc<Shared>,
}

impl CommandPublisher {
    /// Hands `command` to the consumer. Never blocks on sink I/O; an
    /// unconsumed previous command is discarded.
    pub fn publish(&self, command: ColorCommand) {
        self.shared.publish(command);
    }
}

impl fmt::Debug for CommandPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandPublisher").finish()
    }
}

/// A consumer thread together with its own run flag. The flag is never
/// shared with a later worker, so a detached consumer cannot be revived.
struct Worker {
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
    done: Receiver<()>,
}

impl Worker {
    fn has_finished(&self) -> bool {
        !matches!(self.done.try_recv(), Err(TryRecvError::Empty))
    }

    fn join(self) {
        if self.handle.join().is_err() {
            tracing::warn!("colour dispatcher thread panicked");
        }
    }
}

/// Owns the consumer thread that drains the slot and fans commands out to
/// the sinks.
pub struct CommandDispatcher {
    shared: Arc<Shared>,
    sinks: Arc<[Arc<dyn ColorSink>]>,
    config: DispatchConfig,
    worker: Option<Worker>,
    /// Consumer that missed its join timeout and may still be delivering.
    detached: Option<Worker>,
}

impl CommandDispatcher {
    pub fn new(sinks: Vec<Arc<dyn ColorSink>>, config: DispatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                slot: LatestSlot::new(),
                counters: Counters::default(),
            }),
            sinks: sinks.into(),
            config,
            worker: None,
            detached: None,
        })
    }

    /// Spawns the consumer thread. Calling it on a running dispatcher does
    /// nothing. Fails while a consumer detached by an earlier [`stop`] is
    /// still delivering, so at most one consumer ever drains the slot.
    ///
    /// [`stop`]: Self::stop
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        if let Some(previous) = self.detached.take() {
            if !previous.has_finished() {
                self.detached = Some(previous);
                return Err(LightshowError::msg(
                    "previous colour consumer is still delivering; retry once it finishes",
                ));
            }
            previous.join();
        }

        let running = Arc::new(AtomicBool::new(true));
        let shared = self.shared.clone();
        let sinks = self.sinks.clone();
        let flag = running.clone();
        let poll = Duration::from_millis(self.config.poll_timeout_ms);
        let (done_tx, done_rx) = bounded(1);

        let handle = thread::Builder::new()
            .name("color-dispatch".to_string())
            .spawn(move || consume(&shared, &sinks, poll, &flag, done_tx))?;

        tracing::info!(sinks = self.sinks.len(), "colour dispatcher started");
        self.worker = Some(Worker {
            handle,
            running,
            done: done_rx,
        });
        Ok(())
    }

    /// Clears the consumer's run flag and waits up to the configured join
    /// timeout for it. A dispatch already in progress completes first; a
    /// consumer that overruns the timeout is detached.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.running.store(false, Ordering::Release);
        self.shared.slot.wake();

        let timeout = Duration::from_millis(self.config.join_timeout_ms);
        match worker.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => worker.join(),
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout_ms = self.config.join_timeout_ms,
                    "colour dispatcher did not stop in time; detaching"
                );
                self.detached = Some(worker);
            }
        }

        tracing::info!(
            dispatched = self.shared.counters.dispatched.load(Ordering::Relaxed),
            "colour dispatcher stopped"
        );
    }

    /// Returns `true` between a successful [`start`](Self::start) and the
    /// next [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Returns a producer handle that stays valid across restarts.
    pub fn publisher(&self) -> CommandPublisher {
        CommandPublisher {
            shared: self.shared.clone(),
        }
    }

    pub fn publish(&self, command: ColorCommand) {
        self.shared.publish(command);
    }

    /// Returns a snapshot of the activity counters.
    pub fn stats(&self) -> DispatchStats {
        let counters = &self.shared.counters;
        DispatchStats {
            published: counters.published.load(Ordering::Relaxed),
            replaced: counters.replaced.load(Ordering::Relaxed),
            dispatched: counters.dispatched.load(Ordering::Relaxed),
            sink_failures: counters.sink_failures.load(Ordering::Relaxed),
        }
    }

    /// Returns the number of configured sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

impl Drop for CommandDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("sinks", &self.sinks.len())
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

fn consume(
    shared: &Shared,
    sinks: &[Arc<dyn ColorSink>],
    poll: Duration,
    running: &AtomicBool,
    done: Sender<()>,
) {
    thread::scope(|scope| {
        let fan_out = FanOut::spawn(scope, sinks);
        while running.load(Ordering::Acquire) {
            let Some(command) = shared.slot.take_timeout(poll) else {
                continue;
            };
            tracing::trace!(%command, "dispatching");
            let failures = fan_out.deliver(&command);
            shared.counters.dispatched.fetch_add(1, Ordering::Relaxed);
            shared
                .counters
                .sink_failures
                .fetch_add(failures as u64, Ordering::Relaxed);
        }
    });
    let _ = done.send(());
}

/// Delivers each command to every sink and waits for all of them.
///
/// With more than one sink, every sink gets a long-lived lane thread for the
/// lifetime of the consumer, so deliveries run concurrently without spawning
/// per command. A single sink, or one whose thread could not be spawned, is
/// called inline. Lanes end when the `FanOut` is dropped.
struct FanOut<'env> {
    sinks: &'env [Arc<dyn ColorSink>],
    lanes: Vec<Option<Sender<ColorCommand>>>,
    outcomes: Receiver<bool>,
}

impl<'env> FanOut<'env> {
    fn spawn<'scope>(
        scope: &'scope Scope<'scope, 'env>,
        sinks: &'env [Arc<dyn ColorSink>],
    ) -> Self {
        let (outcome_tx, outcomes) = unbounded();
        let lanes = if sinks.len() < 2 {
            vec![None; sinks.len()]
        } else {
            sinks
                .iter()
                .map(|sink| {
                    let sink = sink.as_ref();
                    let (lane, commands) = bounded::<ColorCommand>(1);
                    let outcome_tx = outcome_tx.clone();
                    thread::Builder::new()
                        .name(format!("color-sink-{}", sink.name()))
                        .spawn_scoped(scope, move || {
                            for command in commands {
                                if outcome_tx.send(deliver(sink, &command)).is_err() {
                                    break;
                                }
                            }
                        })
                        .map_err(|err| {
                            tracing::warn!(
                                sink = sink.name(),
                                %err,
                                "no thread for sink; delivering inline"
                            );
                        })
                        .ok()
                        .map(|_| lane)
                })
                .collect()
        };
        Self {
            sinks,
            lanes,
            outcomes,
        }
    }

    /// Returns the number of sinks that failed.
    fn deliver(&self, command: &ColorCommand) -> usize {
        let mut failures = 0;
        let mut pending = 0;
        for (sink, lane) in self.sinks.iter().zip(&self.lanes) {
            match lane {
                Some(lane) if lane.send(*command).is_ok() => pending += 1,
                _ => failures += usize::from(!deliver(sink.as_ref(), command)),
            }
        }
        failures
            + self
                .outcomes
                .iter()
                .take(pending)
                .filter(|delivered| !delivered)
                .count()
    }
}

fn deliver(sink: &dyn ColorSink, command: &ColorCommand) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| sink.set_color(command))) {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            tracing::debug!(sink = sink.name(), %err, "sink delivery failed");
            false
        }
        Err(_) => {
            tracing::warn!(sink = sink.name(), "sink panicked during delivery");
            false
        }
    }
}
