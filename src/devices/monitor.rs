// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Adaptive hot-plug device monitor.
//!
//! A dedicated poller thread samples the count-only fast path of the
//! enumeration service. While counts are stable the interval grows
//! geometrically toward `max_interval`; any delta snaps it back to
//! `base_interval`, publishes a count-change event, and fans out one full
//! enumeration task per changed kind onto the task pool. Scan completion is
//! published as a second event carrying the fresh list.
//!
//! Nothing here ever runs on the audio thread; subscribers receive events on
//! a bounded channel (drop-on-full) or as callbacks invoked on pool tasks.

use super::directory::DeviceDirectory;
use super::enumerator::DeviceEnumerator;
use super::types::{DeviceChange, DeviceChangeKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, info, trace, warn};

/// Tuning knobs for the poll loop.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval used immediately after a change.
    pub base_interval: Duration,
    /// Ceiling the interval grows toward while counts are stable.
    pub max_interval: Duration,
    /// Stable polls required before the interval starts growing.
    pub debounce_threshold: u32,
    /// Geometric growth factor applied past the debounce threshold.
    pub growth_factor: f64,
    /// Capacity of each subscriber channel; full subscribers drop events.
    pub event_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(50),
            max_interval: Duration::from_millis(200),
            debounce_threshold: 10,
            growth_factor: 1.5,
            event_capacity: 64,
        }
    }
}

/// EMA smoothing factor for per-tick execution time.
const TICK_EMA_ALPHA: f32 = 0.1;
/// Average tick cost above which a telemetry record is emitted.
const SLOW_TICK_THRESHOLD_MICROS: f32 = 50.0;

/// Telemetry hook; all methods default to no-ops.
pub trait MonitorTelemetry: Send + Sync {
    fn slow_tick(&self, _average: Duration) {}
}

/// Callback registered for device change events. Invoked on pool tasks,
/// never on the poller or audio thread.
pub type DeviceChangeCallback = Arc<dyn Fn(&DeviceChange) + Send + Sync>;

/// Atomic f32 stored as raw bits; relaxed ordering is enough for an
/// independent moving average.
#[derive(Debug, Default)]
struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

struct MonitorShared {
    config: MonitorConfig,
    enumerator: Arc<dyn DeviceEnumerator>,
    directory: Arc<DeviceDirectory>,
    runtime: tokio::runtime::Handle,
    subscribers: Mutex<Vec<tokio_mpsc::Sender<DeviceChange>>>,
    callbacks: Mutex<Vec<DeviceChangeCallback>>,
    telemetry: Option<Arc<dyn MonitorTelemetry>>,
    /// Current poll interval in milliseconds, for observability and tests.
    current_interval_ms: AtomicU64,
    avg_tick_micros: AtomicF32,
    closed: AtomicBool,
}

impl MonitorShared {
    fn publish(&self, event: DeviceChange) {
        trace!(
            kind = ?event.kind,
            audio_scanning = event.audio_scanning,
            midi_scanning = event.midi_scanning,
            "device event"
        );
        {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(tokio_mpsc::error::TrySendError::Full(_)) => {
                    // Slow consumer: drop this event, keep the subscription.
                    warn!("device event dropped for slow subscriber");
                    true
                }
                Err(tokio_mpsc::error::TrySendError::Closed(_)) => false,
            });
        }

        let callbacks: Vec<DeviceChangeCallback> = self.callbacks.lock().clone();
        for callback in callbacks {
            let event = event.clone();
            self.runtime.spawn(async move {
                callback(&event);
            });
        }
    }
}

fn spawn_audio_scan(shared: &Arc<MonitorShared>) {
    let task = Arc::clone(shared);
    shared.runtime.spawn(async move {
        let enumerator = Arc::clone(&task.enumerator);
        let devices = match tokio::task::spawn_blocking(move || enumerator.audio_devices()).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "audio enumeration task failed");
                return;
            }
        };
        task.directory.set_audio(devices.clone());
        let (audio_count, midi_count) = task.directory.counts();
        task.publish(DeviceChange {
            kind: DeviceChangeKind::Audio,
            audio_count,
            midi_count,
            audio_scanning: false,
            midi_scanning: false,
            audio_devices: Some(devices),
            midi_devices: None,
        });
    });
}

fn spawn_midi_scan(shared: &Arc<MonitorShared>) {
    let task = Arc::clone(shared);
    shared.runtime.spawn(async move {
        let enumerator = Arc::clone(&task.enumerator);
        let devices = match tokio::task::spawn_blocking(move || enumerator.midi_devices()).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "midi enumeration task failed");
                return;
            }
        };
        task.directory.set_midi(devices.clone());
        let (audio_count, midi_count) = task.directory.counts();
        task.publish(DeviceChange {
            kind: DeviceChangeKind::Midi,
            audio_count,
            midi_count,
            audio_scanning: false,
            midi_scanning: false,
            audio_devices: None,
            midi_devices: Some(devices),
        });
    });
}

/// One poll tick. Returns the interval to sleep before the next tick.
fn tick(shared: &Arc<MonitorShared>, interval: Duration, stable_polls: &mut u32) -> Duration {
    let started = Instant::now();
    let (audio_count, midi_count) = shared.enumerator.device_counts();
    let (prev_audio, prev_midi) = shared.directory.counts();

    let next = if audio_count == prev_audio && midi_count == prev_midi {
        *stable_polls += 1;
        if *stable_polls >= shared.config.debounce_threshold {
            let grown = interval.mul_f64(shared.config.growth_factor);
            grown.min(shared.config.max_interval)
        } else {
            interval
        }
    } else {
        let audio_changed = audio_count != prev_audio;
        let midi_changed = midi_count != prev_midi;
        debug!(
            audio_count,
            midi_count, audio_changed, midi_changed, "device count delta"
        );
        shared.directory.set_counts(audio_count, midi_count);
        *stable_polls = 0;

        let kind = match (audio_changed, midi_changed) {
            (true, false) => DeviceChangeKind::Audio,
            (false, true) => DeviceChangeKind::Midi,
            _ => DeviceChangeKind::Both,
        };
        shared.publish(DeviceChange {
            kind,
            audio_count,
            midi_count,
            audio_scanning: audio_changed,
            midi_scanning: midi_changed,
            audio_devices: None,
            midi_devices: None,
        });
        if audio_changed {
            spawn_audio_scan(shared);
        }
        if midi_changed {
            spawn_midi_scan(shared);
        }
        shared.config.base_interval
    };

    // Track tick cost; report when the moving average degrades, but never
    // alter polling behavior.
    let elapsed_micros = started.elapsed().as_secs_f32() * 1e6;
    let prev = shared.avg_tick_micros.get();
    let avg = if prev == 0.0 {
        elapsed_micros
    } else {
        TICK_EMA_ALPHA * elapsed_micros + (1.0 - TICK_EMA_ALPHA) * prev
    };
    shared.avg_tick_micros.set(avg);
    if avg > SLOW_TICK_THRESHOLD_MICROS {
        if let Some(telemetry) = &shared.telemetry {
            telemetry.slow_tick(Duration::from_secs_f32(avg / 1e6));
        }
    }

    shared
        .current_interval_ms
        .store(next.as_millis() as u64, Ordering::Relaxed);
    next
}

/// Handle to the running monitor.
pub struct DeviceMonitor {
    shared: Arc<MonitorShared>,
    shutdown_tx: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceMonitor {
    /// Prime the device directory and start the poller thread.
    pub fn start(
        config: MonitorConfig,
        enumerator: Arc<dyn DeviceEnumerator>,
        directory: Arc<DeviceDirectory>,
        runtime: tokio::runtime::Handle,
        telemetry: Option<Arc<dyn MonitorTelemetry>>,
    ) -> Self {
        // Initial synchronous enumeration so the session starts with a
        // populated directory instead of a spurious change event.
        directory.set_audio(enumerator.audio_devices());
        directory.set_midi(enumerator.midi_devices());
        let (audio_count, midi_count) = directory.counts();
        info!(audio_count, midi_count, "device monitor starting");

        let shared = Arc::new(MonitorShared {
            current_interval_ms: AtomicU64::new(config.base_interval.as_millis() as u64),
            config,
            enumerator,
            directory,
            runtime,
            subscribers: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
            telemetry,
            avg_tick_micros: AtomicF32::default(),
            closed: AtomicBool::new(false),
        });

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let loop_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("device-monitor".to_string())
            .spawn(move || run_poll_loop(loop_shared, shutdown_rx))
            .ok();

        Self {
            shared,
            shutdown_tx,
            thread,
        }
    }

    /// Subscribe to device change events on a bounded channel. Events are
    /// dropped, not blocked on, when the receiver falls behind.
    pub fn subscribe(&self) -> tokio_mpsc::Receiver<DeviceChange> {
        let (tx, rx) = tokio_mpsc::channel(self.shared.config.event_capacity);
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Register a callback invoked (on a pool task) for every event.
    pub fn register_callback(&self, callback: DeviceChangeCallback) {
        self.shared.callbacks.lock().push(callback);
    }

    /// Current poll interval; grows while the population is stable.
    pub fn current_interval(&self) -> Duration {
        Duration::from_millis(self.shared.current_interval_ms.load(Ordering::Relaxed))
    }

    /// Moving average of tick execution time.
    pub fn average_tick(&self) -> Duration {
        Duration::from_secs_f32(self.shared.avg_tick_micros.get().max(0.0) / 1e6)
    }

    /// Stop the poller and close all subscriber channels. Enumeration tasks
    /// still in flight may publish their final event or be dropped.
    pub fn close(&mut self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.shared.subscribers.lock().clear();
        self.shared.callbacks.lock().clear();
        info!("device monitor closed");
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_poll_loop(shared: Arc<MonitorShared>, shutdown_rx: mpsc::Receiver<()>) {
    let mut interval = shared.config.base_interval;
    let mut stable_polls: u32 = 0;

    loop {
        match shutdown_rx.recv_timeout(interval) {
            // Shutdown requested, or the handle was dropped.
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        interval = tick(&shared, interval, &mut stable_polls);
    }
    debug!("device poll loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::directory::DeviceDirectory;
    use crate::devices::enumerator::{test_audio_device, test_midi_device, StaticDeviceEnumerator};
    use crate::devices::types::{DeviceChange, DeviceChangeKind};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};
    use tokio::sync::mpsc as tokio_mpsc;
    use tokio::time::timeout;

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            base_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(40),
            debounce_threshold: 3,
            growth_factor: 1.5,
            event_capacity: 16,
        }
    }

    fn start_monitor(
        enumerator: Arc<StaticDeviceEnumerator>,
    ) -> (DeviceMonitor, Arc<DeviceDirectory>, tokio::runtime::Runtime) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let directory = Arc::new(DeviceDirectory::new());
        let monitor = DeviceMonitor::start(
            fast_config(),
            enumerator,
            Arc::clone(&directory),
            runtime.handle().clone(),
            None,
        );
        (monitor, directory, runtime)
    }

    fn next_event(
        runtime: &tokio::runtime::Runtime,
        rx: &mut tokio_mpsc::Receiver<DeviceChange>,
    ) -> DeviceChange {
        let _guard = runtime.enter();
        runtime
            .block_on(timeout(Duration::from_secs(2), rx.recv()))
            .expect("timed out waiting for device event")
            .expect("event channel closed")
    }

    #[test]
    fn test_hot_plug_event_ordering() {
        let enumerator = Arc::new(StaticDeviceEnumerator::new());
        for i in 0..5 {
            enumerator.push_audio(test_audio_device(
                &format!("Device {i}"),
                &format!("uid-{i}"),
                2,
                2,
            ));
        }
        let (monitor, directory, runtime) = start_monitor(Arc::clone(&enumerator));
        assert_eq!(directory.counts(), (5, 0));

        let mut rx = monitor.subscribe();
        enumerator.push_audio(test_audio_device("New Interface", "uid-new", 8, 8));

        let first = next_event(&runtime, &mut rx);
        assert_eq!(first.kind, DeviceChangeKind::Audio);
        assert_eq!(first.audio_count, 6);
        assert!(first.audio_scanning);
        assert!(!first.midi_scanning);
        assert!(first.audio_devices.is_none());

        let second = next_event(&runtime, &mut rx);
        assert_eq!(second.kind, DeviceChangeKind::Audio);
        assert_eq!(second.audio_count, 6);
        assert!(!second.audio_scanning);
        let devices = second.audio_devices.expect("scan event carries the list");
        assert_eq!(devices.len(), 6);
        assert!(directory.is_audio_online("uid-new"));
    }

    #[test]
    fn test_interval_grows_when_stable() {
        let enumerator = Arc::new(StaticDeviceEnumerator::with_builtin_devices());
        let (monitor, _directory, _runtime) = start_monitor(enumerator);

        let deadline = Instant::now() + Duration::from_secs(3);
        while monitor.current_interval() < Duration::from_millis(40) {
            assert!(Instant::now() < deadline, "interval never reached max");
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(monitor.current_interval(), Duration::from_millis(40));
    }

    #[test]
    fn test_change_resets_interval() {
        let enumerator = Arc::new(StaticDeviceEnumerator::with_builtin_devices());
        let (monitor, _directory, runtime) = start_monitor(Arc::clone(&enumerator));
        let mut rx = monitor.subscribe();

        // Let the interval grow first.
        let deadline = Instant::now() + Duration::from_secs(3);
        while monitor.current_interval() < Duration::from_millis(40) {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(10));
        }

        enumerator.push_midi(test_midi_device("Pad", "midi-pad"));
        let event = next_event(&runtime, &mut rx);
        assert_eq!(event.kind, DeviceChangeKind::Midi);
        assert!(event.midi_scanning);
        // Snapped back toward base; a few stable ticks may already have run.
        assert!(monitor.current_interval() < Duration::from_millis(40));
    }

    #[test]
    fn test_callback_invocation() {
        let enumerator = Arc::new(StaticDeviceEnumerator::with_builtin_devices());
        let (monitor, _directory, runtime) = start_monitor(Arc::clone(&enumerator));

        let seen = Arc::new(Mutex::new(Vec::<DeviceChangeKind>::new()));
        let seen_in_cb = Arc::clone(&seen);
        monitor.register_callback(Arc::new(move |event| {
            seen_in_cb.lock().push(event.kind);
        }));

        enumerator.push_audio(test_audio_device("Extra", "uid-extra", 2, 0));

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if !seen.lock().is_empty() {
                break;
            }
            assert!(Instant::now() < deadline, "callback never fired");
            thread::sleep(Duration::from_millis(10));
        }
        drop(runtime);
    }

    #[test]
    fn test_close_ends_subscriptions() {
        let enumerator = Arc::new(StaticDeviceEnumerator::with_builtin_devices());
        let (mut monitor, _directory, runtime) = start_monitor(enumerator);
        let mut rx = monitor.subscribe();
        monitor.close();
        // Channel is closed once the monitor shuts down.
        let _guard = runtime.enter();
        let got = runtime.block_on(timeout(Duration::from_secs(1), rx.recv()));
        assert_eq!(got.expect("recv timed out"), None);
        // Idempotent.
        monitor.close();
    }
}
