// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The topology dispatcher.
//!
//! All structural mutations of the audio graph funnel through one dedicated
//! thread draining a bounded FIFO. Submitters receive a completion handle;
//! operations from a single submitter execute in submission order, and no
//! two operations ever run concurrently. Real-time parameter writes bypass
//! this queue entirely.

mod exec;

pub(crate) use exec::{ExecContext, MASTER_TAP_KEY};

use crate::error::{DispatcherError, EngineError, EngineResult};
use crate::graph::MetronomeConfig;
use crate::ids::{ChannelId, PluginInstanceId};
use crate::plugins::{ParameterValue, PluginBlueprint, PluginRecord};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::oneshot;
use tracing::{error, info};

/// Bounded queue depth. Submitters block briefly when the queue is full.
const QUEUE_CAPACITY: usize = 256;

/// Parameters for a channel to be created. Identifiers are minted by the
/// caller so restore can recreate channels under their saved ids.
#[derive(Debug, Clone)]
pub enum ChannelSpec {
    AudioInput {
        id: ChannelId,
        name: String,
        device_uid: String,
        input_bus: u32,
        volume: f32,
        pan: f32,
        /// Record the channel even when the device is offline (restore path).
        allow_offline: bool,
    },
    MidiInput {
        id: ChannelId,
        name: String,
        midi_device_uid: String,
        midi_channel: u8,
        soundbank_path: Option<String>,
        volume: f32,
        pan: f32,
        allow_offline: bool,
    },
    Playback {
        id: ChannelId,
        name: String,
        file_path: String,
        can_loop: bool,
        playback_rate: f32,
        pitch_shift_semitones: f32,
        metronome: Option<MetronomeConfig>,
        volume: f32,
        /// Record the channel even when the file is missing (restore path).
        allow_missing: bool,
    },
    Aux {
        id: ChannelId,
        name: String,
        volume: f32,
    },
}

/// One topology-mutating operation.
#[derive(Debug, Clone)]
pub enum Operation {
    StartEngine,
    StopEngine,
    SetMute {
        channel_id: ChannelId,
        muted: bool,
    },
    PluginBypass {
        channel_id: ChannelId,
        plugin_id: PluginInstanceId,
        bypassed: bool,
    },
    AddPlugin {
        channel_id: ChannelId,
        instance_id: PluginInstanceId,
        blueprint: PluginBlueprint,
        position: usize,
        bypassed: bool,
        /// Introspection result, resolved on the task pool before
        /// submission so the dispatcher thread never blocks on host I/O.
        /// `None` means introspection failed; the slot is kept with
        /// `is_installed = false`.
        record: Option<PluginRecord>,
        /// Saved values to apply instead of schema defaults (restore path).
        parameters: Option<Vec<ParameterValue>>,
    },
    RemovePlugin {
        channel_id: ChannelId,
        plugin_id: PluginInstanceId,
    },
    ReorderPlugin {
        channel_id: ChannelId,
        from: usize,
        to: usize,
    },
    DeviceChange {
        channel_id: ChannelId,
        new_device_uid: String,
    },
    OutputDeviceChange {
        new_device_uid: String,
    },
    CreateChannel(Box<ChannelSpec>),
    DeleteChannel {
        channel_id: ChannelId,
    },
    AddAuxSend {
        channel_id: ChannelId,
        target_aux: ChannelId,
        level: f32,
        pre_fader: bool,
    },
    RemoveAuxSend {
        channel_id: ChannelId,
        target_aux: ChannelId,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartEngine => "start_engine",
            Self::StopEngine => "stop_engine",
            Self::SetMute { .. } => "set_mute",
            Self::PluginBypass { .. } => "plugin_bypass",
            Self::AddPlugin { .. } => "add_plugin",
            Self::RemovePlugin { .. } => "remove_plugin",
            Self::ReorderPlugin { .. } => "reorder_plugin",
            Self::DeviceChange { .. } => "device_change",
            Self::OutputDeviceChange { .. } => "output_device_change",
            Self::CreateChannel(_) => "create_channel",
            Self::DeleteChannel { .. } => "delete_channel",
            Self::AddAuxSend { .. } => "add_aux_send",
            Self::RemoveAuxSend { .. } => "remove_aux_send",
        }
    }
}

/// Completion handle for a submitted operation.
#[derive(Debug)]
pub struct OpHandle {
    rx: oneshot::Receiver<EngineResult<()>>,
}

impl OpHandle {
    /// Block the submitter until the operation completes.
    pub fn wait(self) -> EngineResult<()> {
        match self.rx.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(DispatcherError::Abandoned.into()),
        }
    }

    /// Await completion from async contexts.
    pub async fn resolved(self) -> EngineResult<()> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(DispatcherError::Abandoned.into()),
        }
    }

    /// Poll without blocking; `None` while the operation is still queued or
    /// executing.
    pub fn try_result(&mut self) -> Option<EngineResult<()>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(Err(DispatcherError::Abandoned.into()))
            }
        }
    }
}

struct Envelope {
    op: Operation,
    done: oneshot::Sender<EngineResult<()>>,
}

/// Handle to the dispatcher thread.
pub struct Dispatcher {
    tx: Mutex<Option<SyncSender<Envelope>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    stopped: AtomicBool,
}

impl Dispatcher {
    /// Spawn the dispatcher thread over the given execution context.
    pub(crate) fn spawn(ctx: ExecContext) -> Result<Self, DispatcherError> {
        let (tx, rx) = sync_channel::<Envelope>(QUEUE_CAPACITY);
        let handle = thread::Builder::new()
            .name("graph-dispatcher".to_string())
            .spawn(move || {
                for envelope in rx {
                    let result = ctx.execute(envelope.op);
                    if let Err(e) = &result {
                        error!(error = %e, "operation failed");
                    }
                    // Receiver may have been dropped; completion is then
                    // fire-and-forget.
                    let _ = envelope.done.send(result);
                }
                info!("dispatcher drained and stopped");
            })
            .map_err(|e| DispatcherError::SpawnFailed(e.to_string()))?;

        let thread_id = handle.thread().id();
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(handle)),
            thread_id,
            stopped: AtomicBool::new(false),
        })
    }

    /// Enqueue an operation and return its completion handle.
    ///
    /// Submitting from the dispatcher thread itself is rejected: the queue
    /// is drained by that thread, so waiting on the handle would deadlock.
    pub fn submit(&self, op: Operation) -> Result<OpHandle, DispatcherError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(DispatcherError::Stopped);
        }
        if thread::current().id() == self.thread_id {
            return Err(DispatcherError::ReentrantSubmit);
        }

        let (done, rx) = oneshot::channel();
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(DispatcherError::Stopped)?;
        tx.send(Envelope { op, done })
            .map_err(|_| DispatcherError::Stopped)?;
        Ok(OpHandle { rx })
    }

    /// Convenience: submit and block until completion.
    pub fn submit_and_wait(&self, op: Operation) -> EngineResult<()> {
        self.submit(op).map_err(EngineError::from)?.wait()
    }

    /// Stop accepting work, drain the queue, and join the thread.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the sender lets the thread finish the remaining queue.
        self.tx.lock().take();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AudioBackend, NullBackend};
    use crate::devices::enumerator::test_audio_device;
    use crate::devices::DeviceDirectory;
    use crate::error::DispatcherError;
    use crate::graph::{ChannelHeader, GraphModel, InputNodeTable, MasterChannel, PluginChain};
    use crate::ids::ChannelId;
    use crate::spec::AudioSpec;
    use parking_lot::RwLock;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    struct Harness {
        dispatcher: Dispatcher,
        model: Arc<RwLock<GraphModel>>,
        backend: Arc<NullBackend>,
    }

    fn harness() -> Harness {
        let backend = Arc::new(NullBackend::new());
        let devices = Arc::new(DeviceDirectory::new());
        devices.set_audio(vec![
            test_audio_device("Mic", "BuiltInMicrophone", 2, 0),
            test_audio_device("Speakers", "BuiltInSpeakerDevice", 0, 2),
            test_audio_device("Interface", "USB-Interface", 8, 8),
        ]);
        let master = MasterChannel {
            header: ChannelHeader::new(ChannelId::new(), "master", 1.0),
            plugin_chain: PluginChain::new(),
            output_device_uid: "BuiltInSpeakerDevice".to_string(),
            metering_enabled: false,
        };
        let model = Arc::new(RwLock::new(GraphModel::new(master)));

        let ctx = ExecContext {
            spec: AudioSpec::default(),
            model: Arc::clone(&model),
            inputs: Arc::new(RwLock::new(InputNodeTable::new())),
            backend: Arc::clone(&backend) as Arc<dyn crate::backend::AudioBackend>,
            devices,
            running: Arc::new(AtomicBool::new(false)),
        };
        Harness {
            dispatcher: Dispatcher::spawn(ctx).unwrap(),
            model,
            backend,
        }
    }

    fn mic_spec(id: ChannelId) -> Operation {
        Operation::CreateChannel(Box::new(ChannelSpec::AudioInput {
            id,
            name: "mic".to_string(),
            device_uid: "BuiltInMicrophone".to_string(),
            input_bus: 0,
            volume: 0.8,
            pan: 0.0,
            allow_offline: false,
        }))
    }

    #[test]
    fn test_submission_order_preserved() {
        let h = harness();
        let id = ChannelId::new();
        h.dispatcher.submit_and_wait(mic_spec(id)).unwrap();

        // Alternate mutes; the final state must match the last submission.
        let mut last = None;
        for i in 0..100 {
            let muted = i % 2 == 0;
            last = Some(
                h.dispatcher
                    .submit(Operation::SetMute {
                        channel_id: id,
                        muted,
                    })
                    .unwrap(),
            );
        }
        last.unwrap().wait().unwrap();
        let model = h.model.read();
        // 100 iterations, last i = 99, muted = false.
        assert!(!model.channel(id).unwrap().header().muted);
    }

    #[test]
    fn test_failed_operation_does_not_stall_queue() {
        let h = harness();
        let id = ChannelId::new();
        // Unknown channel: fails.
        let bad = h
            .dispatcher
            .submit(Operation::SetMute {
                channel_id: id,
                muted: true,
            })
            .unwrap();
        // Queue continues with the next operation.
        let good = h.dispatcher.submit(mic_spec(id)).unwrap();
        assert!(bad.wait().is_err());
        good.wait().unwrap();
        assert!(h.model.read().channel(id).is_some());
    }

    #[test]
    fn test_submit_after_shutdown_rejected() {
        let h = harness();
        h.dispatcher.shutdown();
        assert!(matches!(
            h.dispatcher.submit(Operation::StopEngine),
            Err(DispatcherError::Stopped)
        ));
    }

    #[test]
    fn test_try_result_polls() {
        let h = harness();
        let id = ChannelId::new();
        let mut handle = h.dispatcher.submit(mic_spec(id)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(result) = handle.try_result() {
                result.unwrap();
                break;
            }
            assert!(Instant::now() < deadline, "operation never completed");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_mute_gates_the_mix_edge() {
        let h = harness();
        let id = ChannelId::new();
        h.dispatcher.submit_and_wait(mic_spec(id)).unwrap();

        let mixer = h.backend.main_mixer_node();
        let source = h.model.read().channel(id).unwrap().source_node().unwrap();
        assert!(h.backend.has_edge(source, mixer));

        h.dispatcher
            .submit_and_wait(Operation::SetMute {
                channel_id: id,
                muted: true,
            })
            .unwrap();
        assert!(!h.backend.has_edge(source, mixer));

        h.dispatcher
            .submit_and_wait(Operation::SetMute {
                channel_id: id,
                muted: false,
            })
            .unwrap();
        assert!(h.backend.has_edge(source, mixer));
    }

    #[test]
    fn test_plugin_traffic_interleaves_with_other_edits() {
        let h = harness();
        let id = ChannelId::new();
        h.dispatcher.submit_and_wait(mic_spec(id)).unwrap();

        let record = crate::plugins::PluginRecord {
            blueprint: crate::plugins::PluginBlueprint::new("aufx", "gain", "acme", "Trim"),
            category: "Utility".to_string(),
            parameters: vec![],
        };

        let dispatcher = Arc::new(h.dispatcher);
        let adder = {
            let dispatcher = Arc::clone(&dispatcher);
            let record = record.clone();
            thread::spawn(move || {
                for i in 0..20 {
                    dispatcher
                        .submit_and_wait(Operation::AddPlugin {
                            channel_id: id,
                            instance_id: crate::ids::PluginInstanceId::new(),
                            blueprint: record.blueprint.clone(),
                            position: i,
                            bypassed: false,
                            record: Some(record.clone()),
                            parameters: None,
                        })
                        .unwrap();
                }
            })
        };
        let muter = {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                for i in 0..200 {
                    dispatcher
                        .submit_and_wait(Operation::SetMute {
                            channel_id: id,
                            muted: i % 2 == 0,
                        })
                        .unwrap();
                }
            })
        };
        adder.join().unwrap();
        muter.join().unwrap();

        let model = h.model.read();
        let chain = model.channel(id).unwrap().plugin_chain().unwrap();
        assert_eq!(chain.len(), 20);
        assert!(chain.entries.iter().all(|p| p.is_installed));
    }

    /// Synthetic load: many submitters, null engine, all operations must
    /// complete. Exercises queue throughput without timing assertions that
    /// would flake on loaded CI machines.
    #[test]
    fn test_concurrent_submitters_all_complete() {
        let h = harness();
        let id = ChannelId::new();
        h.dispatcher.submit_and_wait(mic_spec(id)).unwrap();

        let dispatcher = Arc::new(h.dispatcher);
        let mut workers = Vec::new();
        for worker in 0..50 {
            let dispatcher = Arc::clone(&dispatcher);
            workers.push(thread::spawn(move || {
                for i in 0..200 {
                    let handle = loop {
                        match dispatcher.submit(Operation::SetMute {
                            channel_id: id,
                            muted: (worker + i) % 2 == 0,
                        }) {
                            Ok(h) => break h,
                            Err(DispatcherError::Stopped) => panic!("dispatcher stopped"),
                            Err(e) => panic!("unexpected submit error: {e}"),
                        }
                    };
                    handle.wait().unwrap();
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }
    }
}
