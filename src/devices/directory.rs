// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared cache of the current device population.
//!
//! Counts are plain atomics so the poller's fast path never takes a lock;
//! the full lists sit behind reader-writer guards and are replaced wholesale
//! by enumeration tasks.

use super::types::{AudioDevice, MidiDevice};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct DeviceDirectory {
    audio_count: AtomicUsize,
    midi_count: AtomicUsize,
    audio: RwLock<Vec<AudioDevice>>,
    midi: RwLock<Vec<MidiDevice>>,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock-free read of the last observed `(audio, midi)` counts.
    pub fn counts(&self) -> (usize, usize) {
        (
            self.audio_count.load(Ordering::Acquire),
            self.midi_count.load(Ordering::Acquire),
        )
    }

    pub fn set_counts(&self, audio: usize, midi: usize) {
        self.audio_count.store(audio, Ordering::Release);
        self.midi_count.store(midi, Ordering::Release);
    }

    /// Replace the cached audio list (and its count).
    pub fn set_audio(&self, devices: Vec<AudioDevice>) {
        self.audio_count.store(devices.len(), Ordering::Release);
        *self.audio.write() = devices;
    }

    /// Replace the cached MIDI list (and its count).
    pub fn set_midi(&self, devices: Vec<MidiDevice>) {
        self.midi_count.store(devices.len(), Ordering::Release);
        *self.midi.write() = devices;
    }

    pub fn audio_list(&self) -> Vec<AudioDevice> {
        self.audio.read().clone()
    }

    pub fn midi_list(&self) -> Vec<MidiDevice> {
        self.midi.read().clone()
    }

    pub fn audio_device(&self, uid: &str) -> Option<AudioDevice> {
        self.audio.read().iter().find(|d| d.uid == uid).cloned()
    }

    pub fn midi_device(&self, uid: &str) -> Option<MidiDevice> {
        self.midi.read().iter().find(|d| d.uid == uid).cloned()
    }

    /// Whether the audio device exists and is online.
    pub fn is_audio_online(&self, uid: &str) -> bool {
        self.audio
            .read()
            .iter()
            .any(|d| d.uid == uid && d.is_online)
    }

    /// Whether the MIDI device exists and is online.
    pub fn is_midi_online(&self, uid: &str) -> bool {
        self.midi.read().iter().any(|d| d.uid == uid && d.is_online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::enumerator::test_audio_device;

    #[test]
    fn test_set_audio_updates_count() {
        let directory = DeviceDirectory::new();
        assert_eq!(directory.counts(), (0, 0));
        directory.set_audio(vec![
            test_audio_device("Mic", "mic-1", 1, 0),
            test_audio_device("Out", "out-1", 0, 2),
        ]);
        assert_eq!(directory.counts(), (2, 0));
        assert!(directory.is_audio_online("mic-1"));
        assert!(!directory.is_audio_online("nope"));
    }

    #[test]
    fn test_offline_device_is_not_online() {
        let directory = DeviceDirectory::new();
        let mut device = test_audio_device("Mic", "mic-1", 1, 0);
        device.is_online = false;
        directory.set_audio(vec![device]);
        assert!(directory.audio_device("mic-1").is_some());
        assert!(!directory.is_audio_online("mic-1"));
    }
}
