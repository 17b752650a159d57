// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Device enumeration service contract.

use super::types::{AudioDevice, MidiDevice, TransportType};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// External device enumeration service.
///
/// `device_counts` is the O(1) fast path polled by the monitor; the full
/// enumerations can take tens of milliseconds and run on the task pool.
pub trait DeviceEnumerator: Send + Sync {
    /// Current `(audio_count, midi_count)`. Must be cheap (~50 us).
    fn device_counts(&self) -> (usize, usize);

    /// Full audio endpoint enumeration.
    fn audio_devices(&self) -> Vec<AudioDevice>;

    /// Full MIDI endpoint enumeration.
    fn midi_devices(&self) -> Vec<MidiDevice>;
}

/// Mutable in-memory enumerator double for tests and examples.
#[derive(Debug, Default)]
pub struct StaticDeviceEnumerator {
    audio: Mutex<Vec<AudioDevice>>,
    midi: Mutex<Vec<MidiDevice>>,
    count_calls: AtomicUsize,
}

impl StaticDeviceEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with the usual built-in endpoints.
    pub fn with_builtin_devices() -> Self {
        let this = Self::new();
        this.push_audio(test_audio_device("Built-in Microphone", "BuiltInMicrophone", 2, 0));
        this.push_audio(test_audio_device(
            "Built-in Speakers",
            "BuiltInSpeakerDevice",
            0,
            2,
        ));
        this
    }

    pub fn push_audio(&self, device: AudioDevice) {
        self.audio.lock().push(device);
    }

    pub fn push_midi(&self, device: MidiDevice) {
        self.midi.lock().push(device);
    }

    pub fn remove_audio(&self, uid: &str) {
        self.audio.lock().retain(|d| d.uid != uid);
    }

    pub fn set_audio_online(&self, uid: &str, online: bool) {
        for device in self.audio.lock().iter_mut() {
            if device.uid == uid {
                device.is_online = online;
            }
        }
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::Relaxed)
    }
}

impl DeviceEnumerator for StaticDeviceEnumerator {
    fn device_counts(&self) -> (usize, usize) {
        self.count_calls.fetch_add(1, Ordering::Relaxed);
        (self.audio.lock().len(), self.midi.lock().len())
    }

    fn audio_devices(&self) -> Vec<AudioDevice> {
        self.audio.lock().clone()
    }

    fn midi_devices(&self) -> Vec<MidiDevice> {
        self.midi.lock().clone()
    }
}

/// Convenience constructor for an online audio endpoint.
pub fn test_audio_device(name: &str, uid: &str, inputs: u32, outputs: u32) -> AudioDevice {
    AudioDevice {
        name: name.to_string(),
        uid: uid.to_string(),
        is_online: true,
        input_channel_count: inputs,
        output_channel_count: outputs,
        supported_sample_rates: vec![44_100.0, 48_000.0, 96_000.0],
        supported_bit_depths: vec![16, 24, 32],
        device_type: "audio".to_string(),
        transport_type: TransportType::BuiltIn,
    }
}

/// Convenience constructor for an online MIDI endpoint.
pub fn test_midi_device(name: &str, uid: &str) -> MidiDevice {
    MidiDevice {
        name: name.to_string(),
        uid: uid.to_string(),
        is_online: true,
        is_input: true,
        is_output: false,
        manufacturer: "Acme".to_string(),
        model: name.to_string(),
        sysex_speed: 3_125,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_enumerator_counts() {
        let devices = StaticDeviceEnumerator::with_builtin_devices();
        assert_eq!(devices.device_counts(), (2, 0));
        devices.push_midi(test_midi_device("Keys", "usb-keys-1"));
        assert_eq!(devices.device_counts(), (2, 1));
        devices.remove_audio("BuiltInMicrophone");
        assert_eq!(devices.device_counts(), (1, 1));
    }
}
