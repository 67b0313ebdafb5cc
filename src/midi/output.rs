// Midi output - device availability, audio latency and the outgoing message sink

use crate::listeners::{ChangeListener, ListenerId, ListenerList};
use crate::midi::event::ShortMessage;
use crate::sequencer::transport::TransportError;
use midir::{MidiOutput, MidiOutputConnection};
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

const CLIENT_NAME: &str = "JJazz Playback";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Error = 3,
}

impl From<u8> for DeviceStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => DeviceStatus::Connecting,
            2 => DeviceStatus::Connected,
            3 => DeviceStatus::Error,
            _ => DeviceStatus::Disconnected,
        }
    }
}

/// Change notified by the output synth manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSynthEvent {
    StatusChanged { old: DeviceStatus, new: DeviceStatus },
    LatencyChanged { old_ms: u32, new_ms: u32 },
}

/// Tracks whether a Midi output device is usable and the audio latency of the
/// synth behind it.
pub struct OutputSynthManager {
    status: AtomicU8,
    port_name: RwLock<Option<String>>,
    latency_ms: AtomicU32,
    listeners: ListenerList<ChangeListener<OutputSynthEvent>>,
}

impl OutputSynthManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            status: AtomicU8::new(DeviceStatus::Disconnected as u8),
            port_name: RwLock::new(None),
            latency_ms: AtomicU32::new(0),
            listeners: ListenerList::new(),
        })
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: DeviceStatus) {
        let old = DeviceStatus::from(self.status.swap(status as u8, Ordering::AcqRel));
        if old != status {
            debug!("Midi output status: {:?} -> {:?}", old, status);
            let event = OutputSynthEvent::StatusChanged { old, new: status };
            self.listeners.for_each(|l| l(&event));
        }
    }

    pub fn is_midi_out_available(&self) -> bool {
        self.status() == DeviceStatus::Connected
    }

    /// Record the connected output port, None when disconnected
    pub fn set_output_port(&self, name: Option<String>) {
        let status = if name.is_some() {
            DeviceStatus::Connected
        } else {
            DeviceStatus::Disconnected
        };
        if let Ok(mut port) = self.port_name.write() {
            *port = name;
        }
        self.set_status(status);
    }

    pub fn output_port(&self) -> Option<String> {
        self.port_name.read().ok().and_then(|p| p.clone())
    }

    pub fn audio_latency_ms(&self) -> u32 {
        self.latency_ms.load(Ordering::Acquire)
    }

    pub fn set_audio_latency_ms(&self, latency_ms: u32) {
        let old_ms = self.latency_ms.swap(latency_ms, Ordering::AcqRel);
        if old_ms != latency_ms {
            let event = OutputSynthEvent::LatencyChanged {
                old_ms,
                new_ms: latency_ms,
            };
            self.listeners.for_each(|l| l(&event));
        }
    }

    pub fn add_change_listener(&self, listener: Arc<ChangeListener<OutputSynthEvent>>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_change_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

/// Destination of the short messages played by the transport
pub trait MidiSink: Send + Sync {
    fn send(&self, message: &ShortMessage) -> Result<(), TransportError>;
}

#[derive(Clone, Debug)]
pub struct MidiPortInfo {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// List the available Midi output ports
pub fn probe_output_ports() -> Vec<MidiPortInfo> {
    let mut ports = Vec::new();
    match MidiOutput::new(CLIENT_NAME) {
        Ok(midi_out) => {
            for (index, port) in midi_out.ports().iter().enumerate() {
                if let Ok(name) = midi_out.port_name(port) {
                    ports.push(MidiPortInfo {
                        id: format!("midi_out_{}", index),
                        name,
                        is_default: index == 0,
                    });
                }
            }
        }
        Err(e) => warn!("Cannot create Midi output client: {}", e),
    }
    ports
}

/// Sink writing to a hardware or virtual Midi output port
pub struct MidirSink {
    port_name: String,
    connection: Mutex<MidiOutputConnection>,
}

impl MidirSink {
    /// Connect to the port named `port_name`, or to the first port if None
    pub fn connect(port_name: Option<&str>) -> Result<Self, TransportError> {
        let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| TransportError::Device(e.to_string()))?;
        let mut selected = None;
        for port in midi_out.ports() {
            let Ok(name) = midi_out.port_name(&port) else {
                continue;
            };
            if port_name.is_none_or(|wanted| wanted == name) {
                selected = Some((port, name));
                break;
            }
        }
        let Some((port, name)) = selected else {
            return Err(TransportError::Device(format!(
                "Midi output port not found: {}",
                port_name.unwrap_or("<default>")
            )));
        };
        let connection = midi_out
            .connect(&port, CLIENT_NAME)
            .map_err(|e| TransportError::Device(e.to_string()))?;
        info!("Connected to Midi output '{}'", name);
        Ok(Self {
            port_name: name,
            connection: Mutex::new(connection),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl MidiSink for MidirSink {
    fn send(&self, message: &ShortMessage) -> Result<(), TransportError> {
        let mut connection = self
            .connection
            .lock()
            .map_err(|_| TransportError::Device("Midi output connection poisoned".to_string()))?;
        connection
            .send(&message.to_bytes())
            .map_err(|e| TransportError::Device(e.to_string()))
    }
}
