//! SysEx transport boundary
//!
//! The store only depends on the [`SysexOutput`] trait; the midir-backed
//! implementation and the input-side connection helper live here so the
//! rest of the crate never touches port handling directly.

use anyhow::{Context, Result};
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

/// Failure to push a frame out the MIDI port.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("MIDI output error: {0}")]
    Midi(String),
}

/// Outbound capability: deliver one SysEx payload under a manufacturer id.
///
/// Implementations own the `F0 .. F7` envelope; callers hand over only the
/// bytes between the manufacturer id and the end marker.
pub trait SysexOutput: Send + Sync {
    fn send_sysex(&self, manufacturer_id: &[u8; 3], payload: &[u8]) -> Result<(), SendError>;
}

/// midir-backed output port.
pub struct MidirOutput {
    conn: Mutex<MidiOutputConnection>,
    port_name: String,
}

impl MidirOutput {
    /// Connect to the first output port whose name contains `pattern`
    /// (case-insensitive, Windows-friendly).
    pub fn connect(pattern: &str) -> Result<Self> {
        let midi_out = MidiOutput::new("saxmap-output").context("Failed to create MIDI output")?;

        debug!("Found {} MIDI output ports", midi_out.port_count());

        let (port, port_name) = find_port_by_name(
            midi_out.ports(),
            |p| midi_out.port_name(p).ok(),
            pattern,
        )
        .ok_or_else(|| anyhow::anyhow!("Output port '{}' not found", pattern))?;

        info!("Connecting to output port: {}", port_name);

        let conn = midi_out
            .connect(&port, "saxmap")
            .map_err(|e| anyhow::anyhow!("Failed to connect to output port: {}", e))?;

        Ok(Self {
            conn: Mutex::new(conn),
            port_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl SysexOutput for MidirOutput {
    fn send_sysex(&self, manufacturer_id: &[u8; 3], payload: &[u8]) -> Result<(), SendError> {
        let mut frame = Vec::with_capacity(payload.len() + 5);
        frame.push(0xF0);
        frame.extend_from_slice(manufacturer_id);
        frame.extend_from_slice(payload);
        frame.push(0xF7);

        self.conn
            .lock()
            .send(&frame)
            .map_err(|e| SendError::Midi(e.to_string()))
    }
}

/// Connect to the first input port whose name contains `pattern` and
/// deliver every raw frame to `callback`.
pub fn connect_input<F>(pattern: &str, mut callback: F) -> Result<MidiInputConnection<()>>
where
    F: FnMut(&[u8]) + Send + 'static,
{
    let midi_in = MidiInput::new("saxmap-input").context("Failed to create MIDI input")?;

    debug!("Found {} MIDI input ports", midi_in.port_count());

    let (port, port_name) = find_port_by_name(
        midi_in.ports(),
        |p| midi_in.port_name(p).ok(),
        pattern,
    )
    .ok_or_else(|| anyhow::anyhow!("Input port '{}' not found", pattern))?;

    info!("Connecting to input port: {}", port_name);

    midi_in
        .connect(&port, "saxmap", move |_timestamp, data, _| callback(data), ())
        .map_err(|e| anyhow::anyhow!("Failed to connect to input port: {}", e))
}

/// List available MIDI input port names.
pub fn list_input_ports() -> Result<Vec<String>> {
    let midi_in = MidiInput::new("saxmap-scanner")?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|p| midi_in.port_name(p).ok())
        .collect())
}

/// List available MIDI output port names.
pub fn list_output_ports() -> Result<Vec<String>> {
    let midi_out = MidiOutput::new("saxmap-scanner")?;
    Ok(midi_out
        .ports()
        .iter()
        .filter_map(|p| midi_out.port_name(p).ok())
        .collect())
}

/// Case-insensitive substring match over port names.
fn find_port_by_name<P>(
    ports: Vec<P>,
    name_of: impl Fn(&P) -> Option<String>,
    pattern: &str,
) -> Option<(P, String)> {
    let pattern = pattern.to_lowercase();
    for port in ports {
        if let Some(name) = name_of(&port) {
            if name.to_lowercase().contains(&pattern) {
                debug!("Found port '{}' matching pattern '{}'", name, pattern);
                return Some((port, name));
            }
        }
    }
    None
}
