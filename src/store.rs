//! MappingStore - mirrored saxophone device state with a narrow mutation API
//!
//! Owns the local copy of the device's note-mask mapping table and is the
//! only writer of it: the action methods encode-and-send outbound frames,
//! the inbound handler decodes responses and mutates state. Observers read
//! through [`MappingStore::snapshot`] and the field accessors.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::config::{SaxConfig, UnknownFramePolicy};
use crate::sysex::{self, build, format_hex, ConfirmKind, SaxFrame, ENTRY_COUNT};
use crate::transport::SysexOutput;

/// One device-side mapping slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingEntry {
    /// Whether the device considers the slot active
    pub used: bool,
    /// 28-bit trigger-source mask
    pub mask: u32,
    /// Note number triggered by the mask
    pub note: u8,
}

/// Mirrored device state. A slot is `None` until an authoritative response
/// for it has been decoded; `received[i]` is set in the same critical
/// section as every write to `entries[i]`.
#[derive(Debug, Clone)]
pub struct MappingState {
    /// Last mask reported by the device's current-mask query
    pub current_mask: Option<u32>,
    /// Wall-clock time of the last current-mask update
    pub last_updated: Option<DateTime<Utc>>,
    /// The 128-slot mapping table
    pub entries: [Option<MappingEntry>; ENTRY_COUNT],
    /// Which slots have received at least one authoritative response
    pub received: [bool; ENTRY_COUNT],
    /// True strictly for the duration of a bulk load
    pub is_loading_entries: bool,
}

impl Default for MappingState {
    fn default() -> Self {
        Self {
            current_mask: None,
            last_updated: None,
            entries: [None; ENTRY_COUNT],
            received: [false; ENTRY_COUNT],
            is_loading_entries: false,
        }
    }
}

struct Inner {
    state: RwLock<MappingState>,
    output: RwLock<Option<Arc<dyn SysexOutput>>>,
    pacing: Duration,
    unknown_frames: UnknownFramePolicy,
}

/// Saxophone mapping store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MappingStore {
    inner: Arc<Inner>,
}

impl MappingStore {
    /// Create a store with default tuning (5 ms pacing, absorb policy).
    pub fn new() -> Self {
        Self::with_config(&SaxConfig::default())
    }

    /// Create a store tuned from the `sax` config section.
    pub fn with_config(config: &SaxConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(MappingState::default()),
                output: RwLock::new(None),
                pacing: Duration::from_millis(config.entry_pacing_ms),
                unknown_frames: config.unknown_frames,
            }),
        }
    }

    /// Attach the outbound transport. Until one is attached (and after it
    /// is detached) every action is a silent no-op.
    pub fn attach_output(&self, output: Arc<dyn SysexOutput>) {
        *self.inner.output.write() = Some(output);
    }

    pub fn detach_output(&self) {
        *self.inner.output.write() = None;
    }

    /// Clone of the full mirrored state.
    pub fn snapshot(&self) -> MappingState {
        self.inner.state.read().clone()
    }

    pub fn current_mask(&self) -> Option<u32> {
        self.inner.state.read().current_mask
    }

    pub fn entry(&self, index: u8) -> Option<MappingEntry> {
        self.inner.state.read().entries[(index & 0x7F) as usize]
    }

    pub fn is_received(&self, index: u8) -> bool {
        self.inner.state.read().received[(index & 0x7F) as usize]
    }

    pub fn received_count(&self) -> usize {
        self.inner.state.read().received.iter().filter(|r| **r).count()
    }

    pub fn is_loading_entries(&self) -> bool {
        self.inner.state.read().is_loading_entries
    }

    /// Ask the device for its current active mask.
    pub fn request_current_mask(&self) {
        self.send(build::query_current_mask());
    }

    /// Ask the device for one mapping slot (index clamped to 7 bits).
    pub fn request_entry(&self, index: u8) {
        self.send(build::query_entry(index & 0x7F));
    }

    /// Write a mapping on the device. The confirmation response updates
    /// the mirror; the device's answer is then re-read (see
    /// [`MappingStore::handle_event`]).
    pub fn set_mapping(&self, mask: u32, note: u8) {
        self.send(build::set_mapping(mask, note));
    }

    /// Remove a mapping on the device.
    pub fn delete_mapping(&self, mask: u32) {
        self.send(build::delete_mapping(mask));
    }

    /// Fetch all 128 slots, paced so the device's SysEx input buffer is
    /// never flooded.
    ///
    /// Resets the table and the received set, then issues one
    /// `request_entry` per index in increasing order with a fixed pause
    /// after each. The loading flag is cleared once all requests are out;
    /// responses arrive asynchronously, so `received` is the authoritative
    /// per-slot completion signal, not the flag. A second call while a
    /// load is in flight is ignored.
    pub async fn load_all_entries(&self) {
        {
            let mut state = self.inner.state.write();
            if state.is_loading_entries {
                warn!("Entry bulk load already in progress, ignoring");
                return;
            }
            state.is_loading_entries = true;
            state.received = [false; ENTRY_COUNT];
            state.entries = [None; ENTRY_COUNT];
        }

        debug!("Starting bulk load of {} entries", ENTRY_COUNT);

        for index in 0..ENTRY_COUNT as u8 {
            self.request_entry(index);
            tokio::time::sleep(self.inner.pacing).await;
        }

        self.inner.state.write().is_loading_entries = false;
        debug!("Bulk load requests issued");
    }

    /// Inbound dispatch for a full raw SysEx frame.
    ///
    /// Returns `true` when the frame belongs to the saxophone sub-protocol
    /// (even when too short or unhandled, so the shared bus stops routing
    /// it), `false` when other consumers should inspect it.
    pub fn handle_event(&self, data: &[u8]) -> bool {
        let Some(frame) = SaxFrame::parse(data) else {
            return false;
        };

        match frame {
            SaxFrame::CurrentMask { mask } => {
                let mut state = self.inner.state.write();
                state.current_mask = Some(mask);
                state.last_updated = Some(Utc::now());
                debug!("Current mask updated: {:#09X}", mask);
            }
            SaxFrame::Entry { index, used, mask, note } => {
                let mut state = self.inner.state.write();
                state.entries[index as usize] = Some(MappingEntry { used, mask, note });
                state.received[index as usize] = true;
                trace!("Entry {} received (used={} note={})", index, used, note);
            }
            SaxFrame::Confirmation { kind, index, ok, mask, note } => {
                if !ok {
                    debug!("{:?} rejected by device for slot {}", kind, index);
                    return true;
                }
                {
                    let mut state = self.inner.state.write();
                    state.entries[index as usize] = Some(MappingEntry {
                        used: kind == ConfirmKind::Set,
                        mask,
                        note,
                    });
                    state.received[index as usize] = true;
                }
                // The echoed payload is not trusted as final truth; re-read
                // the slot to confirm what the device actually stored.
                debug!("{:?} confirmed for slot {}, re-reading", kind, index);
                self.request_entry(index);
            }
            SaxFrame::Incomplete { cmd } => {
                trace!("Claimed incomplete saxophone frame (cmd {:#04X})", cmd);
            }
            SaxFrame::Other { cmd } => match self.inner.unknown_frames {
                UnknownFramePolicy::Absorb => {
                    trace!("Absorbed unhandled saxophone command {:#04X}", cmd);
                }
                UnknownFramePolicy::Warn => {
                    warn!("Unhandled saxophone command {:#04X}: {}", cmd, format_hex(data));
                }
            },
        }

        true
    }

    fn send(&self, payload: Vec<u8>) {
        let output = self.inner.output.read().clone();
        let Some(output) = output else {
            trace!("No MIDI output attached, dropping {}", format_hex(&payload));
            return;
        };
        trace!("→ sax {}", format_hex(&payload));
        if let Err(e) = output.send_sysex(&sysex::MANUFACTURER_ID, &payload) {
            warn!("Failed to send saxophone frame: {}", e);
        }
    }
}

impl Default for MappingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysex::{
        CMD_DELETE_RESPONSE, CMD_GET_ENTRY_REQUEST, CMD_GET_ENTRY_RESPONSE,
        CMD_GET_MASK_RESPONSE, CMD_SET_RESPONSE, SAX_SYSEX_TAG,
    };
    use crate::transport::SendError;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingOutput {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingOutput {
        fn payloads(&self) -> Vec<Vec<u8>> {
            self.sent.lock().clone()
        }
    }

    impl SysexOutput for RecordingOutput {
        fn send_sysex(&self, _id: &[u8; 3], payload: &[u8]) -> Result<(), SendError> {
            self.sent.lock().push(payload.to_vec());
            Ok(())
        }
    }

    fn store_with_output() -> (MappingStore, Arc<RecordingOutput>) {
        let store = MappingStore::new();
        let output = Arc::new(RecordingOutput::default());
        store.attach_output(output.clone());
        (store, output)
    }

    fn entry_response(index: u8, used: u8, mask: [u8; 4], note: u8) -> Vec<u8> {
        vec![
            0xF0, 0x00, 0x53, 0x43, SAX_SYSEX_TAG, CMD_GET_ENTRY_RESPONSE, index, used, mask[0],
            mask[1], mask[2], mask[3], note, 0xF7,
        ]
    }

    #[test]
    fn actions_without_output_are_noops() {
        let store = MappingStore::new();
        store.request_current_mask();
        store.request_entry(5);
        store.set_mapping(0x1234, 60);
        store.delete_mapping(0x1234);
        assert!(store.snapshot().entries.iter().all(Option::is_none));
    }

    #[test]
    fn request_entry_clamps_index() {
        let (store, output) = store_with_output();
        store.request_entry(0x85);
        assert_eq!(
            output.payloads(),
            vec![vec![SAX_SYSEX_TAG, CMD_GET_ENTRY_REQUEST, 0x05]]
        );
    }

    #[test]
    fn foreign_frame_is_declined_without_mutation() {
        let (store, _output) = store_with_output();
        let before = store.snapshot();
        assert!(!store.handle_event(&[0xF0, 0x00, 0x20, 0x32, 0x7E, 0x06, 0xF7]));
        let after = store.snapshot();
        assert_eq!(before.current_mask, after.current_mask);
        assert_eq!(before.entries, after.entries);
        assert_eq!(before.received, after.received);
    }

    #[test]
    fn short_frame_is_claimed_without_mutation() {
        let (store, output) = store_with_output();
        // Entry response truncated after the used flag
        let short = vec![0xF0, 0x00, 0x53, 0x43, SAX_SYSEX_TAG, CMD_GET_ENTRY_RESPONSE, 5, 1, 0xF7];
        assert!(store.handle_event(&short));
        assert!(store.snapshot().entries.iter().all(Option::is_none));
        assert_eq!(store.received_count(), 0);
        assert!(output.payloads().is_empty());
    }

    #[test]
    fn current_mask_response_updates_mask_and_timestamp() {
        let (store, _output) = store_with_output();
        let frame = vec![
            0xF0, 0x00, 0x53, 0x43, SAX_SYSEX_TAG, CMD_GET_MASK_RESPONSE, 0x01, 0x02, 0x00, 0x00,
            0xF7,
        ];
        assert!(store.handle_event(&frame));
        assert_eq!(store.current_mask(), Some(0x01 | (0x02 << 7)));
        assert!(store.snapshot().last_updated.is_some());
    }

    #[test]
    fn entry_response_populates_slot() {
        let (store, _output) = store_with_output();
        let frame = entry_response(5, 1, [0x7F, 0x7F, 0x7F, 0x0F], 64);
        assert!(store.handle_event(&frame));
        assert_eq!(
            store.entry(5),
            Some(MappingEntry {
                used: true,
                mask: 0x01FF_FFFF,
                note: 64,
            })
        );
        assert!(store.is_received(5));
        assert_eq!(store.received_count(), 1);
    }

    #[test]
    fn set_confirmation_writes_slot_and_rereads_it() {
        let (store, output) = store_with_output();
        let frame = vec![
            0xF0, 0x00, 0x53, 0x43, SAX_SYSEX_TAG, CMD_SET_RESPONSE, 10, 1, 0x03, 0x00, 0x00,
            0x00, 72, 0xF7,
        ];
        assert!(store.handle_event(&frame));
        assert_eq!(
            store.entry(10),
            Some(MappingEntry { used: true, mask: 0x03, note: 72 })
        );
        assert!(store.is_received(10));
        // Exactly one outbound re-confirmation query for slot 10
        assert_eq!(
            output.payloads(),
            vec![vec![SAX_SYSEX_TAG, CMD_GET_ENTRY_REQUEST, 10]]
        );
    }

    #[test]
    fn delete_confirmation_marks_slot_unused() {
        let (store, output) = store_with_output();
        let frame = vec![
            0xF0, 0x00, 0x53, 0x43, SAX_SYSEX_TAG, CMD_DELETE_RESPONSE, 3, 1, 0x03, 0x00, 0x00,
            0x00, 72, 0xF7,
        ];
        assert!(store.handle_event(&frame));
        assert_eq!(
            store.entry(3),
            Some(MappingEntry { used: false, mask: 0x03, note: 72 })
        );
        assert_eq!(
            output.payloads(),
            vec![vec![SAX_SYSEX_TAG, CMD_GET_ENTRY_REQUEST, 3]]
        );
    }

    #[test]
    fn failed_confirmation_leaves_state_untouched() {
        let (store, output) = store_with_output();
        let frame = vec![
            0xF0, 0x00, 0x53, 0x43, SAX_SYSEX_TAG, CMD_SET_RESPONSE, 10, 0, 0x03, 0x00, 0x00,
            0x00, 72, 0xF7,
        ];
        assert!(store.handle_event(&frame));
        assert_eq!(store.entry(10), None);
        assert!(!store.is_received(10));
        assert!(output.payloads().is_empty());
    }

    #[test]
    fn unknown_command_is_absorbed_without_mutation() {
        let (store, output) = store_with_output();
        let before = store.snapshot();
        assert!(store.handle_event(&[0xF0, 0x00, 0x53, 0x43, SAX_SYSEX_TAG, 0x55, 0xF7]));
        let after = store.snapshot();
        assert_eq!(before.entries, after.entries);
        assert_eq!(before.current_mask, after.current_mask);
        assert!(output.payloads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn bulk_load_issues_all_queries_in_order() {
        let (store, output) = store_with_output();
        let started = tokio::time::Instant::now();
        store.load_all_entries().await;

        // One pacing interval after each of the 128 queries
        assert_eq!(started.elapsed(), Duration::from_millis(5 * 128));

        let payloads = output.payloads();
        assert_eq!(payloads.len(), ENTRY_COUNT);
        for (i, payload) in payloads.iter().enumerate() {
            assert_eq!(payload, &vec![SAX_SYSEX_TAG, CMD_GET_ENTRY_REQUEST, i as u8]);
        }
        assert!(!store.is_loading_entries());
    }

    #[tokio::test(start_paused = true)]
    async fn bulk_load_resets_previous_state() {
        let (store, _output) = store_with_output();
        store.handle_event(&entry_response(7, 1, [0x01, 0x00, 0x00, 0x00], 60));
        assert!(store.is_received(7));

        store.load_all_entries().await;

        // No responses arrived during the load, so the reset is observable
        assert!(store.snapshot().entries.iter().all(Option::is_none));
        assert_eq!(store.received_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_bulk_load_is_rejected() {
        let (store, output) = store_with_output();

        let first = tokio::spawn({
            let store = store.clone();
            async move { store.load_all_entries().await }
        });
        // Let the first load set its flag and reach the first pacing sleep
        tokio::task::yield_now().await;
        assert!(store.is_loading_entries());

        store.load_all_entries().await;

        first.await.unwrap();
        assert_eq!(output.payloads().len(), ENTRY_COUNT);
        assert!(!store.is_loading_entries());
    }

    #[tokio::test(start_paused = true)]
    async fn responses_during_bulk_load_are_applied() {
        let (store, _output) = store_with_output();

        let load = tokio::spawn({
            let store = store.clone();
            async move { store.load_all_entries().await }
        });
        tokio::task::yield_now().await;

        // A response for an already-requested slot lands mid-load
        store.handle_event(&entry_response(0, 1, [0x02, 0x00, 0x00, 0x00], 48));
        assert!(store.is_received(0));

        load.await.unwrap();
        assert_eq!(
            store.entry(0),
            Some(MappingEntry { used: true, mask: 0x02, note: 48 })
        );
    }
}
