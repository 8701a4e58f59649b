//! Saxophone SysEx frame codec
//!
//! Builds and parses the custom saxophone note-mask frames carried under
//! the OpenDeck manufacturer id:
//!
//! `F0 00 53 43 7E <cmd> ... F7`
//!
//! The builders produce only the payload after the manufacturer id
//! (`[TAG, CMD, ...fields]`); the transport wraps it in the SysEx envelope.
//! The parser takes the full raw frame including the envelope.

/// OpenDeck manufacturer id shared by every sub-protocol on the bus.
pub const MANUFACTURER_ID: [u8; 3] = [0x00, 0x53, 0x43];

/// Sub-protocol tag claiming a frame for the saxophone handler.
pub const SAX_SYSEX_TAG: u8 = 0x7E;

pub const CMD_SET: u8 = 0x01;
pub const CMD_DELETE: u8 = 0x02;
pub const CMD_GET_MASK_REQUEST: u8 = 0x03;
pub const CMD_GET_MASK_RESPONSE: u8 = 0x04;
pub const CMD_GET_ENTRY_REQUEST: u8 = 0x05;
pub const CMD_GET_ENTRY_RESPONSE: u8 = 0x06;
pub const CMD_SET_RESPONSE: u8 = 0x07;
pub const CMD_DELETE_RESPONSE: u8 = 0x08;

/// Number of mapping slots on the device.
pub const ENTRY_COUNT: usize = 128;

const SYSEX_START: u8 = 0xF0;
const SYSEX_END: u8 = 0xF7;

/// Shortest frame that can carry the tag and a command byte:
/// `F0 m0 m1 m2 TAG CMD F7`.
const MIN_FRAME_LEN: usize = 7;

/// Split a 28-bit mask into four 7-bit data bytes, low septet first.
///
/// Bits above the 28-bit window are silently truncated; every output
/// byte is in `[0, 0x7F]` regardless of input magnitude.
pub fn pack_mask(mask: u32) -> [u8; 4] {
    [
        (mask & 0x7F) as u8,
        ((mask >> 7) & 0x7F) as u8,
        ((mask >> 14) & 0x7F) as u8,
        ((mask >> 21) & 0x7F) as u8,
    ]
}

/// Reassemble a 28-bit mask from four 7-bit data bytes.
///
/// Each input byte is masked with `0x7F` first, tolerating a stray
/// high bit on the wire.
pub fn unpack_mask(m0: u8, m1: u8, m2: u8, m3: u8) -> u32 {
    (m0 & 0x7F) as u32
        | (((m1 & 0x7F) as u32) << 7)
        | (((m2 & 0x7F) as u32) << 14)
        | (((m3 & 0x7F) as u32) << 21)
}

/// Which write confirmation a [`SaxFrame::Confirmation`] acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmKind {
    Set,
    Delete,
}

/// Decoded inbound saxophone frame.
///
/// `SaxFrame::parse` returns `None` for frames that do not belong to
/// this sub-protocol at all; every `Some(_)` frame is claimed, including
/// the ones that carry no usable payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaxFrame {
    /// Current active mask report (cmd 0x04).
    CurrentMask { mask: u32 },

    /// One mapping slot (cmd 0x06).
    Entry { index: u8, used: bool, mask: u32, note: u8 },

    /// Set/delete acknowledgement echoing the written slot (cmd 0x07/0x08).
    Confirmation {
        kind: ConfirmKind,
        index: u8,
        ok: bool,
        mask: u32,
        note: u8,
    },

    /// Known command, frame shorter than its fixed layout. Claimed so no
    /// other consumer reprocesses it; no partial decode is attempted.
    Incomplete { cmd: u8 },

    /// Unrecognized command under the saxophone tag. Claimed and left to
    /// the store's unknown-frame policy.
    Other { cmd: u8 },
}

impl SaxFrame {
    /// Recognize and decode a full raw SysEx frame.
    ///
    /// Returns `None` when the frame is not ours: too short to carry the
    /// tag, wrong envelope markers, wrong manufacturer id, or wrong tag.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < MIN_FRAME_LEN {
            return None;
        }
        if data[0] != SYSEX_START || *data.last()? != SYSEX_END {
            return None;
        }
        if data[1..4] != MANUFACTURER_ID {
            return None;
        }
        if data[4] != SAX_SYSEX_TAG {
            return None;
        }

        let cmd = data[5];
        match cmd {
            CMD_GET_MASK_RESPONSE => {
                // F0 00 53 43 7E 04 m0 m1 m2 m3 F7
                if data.len() < 11 {
                    return Some(SaxFrame::Incomplete { cmd });
                }
                let mask = unpack_mask(data[6], data[7], data[8], data[9]);
                Some(SaxFrame::CurrentMask { mask })
            }
            CMD_GET_ENTRY_RESPONSE => {
                // F0 00 53 43 7E 06 index used m0 m1 m2 m3 note F7
                if data.len() < 14 {
                    return Some(SaxFrame::Incomplete { cmd });
                }
                Some(SaxFrame::Entry {
                    index: data[6] & 0x7F,
                    used: (data[7] & 0x7F) == 1,
                    mask: unpack_mask(data[8], data[9], data[10], data[11]),
                    note: data[12] & 0x7F,
                })
            }
            CMD_SET_RESPONSE | CMD_DELETE_RESPONSE => {
                // F0 00 53 43 7E <07|08> index ok m0 m1 m2 m3 note F7
                if data.len() < 14 {
                    return Some(SaxFrame::Incomplete { cmd });
                }
                let kind = if cmd == CMD_SET_RESPONSE {
                    ConfirmKind::Set
                } else {
                    ConfirmKind::Delete
                };
                Some(SaxFrame::Confirmation {
                    kind,
                    index: data[6] & 0x7F,
                    ok: (data[7] & 0x7F) == 1,
                    mask: unpack_mask(data[8], data[9], data[10], data[11]),
                    note: data[12] & 0x7F,
                })
            }
            _ => Some(SaxFrame::Other { cmd }),
        }
    }
}

/// Outbound payload builders (bytes after the manufacturer id).
pub mod build {
    use super::*;

    /// Ask the device for its current active mask.
    pub fn query_current_mask() -> Vec<u8> {
        vec![SAX_SYSEX_TAG, CMD_GET_MASK_REQUEST]
    }

    /// Ask the device for one mapping slot. The index is clamped to
    /// 7 bits per the sub-protocol contract.
    pub fn query_entry(index: u8) -> Vec<u8> {
        vec![SAX_SYSEX_TAG, CMD_GET_ENTRY_REQUEST, index & 0x7F]
    }

    /// Write a mapping for `mask`, triggering `note`.
    pub fn set_mapping(mask: u32, note: u8) -> Vec<u8> {
        let [m0, m1, m2, m3] = pack_mask(mask);
        vec![SAX_SYSEX_TAG, CMD_SET, m0, m1, m2, m3, note & 0x7F]
    }

    /// Remove the mapping for `mask`.
    pub fn delete_mapping(mask: u32) -> Vec<u8> {
        let [m0, m1, m2, m3] = pack_mask(mask);
        vec![SAX_SYSEX_TAG, CMD_DELETE, m0, m1, m2, m3]
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
