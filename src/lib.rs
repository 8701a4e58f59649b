//! saxmap - controller companion for the saxophone note-mask sub-protocol
//!
//! Mirrors the 128-slot note-mask mapping table of a saxophone controller
//! over MIDI SysEx: [`sysex`] is the pure frame codec, [`store`] owns the
//! mirrored state and the protocol actions, [`transport`] is the midir
//! boundary, and [`cli`] is the interactive operator surface.

pub mod cli;
pub mod config;
pub mod store;
pub mod sysex;
pub mod transport;
