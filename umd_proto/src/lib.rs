#![no_std]
//! Wire model and codec for the UMDv5 tally protocol.
//!
//! UMDv5 carries tally lamp state and short text labels from a production
//! switcher (or any other controller) to tally lamps and under-monitor displays.
//! Packets travel over UDP, fire-and-forget.
//!
//! ## Packet model
//!
//! Every packet is a single [`Message`](message::Message), addressed to one
//! _screen_ (a group of displays) or to all of them. A message carries either:
//!
//! - A list of [`Display`](display::Display) records, one per tally, each holding
//!   three lamp colors, a brightness level and either a text label or
//!   per-display control data.
//! - Raw screen control data (`SCONTROL`), opaque to this crate.
//!
//! ## Layout
//!
//! All integers are little-endian.
//!
//! ```text
//! Message:  PBC:u16 | VER:u8 | FLAGS:u8 | SCREEN:u16 | payload
//! Display:  INDEX:u16 | CTRL:u16 | LEN:u16 | bytes[LEN]
//! ```
//!
//! `PBC` counts every byte following it. A packet never exceeds
//! [`MAX_PACKET_LEN`] bytes, larger display lists are split over several packets
//! by [`Message::build_messages`](message::Message::build_messages).
//!
//! ## Broadcast
//!
//! The index `0xFFFF` ([`BROADCAST`]) means "all" at both levels: a message with
//! that screen index is meant for every screen, and a display with that index
//! is meant for every display of its screen.
//!
//! The types in this crate implement `serde`'s `Serialize` and `Deserialize`
//! traits, for the user to conveniently plug into other `serde` backends.

extern crate alloc;

pub mod color;
pub mod display;
pub mod error;
pub mod message;

pub use color::{InvalidBits, TallyColor, TallyType};
pub use display::{Display, DisplayPayload};
pub use error::{BuildError, ParseError};
pub use message::{Flags, Message, MessagePayload};

/// Screen or display index addressing every screen or display.
pub const BROADCAST: u16 = 0xFFFF;

/// Maximum length of a single packet, in bytes.
pub const MAX_PACKET_LEN: usize = 2048;

/// The two payload kinds of a [`Message`] or a [`Display`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum MessageType {
    /// Tally state and text (`DMSG`).
    #[default]
    Display,
    /// Control data (`SCONTROL` for messages, control data for displays).
    Control,
}
