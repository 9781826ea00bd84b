//! Message packets, their parsing, and their (possibly multi-packet) encoding.

use crate::{BROADCAST, BuildError, Display, MAX_PACKET_LEN, MessageType, ParseError};
use alloc::vec::Vec;
use core::ops;
use serde::{Deserialize, Serialize};

/// PBC (2 bytes) + version (1 byte) + flags (1 byte) + screen (2 bytes).
pub const HEADER_LEN: usize = 6;

/// The message `FLAGS` field.
///
/// Unknown bits are preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Self = Self(0);
    /// Text is encoded as UTF-16LE if set, UTF-8 otherwise.
    pub const UTF16: Self = Self(1);
    /// The message carries `SCONTROL` data if set, display records otherwise.
    pub const SCONTROL: Self = Self(2);

    #[inline(always)]
    pub const fn from_bits_retain(bits: u8) -> Self {
        Self(bits)
    }

    #[inline(always)]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline(always)]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline(always)]
    pub const fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline(always)]
    pub const fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl ops::BitOr for Flags {
    type Output = Self;

    #[inline(always)]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for Flags {
    #[inline(always)]
    fn bitor_assign(&mut self, rhs: Self) {
        self.insert(rhs);
    }
}

/// Either display records, or screen control data, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePayload {
    Displays(Vec<Display>),
    /// `SCONTROL` data. UMDv5.0 leaves its contents up to the application.
    Control(Vec<u8>),
}

impl Default for MessagePayload {
    fn default() -> Self {
        Self::Displays(Vec::new())
    }
}

/// A single UMDv5 message packet.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    /// Protocol minor version.
    pub version: u8,
    pub flags: Flags,
    /// The screen index, [`BROADCAST`] addresses every screen.
    pub screen: u16,
    pub payload: MessagePayload,
}

impl Message {
    /// Creates a display message with no displays.
    #[inline(always)]
    pub const fn new(screen: u16) -> Self {
        Self {
            version: 0,
            flags: Flags::NONE,
            screen,
            payload: MessagePayload::Displays(Vec::new()),
        }
    }

    /// Creates a message addressed to every screen.
    #[inline(always)]
    pub const fn broadcast() -> Self {
        Self::new(BROADCAST)
    }

    /// Creates an `SCONTROL` message carrying `data`.
    #[inline]
    pub fn control(screen: u16, data: impl Into<Vec<u8>>) -> Self {
        Self {
            flags: Flags::SCONTROL,
            payload: MessagePayload::Control(data.into()),
            ..Self::new(screen)
        }
    }

    /// Creates a message from both display records and `SCONTROL` data, as found
    /// in untyped input.
    ///
    /// The message is a control message if `scontrol` is not empty or `flags`
    /// contains [`Flags::SCONTROL`].
    ///
    /// # Errors
    ///
    /// [`BuildError::MutualExclusion`] if both are non-empty.
    pub fn from_parts(
        version: u8,
        mut flags: Flags,
        screen: u16,
        displays: Vec<Display>,
        scontrol: Vec<u8>,
    ) -> Result<Self, BuildError> {
        let payload = match (displays.is_empty(), scontrol.is_empty()) {
            (false, false) => return Err(BuildError::MutualExclusion),
            (true, false) => MessagePayload::Control(scontrol),
            _ if flags.contains(Flags::SCONTROL) => MessagePayload::Control(scontrol),
            _ => MessagePayload::Displays(displays),
        };

        if let MessagePayload::Control(_) = payload {
            flags.insert(Flags::SCONTROL);
        }

        Ok(Self {
            version,
            flags,
            screen,
            payload,
        })
    }

    #[inline]
    pub fn with_display(mut self, display: Display) -> Self {
        self.push_display(display);
        self
    }

    /// Appends a display record.
    ///
    /// A control message is turned into an empty display message first.
    pub fn push_display(&mut self, display: Display) {
        match &mut self.payload {
            MessagePayload::Displays(displays) => displays.push(display),
            MessagePayload::Control(_) => {
                self.flags.remove(Flags::SCONTROL);
                self.payload = MessagePayload::Displays(alloc::vec![display]);
            }
        }
    }

    #[inline(always)]
    pub const fn is_broadcast(&self) -> bool {
        self.screen == BROADCAST
    }

    #[inline(always)]
    pub const fn kind(&self) -> MessageType {
        match self.payload {
            MessagePayload::Displays(_) => MessageType::Display,
            MessagePayload::Control(_) => MessageType::Control,
        }
    }

    /// The display records, empty for control messages.
    #[inline]
    pub fn displays(&self) -> &[Display] {
        match &self.payload {
            MessagePayload::Displays(displays) => displays,
            MessagePayload::Control(_) => &[],
        }
    }

    /// The `SCONTROL` data, empty for display messages.
    #[inline]
    pub fn scontrol(&self) -> &[u8] {
        match &self.payload {
            MessagePayload::Displays(_) => &[],
            MessagePayload::Control(data) => data,
        }
    }

    /// Parses a message from the start of `msg`, returning it along with any
    /// bytes following it (e.g. another message in the same datagram).
    pub fn parse(msg: &[u8]) -> Result<(Self, &[u8]), ParseError> {
        let Some((&[pbc0, pbc1, version, flags, screen0, screen1], _)) =
            msg.split_first_chunk::<HEADER_LEN>()
        else {
            return Err(ParseError::HeaderLength { bytes: msg.into() });
        };

        let byte_count = usize::from(u16::from_le_bytes([pbc0, pbc1]));

        // the byte count covers everything after the PBC field
        let counted = &msg[2..];

        if byte_count < HEADER_LEN - 2 {
            return Err(ParseError::ByteCountMismatch {
                expected: HEADER_LEN - 2,
                actual: byte_count,
                bytes: msg[..HEADER_LEN].into(),
            });
        }

        let Some((counted, remaining)) = counted.split_at_checked(byte_count) else {
            return Err(ParseError::ByteCountMismatch {
                expected: byte_count,
                actual: counted.len(),
                bytes: counted.into(),
            });
        };

        let flags = Flags::from_bits_retain(flags);
        let mut payload = counted.get(HEADER_LEN - 2..).unwrap_or_default();

        let payload = if flags.contains(Flags::SCONTROL) {
            MessagePayload::Control(payload.into())
        } else {
            let mut displays = Vec::new();

            while !payload.is_empty() {
                let (display, rem) = Display::from_dmsg(flags, payload)?;
                displays.push(display);
                payload = rem;
            }

            MessagePayload::Displays(displays)
        };

        let message = Self {
            version,
            flags,
            screen: u16::from_le_bytes([screen0, screen1]),
            payload,
        };

        Ok((message, remaining))
    }

    /// Builds a single packet from this message.
    ///
    /// # Errors
    ///
    /// [`BuildError::PacketLength`] if the packet would exceed
    /// [`MAX_PACKET_LEN`], unless `ignore_packet_length` is set. Use
    /// [`build_messages`](Self::build_messages) to split large messages instead.
    pub fn build_message(&self, ignore_packet_length: bool) -> Result<Vec<u8>, BuildError> {
        let mut packets = Packets::new(self, ignore_packet_length);

        let first = packets.next().unwrap_or(Err(BuildError::PacketLength { len: 0 }))?;

        // only reachable when the length limit applies
        let total = packets.try_fold(first.len(), |total, packet| {
            packet.map(|p| total + p.len() - HEADER_LEN)
        })?;

        if total > first.len() {
            return Err(BuildError::PacketLength { len: total });
        }

        Ok(first)
    }

    /// Builds the packet(s) for this message, lazily.
    ///
    /// Display records are packed in order, starting a new packet, with the same
    /// header, whenever the next record would push the current one above
    /// [`MAX_PACKET_LEN`]. Each packet can be parsed on its own.
    ///
    /// If any display text isn't pure ASCII, the [`Flags::UTF16`] flag is set on
    /// all packets (and a warning is logged if it wasn't set already).
    ///
    /// The iterator yields [`BuildError::PacketLength`], then stops, if a single
    /// display record, or the `SCONTROL` data, cannot fit in a packet on its own.
    #[inline]
    pub fn build_messages(&self) -> Packets<'_> {
        Packets::new(self, false)
    }

    /// The flags written to the packets of this message.
    fn wire_flags(&self) -> Flags {
        let mut flags = self.flags;

        match &self.payload {
            MessagePayload::Control(_) => flags.insert(Flags::SCONTROL),
            MessagePayload::Displays(displays) => {
                flags.remove(Flags::SCONTROL);

                if !flags.contains(Flags::UTF16) && displays.iter().any(Display::needs_utf16) {
                    log::warn!(
                        "screen {}: non-ASCII display text, setting the UTF16 flag",
                        self.screen
                    );
                    flags.insert(Flags::UTF16);
                }
            }
        }

        flags
    }
}

/// Iterator over the packets of a [`Message`].
///
/// Returned by [`Message::build_messages`].
#[derive(Debug, Clone)]
pub struct Packets<'a> {
    message: &'a Message,
    flags: Flags,
    ignore_packet_length: bool,
    // index of the next display record to encode
    next_display: usize,
    done: bool,
}

impl<'a> Packets<'a> {
    fn new(message: &'a Message, ignore_packet_length: bool) -> Self {
        Self {
            message,
            flags: message.wire_flags(),
            ignore_packet_length,
            next_display: 0,
            done: false,
        }
    }

    /// The flags written to every packet.
    #[inline(always)]
    pub const fn flags(&self) -> Flags {
        self.flags
    }

    fn start_packet(&self) -> Vec<u8> {
        let mut header = arrayvec::ArrayVec::<u8, HEADER_LEN>::new_const();
        // the PBC is filled in once the packet is complete
        header.extend([0, 0]);
        header.push(self.message.version);
        header.push(self.flags.bits());
        header.extend(self.message.screen.to_le_bytes());

        let mut packet = Vec::with_capacity(MAX_PACKET_LEN);
        packet.extend_from_slice(&header);
        packet
    }

    fn finish_packet(mut packet: Vec<u8>) -> Result<Vec<u8>, BuildError> {
        let byte_count = u16::try_from(packet.len() - 2)
            .map_err(|_| BuildError::PacketLength { len: packet.len() })?;

        packet[..2].copy_from_slice(&byte_count.to_le_bytes());
        Ok(packet)
    }

    fn next_packet(&mut self) -> Result<Vec<u8>, BuildError> {
        let mut packet = self.start_packet();

        let displays = match &self.message.payload {
            MessagePayload::Control(data) => {
                self.done = true;

                let len = packet.len() + data.len();
                if !self.ignore_packet_length && len > MAX_PACKET_LEN {
                    return Err(BuildError::PacketLength { len });
                }

                packet.extend_from_slice(data);
                return Self::finish_packet(packet);
            }
            MessagePayload::Displays(displays) => displays,
        };

        let mut dmsg = Vec::new();

        for display in &displays[self.next_display..] {
            dmsg.clear();
            display.write_dmsg(self.flags, &mut dmsg)?;

            if !self.ignore_packet_length && packet.len() + dmsg.len() > MAX_PACKET_LEN {
                if packet.len() == HEADER_LEN {
                    // the record doesn't even fit in an empty packet
                    return Err(BuildError::PacketLength {
                        len: HEADER_LEN + dmsg.len(),
                    });
                }
                break;
            }

            packet.extend_from_slice(&dmsg);
            self.next_display += 1;
        }

        self.done = self.next_display >= displays.len();

        Self::finish_packet(packet)
    }
}

impl Iterator for Packets<'_> {
    type Item = Result<Vec<u8>, BuildError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let res = self.next_packet();

        if res.is_err() {
            self.done = true;
        }

        Some(res)
    }
}

impl core::iter::FusedIterator for Packets<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DisplayPayload, TallyColor};
    use alloc::{format, vec, vec::Vec};

    /// Screen 1, a single display at index 1, right-hand lamp red, brightness 0,
    /// text "BAR".
    const SIMPLE_PACKET: [u8; 15] = [
        0x0D, 0x00, // PBC
        0x00, // version
        0x00, // flags
        0x01, 0x00, // screen
        0x01, 0x00, // index
        0x01, 0x00, // control
        0x03, 0x00, // text length
        b'B', b'A', b'R',
    ];

    fn simple_message() -> Message {
        let mut display = Display::new(1).with_text("BAR").with_brightness(0);
        display.rh_tally = TallyColor::Red;
        Message::new(1).with_display(display)
    }

    fn numbered_displays(n: u16) -> Vec<Display> {
        (0..n)
            .map(|i| Display::new(i).with_text(format!("Display {i:05}")))
            .collect()
    }

    #[test]
    fn parse_simple_packet() {
        let (message, remaining) = Message::parse(&SIMPLE_PACKET).unwrap();

        assert!(remaining.is_empty());
        assert_eq!(message, simple_message());
        assert_eq!(message.kind(), MessageType::Display);
        assert!(!message.is_broadcast());
    }

    #[test]
    fn build_simple_packet() {
        assert_eq!(simple_message().build_message(false).unwrap(), SIMPLE_PACKET);
    }

    #[test]
    fn back_to_back_packets() {
        let mut datagram = Vec::from(SIMPLE_PACKET);
        datagram.extend(Message::control(3, [9, 9]).build_message(false).unwrap());

        let (first, rem) = Message::parse(&datagram).unwrap();
        assert_eq!(first, simple_message());

        let (second, rem) = Message::parse(rem).unwrap();
        assert!(rem.is_empty());
        assert_eq!(second.screen, 3);
        assert_eq!(second.scontrol(), [9, 9]);
    }

    #[test]
    fn header_errors() {
        assert_eq!(
            Message::parse(&SIMPLE_PACKET[..5]),
            Err(ParseError::HeaderLength {
                bytes: SIMPLE_PACKET[..5].into()
            })
        );

        let err = Message::parse(&SIMPLE_PACKET[..14]).unwrap_err();
        assert!(matches!(
            err,
            ParseError::ByteCountMismatch {
                expected: 13,
                actual: 12,
                ..
            }
        ));
        assert_eq!(err.bytes(), &SIMPLE_PACKET[2..14]);

        // a byte count too small to even cover the rest of the header
        for pbc in 0..4 {
            let packet = [pbc, 0, 0, 0, 1, 0, 0xAA, 0xBB];
            assert_eq!(
                Message::parse(&packet),
                Err(ParseError::ByteCountMismatch {
                    expected: 4,
                    actual: usize::from(pbc),
                    bytes: packet[..6].into(),
                })
            );
        }
    }

    #[test]
    fn truncated_display_in_packet() {
        let mut packet = SIMPLE_PACKET;
        // claim a longer text than what the packet holds
        packet[10] = 0x04;

        assert!(matches!(
            Message::parse(&packet),
            Err(ParseError::TextBytesMismatch {
                expected: 4,
                actual: 3,
                ..
            })
        ));
    }

    #[test]
    fn control_message() {
        let message = Message::control(0x10, [1, 2, 3, 4]);
        let packet = message.build_message(false).unwrap();

        assert_eq!(packet, [8, 0, 0, 2, 0x10, 0, 1, 2, 3, 4]);
        assert_eq!(Message::parse(&packet).unwrap(), (message, &[][..]));
    }

    #[test]
    fn empty_messages() {
        let message = Message::broadcast();
        let packets: Vec<_> = message.build_messages().collect::<Result<_, _>>().unwrap();

        assert_eq!(packets, [vec![4, 0, 0, 0, 0xFF, 0xFF]]);

        let (parsed, _) = Message::parse(&packets[0]).unwrap();
        assert!(parsed.is_broadcast());
        assert!(parsed.displays().is_empty());
    }

    #[test]
    fn scontrol_too_large() {
        let message = Message::control(1, vec![0; MAX_PACKET_LEN - HEADER_LEN + 1]);

        let mut packets = message.build_messages();
        assert_eq!(
            packets.next(),
            Some(Err(BuildError::PacketLength {
                len: MAX_PACKET_LEN + 1
            }))
        );
        assert_eq!(packets.next(), None);

        let fits = Message::control(1, vec![0; MAX_PACKET_LEN - HEADER_LEN]);
        assert_eq!(fits.build_message(false).unwrap().len(), MAX_PACKET_LEN);
    }

    #[test]
    fn display_control_data_too_large() {
        let message = Message::new(1)
            .with_display(Display::new(0).with_text("ok"))
            .with_display(Display::control(1, vec![0xAB; MAX_PACKET_LEN]));

        let results: Vec<_> = message.build_messages().collect();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(BuildError::PacketLength { .. })));

        let message = Message::new(1).with_display(Display::control(1, vec![0; 3000]));
        assert!(matches!(
            message.build_messages().next(),
            Some(Err(BuildError::PacketLength { len: 3012 }))
        ));
    }

    #[test]
    fn fragmentation() {
        let displays = numbered_displays(300);
        let mut message = Message::new(7);
        message.version = 1;
        message.payload = MessagePayload::Displays(displays.clone());

        let packets: Vec<_> = message.build_messages().collect::<Result<_, _>>().unwrap();
        assert!(packets.len() > 1);

        let mut parsed_displays = Vec::new();

        for packet in &packets {
            assert!(packet.len() <= MAX_PACKET_LEN);

            let (parsed, rem) = Message::parse(packet).unwrap();
            assert!(rem.is_empty());
            assert_eq!(parsed.version, 1);
            assert_eq!(parsed.screen, 7);
            assert_eq!(parsed.flags, Flags::NONE);

            parsed_displays.extend_from_slice(parsed.displays());
        }

        assert_eq!(parsed_displays, displays);

        // a second call starts over
        assert_eq!(message.build_messages().count(), packets.len());
    }

    #[test]
    fn fragmentation_fills_packets() {
        // each record is 6 + 13 = 19 bytes long
        let per_packet = (MAX_PACKET_LEN - HEADER_LEN) / 19;
        let mut message = Message::new(0);
        message.payload = MessagePayload::Displays(numbered_displays(per_packet as u16 + 1));

        let packets: Vec<_> = message.build_messages().collect::<Result<_, _>>().unwrap();

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].len(), HEADER_LEN + per_packet * 19);
        assert_eq!(packets[1].len(), HEADER_LEN + 19);
    }

    #[test]
    fn oversized_single_packet() {
        let mut message = Message::new(0);
        message.payload = MessagePayload::Displays(numbered_displays(200));

        assert!(matches!(
            message.build_message(false),
            Err(BuildError::PacketLength { len }) if len == HEADER_LEN + 200 * 19
        ));

        let packet = message.build_message(true).unwrap();
        assert_eq!(packet.len(), HEADER_LEN + 200 * 19);
        assert_eq!(Message::parse(&packet).unwrap().0, message);
    }

    #[test]
    fn utf16_auto_upgrade() {
        let message = Message::new(2).with_display(Display::new(4).with_text("Kamera Ü"));
        assert!(!message.flags.contains(Flags::UTF16));

        let packets = message.build_messages();
        assert!(packets.flags().contains(Flags::UTF16));

        let packet = message.build_message(false).unwrap();
        let (parsed, _) = Message::parse(&packet).unwrap();

        assert!(parsed.flags.contains(Flags::UTF16));
        assert_eq!(parsed.displays()[0].text(), "Kamera Ü");

        let ascii = Message::new(2).with_display(Display::new(4).with_text("Kamera U"));
        let (parsed, _) = Message::parse(&ascii.build_message(false).unwrap()).unwrap();
        assert_eq!(parsed.flags, Flags::NONE);
        assert_eq!(parsed, ascii);
    }

    #[test]
    fn from_parts_exclusivity() {
        assert_eq!(
            Message::from_parts(0, Flags::NONE, 1, vec![Display::new(0)], vec![1]),
            Err(BuildError::MutualExclusion)
        );

        let message = Message::from_parts(0, Flags::SCONTROL, 1, Vec::new(), Vec::new()).unwrap();
        assert_eq!(message.kind(), MessageType::Control);

        let message = Message::from_parts(0, Flags::NONE, 1, Vec::new(), vec![5]).unwrap();
        assert!(message.flags.contains(Flags::SCONTROL));
        assert_eq!(message.scontrol(), [5]);
    }

    #[test]
    fn push_display_onto_control_message() {
        let mut message = Message::control(1, [1]);
        message.push_display(Display::new(3));

        assert_eq!(message.kind(), MessageType::Display);
        assert!(!message.flags.contains(Flags::SCONTROL));
        assert_eq!(message.displays().len(), 1);
    }

    #[test]
    fn serde_roundtrip() {
        let mut message = simple_message();
        message.push_display(Display::control(2, [0xC0, 0xFF, 0xEE]));

        let bytes = postcard::to_allocvec(&message).unwrap();
        let decoded: Message = postcard::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, message);
        assert_eq!(
            decoded.displays()[1].payload,
            DisplayPayload::Control(vec![0xC0, 0xFF, 0xEE])
        );
    }
}
