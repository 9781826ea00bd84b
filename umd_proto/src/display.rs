//! A single display record (`DMSG`) and its encoding.

use crate::{BROADCAST, BuildError, Flags, MessageType, ParseError, TallyColor, TallyType};
use alloc::{string::String, vec::Vec};
use serde::{Deserialize, Serialize};

/// Set in the control word when the display carries control data instead of text.
const CTRL_IS_CONTROL_DATA: u16 = 0x8000;

/// Index (2 bytes) + control word (2 bytes) + length field (2 bytes).
pub(crate) const DMSG_HEADER_LEN: usize = 6;

/// Either text, or control data, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayPayload {
    /// Text to display, UTF-16LE or UTF-8 encoded on the wire.
    Text(String),
    /// Per-display control data.
    ///
    /// UMDv5.0 does not define the layout of this field. It is encoded as a
    /// 2-byte length prefix followed by the data, like text is.
    Control(Vec<u8>),
}

impl Default for DisplayPayload {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// A single tally display.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Display {
    /// The display index, [`BROADCAST`] addresses every display of the screen.
    pub index: u16,
    /// Right-hand tally lamp.
    pub rh_tally: TallyColor,
    /// Text tally lamp.
    pub txt_tally: TallyColor,
    /// Left-hand tally lamp.
    pub lh_tally: TallyColor,
    /// Brightness, from 0 to 3. Only the two low bits are encoded.
    pub brightness: u8,
    pub payload: DisplayPayload,
    /// Encodes the text into exactly this many bytes (zero-padded or truncated)
    /// instead of its natural length.
    ///
    /// Some hardware sends fixed-width text fields, this allows producing
    /// byte-identical packets. Not part of equality comparisons.
    pub text_length: Option<u16>,
}

impl Default for Display {
    fn default() -> Self {
        Self::new(0)
    }
}

impl PartialEq for Display {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.rh_tally == other.rh_tally
            && self.txt_tally == other.txt_tally
            && self.lh_tally == other.lh_tally
            && self.brightness == other.brightness
            && self.payload == other.payload
    }
}

impl Display {
    /// Creates an empty text display, all lamps off, at full brightness.
    #[inline(always)]
    pub const fn new(index: u16) -> Self {
        Self {
            index,
            rh_tally: TallyColor::Off,
            txt_tally: TallyColor::Off,
            lh_tally: TallyColor::Off,
            brightness: 3,
            payload: DisplayPayload::Text(String::new()),
            text_length: None,
        }
    }

    /// Creates a display addressed to every display of its screen.
    #[inline(always)]
    pub const fn broadcast() -> Self {
        Self::new(BROADCAST)
    }

    /// Creates a control display carrying `data`.
    #[inline]
    pub fn control(index: u16, data: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: DisplayPayload::Control(data.into()),
            ..Self::new(index)
        }
    }

    /// Creates a display from both text and control data, as found in untyped input.
    ///
    /// The display is a control display if `control` is not empty.
    ///
    /// # Errors
    ///
    /// [`BuildError::MutualExclusion`] if both are non-empty.
    pub fn from_parts(
        index: u16,
        text: impl Into<String>,
        control: impl Into<Vec<u8>>,
    ) -> Result<Self, BuildError> {
        let (text, control) = (text.into(), control.into());

        let payload = match (text.is_empty(), control.is_empty()) {
            (false, false) => return Err(BuildError::MutualExclusion),
            (_, true) => DisplayPayload::Text(text),
            (true, false) => DisplayPayload::Control(control),
        };

        Ok(Self {
            payload,
            ..Self::new(index)
        })
    }

    #[inline]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.payload = DisplayPayload::Text(text.into());
        self
    }

    #[inline(always)]
    pub fn with_text_length(mut self, text_length: u16) -> Self {
        self.text_length = Some(text_length);
        self
    }

    #[inline(always)]
    pub fn with_brightness(mut self, brightness: u8) -> Self {
        self.brightness = brightness;
        self
    }

    #[inline(always)]
    pub fn with_color(mut self, tally_type: TallyType, color: TallyColor) -> Self {
        self.set_color(tally_type, color);
        self
    }

    #[inline(always)]
    pub const fn is_broadcast(&self) -> bool {
        self.index == BROADCAST
    }

    #[inline(always)]
    pub const fn kind(&self) -> MessageType {
        match self.payload {
            DisplayPayload::Text(_) => MessageType::Display,
            DisplayPayload::Control(_) => MessageType::Control,
        }
    }

    /// The display text, empty for control displays.
    #[inline]
    pub fn text(&self) -> &str {
        match &self.payload {
            DisplayPayload::Text(text) => text,
            DisplayPayload::Control(_) => "",
        }
    }

    /// The display control data, empty for text displays.
    #[inline]
    pub fn control_data(&self) -> &[u8] {
        match &self.payload {
            DisplayPayload::Text(_) => &[],
            DisplayPayload::Control(data) => data,
        }
    }

    /// The lamp color of an elementary lamp position, or, for compound positions,
    /// the union of the colors of all positions in the set.
    pub fn color(&self, tally_type: TallyType) -> TallyColor {
        tally_type
            .iter()
            .fold(TallyColor::Off, |acc, member| match member {
                TallyType::RH_TALLY => acc | self.rh_tally,
                TallyType::TXT_TALLY => acc | self.txt_tally,
                TallyType::LH_TALLY => acc | self.lh_tally,
                _ => acc,
            })
    }

    /// Sets the color of every lamp position in `tally_type`.
    pub fn set_color(&mut self, tally_type: TallyType, color: TallyColor) {
        for member in tally_type {
            match member {
                TallyType::RH_TALLY => self.rh_tally = color,
                TallyType::TXT_TALLY => self.txt_tally = color,
                TallyType::LH_TALLY => self.lh_tally = color,
                _ => (),
            }
        }
    }

    /// The 16-bit control word: lamp colors, brightness and the control data marker.
    pub const fn control_word(&self) -> u16 {
        let mut ctrl = self.rh_tally.bits() as u16
            | (self.txt_tally.bits() as u16) << 2
            | (self.lh_tally.bits() as u16) << 4
            | ((self.brightness & 0b11) as u16) << 6;

        if let DisplayPayload::Control(_) = self.payload {
            ctrl |= CTRL_IS_CONTROL_DATA;
        }

        ctrl
    }

    /// Returns `true` if the text can only be encoded as UTF-16LE.
    #[inline(always)]
    pub(crate) fn needs_utf16(&self) -> bool {
        !self.text().is_ascii()
    }

    /// Encodes this display's `DMSG` bytes at the end of `out`.
    ///
    /// The text is encoded as UTF-16LE if `flags` contains [`Flags::UTF16`] or the
    /// text isn't pure ASCII.
    ///
    /// # Errors
    ///
    /// [`BuildError::PacketLength`] if the text or control data doesn't fit in a
    /// 16-bit length field.
    pub fn write_dmsg(&self, flags: Flags, out: &mut Vec<u8>) -> Result<(), BuildError> {
        let mut header = arrayvec::ArrayVec::<u8, DMSG_HEADER_LEN>::new_const();
        header.extend(self.index.to_le_bytes());
        header.extend(self.control_word().to_le_bytes());

        let body = match &self.payload {
            DisplayPayload::Control(data) => data.clone(),
            DisplayPayload::Text(text) => {
                let mut bytes = if flags.contains(Flags::UTF16) || self.needs_utf16() {
                    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
                } else {
                    Vec::from(text.as_bytes())
                };

                if let Some(len) = self.text_length {
                    bytes.resize(usize::from(len), 0);
                }

                bytes
            }
        };

        let body_len = u16::try_from(body.len()).map_err(|_| BuildError::PacketLength {
            len: body.len().saturating_add(DMSG_HEADER_LEN),
        })?;

        header.extend(body_len.to_le_bytes());

        out.reserve(header.len() + body.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&body);

        Ok(())
    }

    /// Returns this display's encoded `DMSG` bytes.
    ///
    /// See [`write_dmsg`](Self::write_dmsg).
    #[inline]
    pub fn to_dmsg(&self, flags: Flags) -> Result<Vec<u8>, BuildError> {
        let mut out = Vec::new();
        self.write_dmsg(flags, &mut out)?;
        Ok(out)
    }

    /// Parses a display from the start of `dmsg`, returning it along with the
    /// bytes following it.
    ///
    /// Text is decoded as UTF-16LE if `flags` contains [`Flags::UTF16`], and as
    /// UTF-8 otherwise. UTF-8 text is cut at its first NUL byte, if any.
    pub fn from_dmsg(flags: Flags, dmsg: &[u8]) -> Result<(Self, &[u8]), ParseError> {
        let Some((&[i0, i1, c0, c1], rem)) = dmsg.split_first_chunk::<4>() else {
            return Err(ParseError::DisplayHeaderLength { bytes: dmsg.into() });
        };

        let index = u16::from_le_bytes([i0, i1]);
        let ctrl = u16::from_le_bytes([c0, c1]);

        // the casts keep the two low bits only
        let mut display = Self {
            rh_tally: TallyColor::from_bits_truncate(ctrl as u8),
            txt_tally: TallyColor::from_bits_truncate((ctrl >> 2) as u8),
            lh_tally: TallyColor::from_bits_truncate((ctrl >> 4) as u8),
            brightness: ((ctrl >> 6) & 0b11) as u8,
            ..Self::new(index)
        };

        if ctrl & CTRL_IS_CONTROL_DATA != 0 {
            let (data, rem) = unpack_control_data(rem)?;
            display.payload = DisplayPayload::Control(data.into());
            return Ok((display, rem));
        }

        let Some((&len, rem)) = rem.split_first_chunk() else {
            return Err(ParseError::TextLengthField { bytes: rem.into() });
        };

        let len = usize::from(u16::from_le_bytes(len));

        let Some((text, rem)) = rem.split_at_checked(len) else {
            return Err(ParseError::TextBytesMismatch {
                expected: len,
                actual: rem.len(),
                bytes: rem.into(),
            });
        };

        display.payload = DisplayPayload::Text(decode_text(flags, text)?);

        Ok((display, rem))
    }
}

/// Splits length-prefixed control data off the start of `data`.
fn unpack_control_data(data: &[u8]) -> Result<(&[u8], &[u8]), ParseError> {
    data.split_first_chunk()
        .and_then(|(&len, rem)| rem.split_at_checked(usize::from(u16::from_le_bytes(len))))
        .ok_or_else(|| ParseError::ControlDataFormat { bytes: data.into() })
}

fn decode_text(flags: Flags, bytes: &[u8]) -> Result<String, ParseError> {
    let invalid = || ParseError::InvalidText {
        bytes: bytes.into(),
    };

    if flags.contains(Flags::UTF16) {
        let units = bytes.chunks_exact(2);

        if !units.remainder().is_empty() {
            return Err(invalid());
        }

        char::decode_utf16(units.map(|unit| u16::from_le_bytes([unit[0], unit[1]])))
            .collect::<Result<String, _>>()
            .map_err(|_| invalid())
    } else {
        // fixed-width fields from some hardware are zero-padded
        let bytes = bytes
            .iter()
            .position(|&b| b == 0)
            .map_or(bytes, |nul| &bytes[..nul]);

        core::str::from_utf8(bytes)
            .map(String::from)
            .map_err(|_| invalid())
    }
}
