//! Lamp colors and lamp positions.

use core::{fmt, ops, str};
use serde::{Deserialize, Serialize};

/// Color of a single tally lamp.
///
/// This is a two-bit set over `RED` and `GREEN`, [`Amber`](Self::Amber) being
/// both at once. Combining colors with `|` merges them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum TallyColor {
    #[default]
    Off = 0,
    Red = 1,
    Green = 2,
    Amber = 3,
}

impl TallyColor {
    /// All colors, in ordinal order.
    pub const ALL: [Self; 4] = [Self::Off, Self::Red, Self::Green, Self::Amber];

    /// Returns the color represented by the two low bits of `bits`, or `None`
    /// if any other bit is set.
    #[inline(always)]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Off),
            1 => Some(Self::Red),
            2 => Some(Self::Green),
            3 => Some(Self::Amber),
            _ => None,
        }
    }

    /// Same as [`from_bits`](Self::from_bits), ignoring bits above bit 1.
    #[inline(always)]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Off,
            1 => Self::Red,
            2 => Self::Green,
            _ => Self::Amber,
        }
    }

    #[inline(always)]
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Returns `true` if every color in `other` is also lit in `self`.
    #[inline(always)]
    pub const fn contains(self, other: Self) -> bool {
        self.bits() & other.bits() == other.bits()
    }

    #[inline(always)]
    pub const fn is_off(self) -> bool {
        matches!(self, Self::Off)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Red => "RED",
            Self::Green => "GREEN",
            Self::Amber => "AMBER",
        }
    }
}

impl ops::BitOr for TallyColor {
    type Output = Self;

    #[inline(always)]
    fn bitor(self, rhs: Self) -> Self {
        Self::from_bits_truncate(self.bits() | rhs.bits())
    }
}

impl ops::BitOrAssign for TallyColor {
    #[inline(always)]
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

impl ops::BitAnd for TallyColor {
    type Output = Self;

    #[inline(always)]
    fn bitand(self, rhs: Self) -> Self {
        Self::from_bits_truncate(self.bits() & rhs.bits())
    }
}

impl fmt::Display for TallyColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing a [`TallyColor`] or a [`TallyType`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown member name {0:?}")]
pub struct UnknownName(pub alloc::string::String);

impl str::FromStr for TallyColor {
    type Err = UnknownName;

    /// Parses member names (case-insensitive) joined by `|`, e.g. `"red|green"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split('|').try_fold(Self::Off, |acc, name| {
            let name = name.trim();
            Self::ALL
                .into_iter()
                .find(|c| c.name().eq_ignore_ascii_case(name))
                .map(|c| acc | c)
                .ok_or_else(|| UnknownName(name.into()))
        })
    }
}

/// A set of lamp positions within a display.
///
/// Each of the three lamps of a display ([`RH_TALLY`](Self::RH_TALLY),
/// [`TXT_TALLY`](Self::TXT_TALLY) and [`LH_TALLY`](Self::LH_TALLY)) occupies its
/// own bit, so positions can be combined with `|` and addressed together.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct TallyType(u8);

impl TallyType {
    pub const NO_TALLY: Self = Self(0);
    /// The "right-hand" lamp.
    pub const RH_TALLY: Self = Self(1);
    /// The lamp lighting the text label.
    pub const TXT_TALLY: Self = Self(2);
    /// The "left-hand" lamp.
    pub const LH_TALLY: Self = Self(4);
    pub const ALL_TALLY: Self = Self(7);

    const MEMBERS: [(Self, &'static str); 3] = [
        (Self::RH_TALLY, "rh_tally"),
        (Self::TXT_TALLY, "txt_tally"),
        (Self::LH_TALLY, "lh_tally"),
    ];

    /// Returns the lamp set represented by `bits`, or `None` if a bit outside of
    /// [`ALL_TALLY`](Self::ALL_TALLY) is set.
    #[inline(always)]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL_TALLY.0 == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    #[inline(always)]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline(always)]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if this set holds more than one lamp position.
    #[inline(always)]
    pub const fn is_compound(self) -> bool {
        self.0.count_ones() > 1
    }

    /// Iterates over the elementary lamp positions in this set, in ascending
    /// bit order. [`NO_TALLY`](Self::NO_TALLY) yields nothing.
    #[inline(always)]
    pub const fn iter(self) -> Members {
        Members { set: self, next: 0 }
    }

    /// The three elementary lamp positions.
    #[inline(always)]
    pub const fn all() -> Members {
        Self::ALL_TALLY.iter()
    }

    /// The name of an elementary lamp position, `None` for compound sets.
    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::NO_TALLY => Some("no_tally"),
            Self::ALL_TALLY => Some("all_tally"),
            _ => Self::MEMBERS
                .into_iter()
                .find_map(|(member, name)| (member == self).then_some(name)),
        }
    }
}

/// Error returned when converting bits outside of
/// [`ALL_TALLY`](TallyType::ALL_TALLY) into a [`TallyType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid lamp position bits {0:#04x}")]
pub struct InvalidBits(pub u8);

impl TryFrom<u8> for TallyType {
    type Error = InvalidBits;

    #[inline(always)]
    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        Self::from_bits(bits).ok_or(InvalidBits(bits))
    }
}

impl From<TallyType> for u8 {
    #[inline(always)]
    fn from(tally_type: TallyType) -> u8 {
        tally_type.0
    }
}

impl ops::BitOr for TallyType {
    type Output = Self;

    #[inline(always)]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for TallyType {
    #[inline(always)]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl IntoIterator for TallyType {
    type Item = Self;
    type IntoIter = Members;

    #[inline(always)]
    fn into_iter(self) -> Members {
        self.iter()
    }
}

/// Iterator over the elementary lamp positions of a [`TallyType`].
#[derive(Debug, Clone)]
pub struct Members {
    set: TallyType,
    // index into `TallyType::MEMBERS`
    next: usize,
}

impl Iterator for Members {
    type Item = TallyType;

    fn next(&mut self) -> Option<TallyType> {
        while let Some(&(member, _)) = TallyType::MEMBERS.get(self.next) {
            self.next += 1;
            if self.set.contains(member) {
                return Some(member);
            }
        }
        None
    }
}

impl fmt::Display for TallyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.name() {
            return f.write_str(name);
        }

        for (i, member) in self.iter().enumerate() {
            if i != 0 {
                f.write_str("|")?;
            }
            f.write_str(member.name().unwrap_or("?"))?;
        }

        Ok(())
    }
}

impl str::FromStr for TallyType {
    type Err = UnknownName;

    /// Parses lamp names joined by `|`, e.g. `"rh_tally|lh_tally"`.
    ///
    /// `"all"` and `"all_tally"` are accepted for [`ALL_TALLY`](Self::ALL_TALLY),
    /// the `_tally` suffix may be omitted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split('|').try_fold(Self::NO_TALLY, |acc, name| {
            let name = name.trim().to_ascii_lowercase();
            let name = name.strip_suffix("_tally").unwrap_or(&name);

            let member = match name {
                "no" | "none" => Self::NO_TALLY,
                "all" => Self::ALL_TALLY,
                "rh" => Self::RH_TALLY,
                "txt" => Self::TXT_TALLY,
                "lh" => Self::LH_TALLY,
                _ => return Err(UnknownName(name.into())),
            };

            Ok(acc | member)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::{format, vec::Vec};

    #[test]
    fn merge_converges_to_amber() {
        let mut color = TallyColor::Off;

        color |= TallyColor::Red;
        assert_eq!(color, TallyColor::Red);
        color |= TallyColor::Green;
        assert_eq!(color, TallyColor::Amber);

        for other in [TallyColor::Red, TallyColor::Green, TallyColor::Off] {
            color |= other;
            assert_eq!(color, TallyColor::Amber);
        }
    }

    #[test]
    fn color_bits() {
        for color in TallyColor::ALL {
            assert_eq!(TallyColor::from_bits(color.bits()), Some(color));
        }
        assert_eq!(TallyColor::from_bits(4), None);
        assert_eq!(TallyColor::from_bits_truncate(0b101), TallyColor::Red);
        assert!(TallyColor::Amber.contains(TallyColor::Green));
        assert!(!TallyColor::Red.contains(TallyColor::Green));
        assert_eq!(TallyColor::Amber & TallyColor::Green, TallyColor::Green);
    }

    #[test]
    fn color_from_str() {
        assert_eq!("red".parse(), Ok(TallyColor::Red));
        assert_eq!("RED|Green".parse(), Ok(TallyColor::Amber));
        assert_eq!(" off ".parse(), Ok(TallyColor::Off));
        assert!("blue".parse::<TallyColor>().is_err());
        assert_eq!(format!("{}", TallyColor::Amber), "AMBER");
    }

    #[test]
    fn tally_type_iteration() {
        let members: Vec<_> = TallyType::ALL_TALLY.iter().collect();
        assert_eq!(
            members,
            [TallyType::RH_TALLY, TallyType::TXT_TALLY, TallyType::LH_TALLY]
        );

        let members: Vec<_> = (TallyType::LH_TALLY | TallyType::RH_TALLY).into_iter().collect();
        assert_eq!(members, [TallyType::RH_TALLY, TallyType::LH_TALLY]);

        assert_eq!(TallyType::NO_TALLY.iter().count(), 0);
        assert_eq!(TallyType::TXT_TALLY.iter().count(), 1);
        assert_eq!(TallyType::all().count(), 3);
    }

    #[test]
    fn tally_type_compound() {
        assert!(TallyType::ALL_TALLY.is_compound());
        assert!((TallyType::RH_TALLY | TallyType::TXT_TALLY).is_compound());
        assert!(!TallyType::LH_TALLY.is_compound());
        assert!(!TallyType::NO_TALLY.is_compound());
        assert_eq!(TallyType::from_bits(8), None);
        assert_eq!(TallyType::try_from(0b1000_0001), Err(InvalidBits(0x81)));
    }

    #[test]
    fn tally_type_serde_checks_bits() {
        let both = TallyType::RH_TALLY | TallyType::LH_TALLY;
        let bytes = postcard::to_allocvec(&both).unwrap();
        assert_eq!(bytes, [5]);
        assert_eq!(postcard::from_bytes::<TallyType>(&bytes).unwrap(), both);

        assert!(postcard::from_bytes::<TallyType>(&[8]).is_err());
        assert!(postcard::from_bytes::<TallyType>(&[0xFF]).is_err());
    }

    #[test]
    fn tally_type_names() {
        assert_eq!("rh_tally|lh_tally".parse(), Ok(TallyType::RH_TALLY | TallyType::LH_TALLY));
        assert_eq!("all".parse(), Ok(TallyType::ALL_TALLY));
        assert_eq!("TXT".parse(), Ok(TallyType::TXT_TALLY));
        assert!("middle".parse::<TallyType>().is_err());

        assert_eq!(format!("{}", TallyType::TXT_TALLY), "txt_tally");
        assert_eq!(format!("{}", TallyType::ALL_TALLY), "all_tally");
        assert_eq!(
            format!("{}", TallyType::RH_TALLY | TallyType::LH_TALLY),
            "rh_tally|lh_tally"
        );
    }
}
