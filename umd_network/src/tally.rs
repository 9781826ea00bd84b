//! Long-lived tally state, mirroring the displays received or sent over time.

use core::{fmt, ops, str};
use umd_proto::{BROADCAST, Display, DisplayPayload, MessageType, TallyColor, TallyType};
use umd_utils::{ListenerId, Listeners};

/// Identifies a tally: its screen index, and its display index within that screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TallyKey {
    pub screen: u16,
    pub index: u16,
}

impl TallyKey {
    #[inline(always)]
    pub const fn new(screen: u16, index: u16) -> Self {
        Self { screen, index }
    }

    #[inline(always)]
    pub const fn is_broadcast(&self) -> bool {
        self.index == BROADCAST
    }
}

impl fmt::Display for TallyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.screen, self.index)
    }
}

/// Error returned when parsing a [`TallyKey`] that isn't formatted as `screen:index`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tally key {0:?}, expected SCREEN:INDEX")]
pub struct InvalidTallyKey(pub String);

impl str::FromStr for TallyKey {
    type Err = InvalidTallyKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split_once(':')
            .and_then(|(screen, index)| {
                Some(Self::new(screen.trim().parse().ok()?, index.trim().parse().ok()?))
            })
            .ok_or_else(|| InvalidTallyKey(s.into()))
    }
}

/// A set of tally field names, as reported by [`Tally::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TallyFields(u8);

impl TallyFields {
    pub const NONE: Self = Self(0);
    // share their bits with `TallyType`
    pub const RH_TALLY: Self = Self(1);
    pub const TXT_TALLY: Self = Self(2);
    pub const LH_TALLY: Self = Self(4);
    pub const BRIGHTNESS: Self = Self(8);
    pub const TEXT: Self = Self(16);
    pub const CONTROL: Self = Self(32);

    const NAMES: [(Self, &'static str); 6] = [
        (Self::RH_TALLY, "rh_tally"),
        (Self::TXT_TALLY, "txt_tally"),
        (Self::LH_TALLY, "lh_tally"),
        (Self::BRIGHTNESS, "brightness"),
        (Self::TEXT, "text"),
        (Self::CONTROL, "control"),
    ];

    /// The color fields of the lamp positions in `tally_type`.
    #[inline(always)]
    pub const fn from_tally_type(tally_type: TallyType) -> Self {
        Self(tally_type.bits())
    }

    #[inline(always)]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline(always)]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline(always)]
    pub const fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline(always)]
    pub const fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// The names of the fields in this set.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .into_iter()
            .filter_map(move |(field, name)| self.contains(field).then_some(name))
    }
}

impl ops::BitOr for TallyFields {
    type Output = Self;

    #[inline(always)]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for TallyFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.names().enumerate() {
            if i != 0 {
                f.write_str("|")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

/// A partial set of tally fields, applied with [`Tally::update`].
///
/// Fields left as `None` are not touched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TallyUpdate {
    pub rh_tally: Option<TallyColor>,
    pub txt_tally: Option<TallyColor>,
    pub lh_tally: Option<TallyColor>,
    pub brightness: Option<u8>,
    pub text: Option<String>,
    pub control: Option<Vec<u8>>,
}

impl TallyUpdate {
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            rh_tally: None,
            txt_tally: None,
            lh_tally: None,
            brightness: None,
            text: None,
            control: None,
        }
    }

    /// The fields carried by `display`: its colors and brightness, along with
    /// either its text or its control data, depending on its kind.
    pub fn from_display(display: &Display) -> Self {
        let update = Self {
            rh_tally: Some(display.rh_tally),
            txt_tally: Some(display.txt_tally),
            lh_tally: Some(display.lh_tally),
            brightness: Some(display.brightness),
            ..Self::new()
        };

        match &display.payload {
            DisplayPayload::Text(text) => update.text(text.clone()),
            DisplayPayload::Control(data) => update.control(data.clone()),
        }
    }

    /// Sets the color of every lamp position in `tally_type`.
    pub fn color(mut self, tally_type: TallyType, color: TallyColor) -> Self {
        for member in tally_type {
            match member {
                TallyType::RH_TALLY => self.rh_tally = Some(color),
                TallyType::TXT_TALLY => self.txt_tally = Some(color),
                TallyType::LH_TALLY => self.lh_tally = Some(color),
                _ => (),
            }
        }
        self
    }

    #[inline(always)]
    pub fn brightness(mut self, brightness: u8) -> Self {
        self.brightness = Some(brightness);
        self
    }

    #[inline]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[inline]
    pub fn control(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.control = Some(data.into());
        self
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == Self::new()
    }
}

/// Events emitted by a [`Tally`] to its listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TallyEvent {
    /// One or more fields changed.
    Updated { key: TallyKey, changed: TallyFields },
    /// New, non-empty, control data was received or set.
    Control { key: TallyKey, data: Vec<u8> },
}

/// A single tally indicator: three lamps, a brightness level, a text label
/// and the last control data it was sent.
#[derive(Debug)]
pub struct Tally {
    key: TallyKey,
    rh_tally: TallyColor,
    txt_tally: TallyColor,
    lh_tally: TallyColor,
    brightness: u8,
    text: String,
    control: Vec<u8>,
    listeners: Listeners<TallyEvent>,
}

impl Tally {
    /// Creates a tally with all lamps off, an empty label, at full brightness.
    pub fn new(key: TallyKey) -> Self {
        Self {
            key,
            rh_tally: TallyColor::Off,
            txt_tally: TallyColor::Off,
            lh_tally: TallyColor::Off,
            brightness: 3,
            text: String::new(),
            control: Vec::new(),
            listeners: Listeners::new(),
        }
    }

    /// Creates a tally holding the state of `display`, without emitting any event.
    pub fn from_display(screen: u16, display: &Display) -> Self {
        Self {
            rh_tally: display.rh_tally,
            txt_tally: display.txt_tally,
            lh_tally: display.lh_tally,
            brightness: display.brightness.min(3),
            text: display.text().into(),
            control: display.control_data().into(),
            ..Self::new(TallyKey::new(screen, display.index))
        }
    }

    #[inline(always)]
    pub const fn key(&self) -> TallyKey {
        self.key
    }

    #[inline(always)]
    pub const fn index(&self) -> u16 {
        self.key.index
    }

    #[inline(always)]
    pub const fn screen_index(&self) -> u16 {
        self.key.screen
    }

    /// Broadcast tallies are transient, they are never stored in a screen.
    #[inline(always)]
    pub const fn is_broadcast(&self) -> bool {
        self.key.is_broadcast()
    }

    #[inline(always)]
    pub const fn rh_tally(&self) -> TallyColor {
        self.rh_tally
    }

    #[inline(always)]
    pub const fn txt_tally(&self) -> TallyColor {
        self.txt_tally
    }

    #[inline(always)]
    pub const fn lh_tally(&self) -> TallyColor {
        self.lh_tally
    }

    /// Brightness, from 0 to 3.
    #[inline(always)]
    pub const fn brightness(&self) -> u8 {
        self.brightness
    }

    /// Brightness, from 0.0 to 1.0.
    #[inline(always)]
    pub fn normalized_brightness(&self) -> f32 {
        f32::from(self.brightness) / 3.
    }

    #[inline(always)]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The last control data received or set, empty if none.
    #[inline(always)]
    pub fn control(&self) -> &[u8] {
        &self.control
    }

    /// The lamp color of an elementary lamp position, or, for compound positions,
    /// the union of the colors of all positions in the set.
    pub fn color(&self, tally_type: TallyType) -> TallyColor {
        tally_type
            .iter()
            .filter_map(|member| self.color_ref(member))
            .fold(TallyColor::Off, |acc, &color| acc | color)
    }

    fn color_ref(&self, member: TallyType) -> Option<&TallyColor> {
        match member {
            TallyType::RH_TALLY => Some(&self.rh_tally),
            TallyType::TXT_TALLY => Some(&self.txt_tally),
            TallyType::LH_TALLY => Some(&self.lh_tally),
            _ => None,
        }
    }

    /// Sets the color of every lamp position in `tally_type`.
    #[inline]
    pub fn set_color(&mut self, tally_type: TallyType, color: TallyColor) -> TallyFields {
        self.update(TallyUpdate::new().color(tally_type, color))
    }

    /// Merges `color` into the current color of every lamp position in
    /// `tally_type`. Lit colors are never turned off this way.
    pub fn merge_color(&mut self, tally_type: TallyType, color: TallyColor) -> TallyFields {
        let update = tally_type.iter().fold(TallyUpdate::new(), |update, member| {
            update.color(member, self.color(member) | color)
        });

        self.update(update)
    }

    /// Merges the colors of `other` into this tally's, for the lamp positions
    /// in `tally_type`.
    pub fn merge(&mut self, other: &Self, tally_type: TallyType) -> TallyFields {
        let update = tally_type.iter().fold(TallyUpdate::new(), |update, member| {
            update.color(member, self.color(member) | other.color(member))
        });

        self.update(update)
    }

    #[inline]
    pub fn set_text(&mut self, text: impl Into<String>) -> TallyFields {
        self.update(TallyUpdate::new().text(text))
    }

    #[inline]
    pub fn set_brightness(&mut self, brightness: u8) -> TallyFields {
        self.update(TallyUpdate::new().brightness(brightness))
    }

    /// Sets the control data. Non-empty data always produces a
    /// [`TallyEvent::Control`], even if it's the same as the current one.
    #[inline]
    pub fn set_control(&mut self, data: impl Into<Vec<u8>>) -> TallyFields {
        self.update(TallyUpdate::new().control(data))
    }

    /// Applies the fields of `update` that differ from the current ones, and
    /// returns them.
    ///
    /// Listeners get a [`TallyEvent::Updated`] if anything changed, followed by a
    /// [`TallyEvent::Control`] if new, non-empty, control data was applied.
    ///
    /// # Note
    ///
    /// Control data is a one-shot signal rather than a state: receiving the same
    /// non-empty data twice counts as a change both times. Brightness is clamped
    /// to 3.
    pub fn update(&mut self, update: TallyUpdate) -> TallyFields {
        let TallyUpdate {
            rh_tally,
            txt_tally,
            lh_tally,
            brightness,
            text,
            control,
        } = update;

        let mut changed = TallyFields::NONE;

        let colors = [
            (rh_tally, &mut self.rh_tally, TallyFields::RH_TALLY),
            (txt_tally, &mut self.txt_tally, TallyFields::TXT_TALLY),
            (lh_tally, &mut self.lh_tally, TallyFields::LH_TALLY),
        ];

        for (new, current, field) in colors {
            if let Some(new) = new.filter(|new| *new != *current) {
                *current = new;
                changed.insert(field);
            }
        }

        if let Some(brightness) = brightness
            .map(|b| b.min(3))
            .filter(|&b| b != self.brightness)
        {
            self.brightness = brightness;
            changed.insert(TallyFields::BRIGHTNESS);
        }

        if let Some(text) = text.filter(|text| *text != self.text) {
            self.text = text;
            changed.insert(TallyFields::TEXT);
        }

        if let Some(control) = control {
            if !control.is_empty() && control == self.control {
                self.control.clear();
            }

            if control != self.control {
                self.control = control;
                changed.insert(TallyFields::CONTROL);
            }
        }

        if !changed.is_empty() {
            log::trace!("tally {}: {changed} changed", self.key);

            let key = self.key;
            self.listeners.emit(&TallyEvent::Updated { key, changed });

            if changed.contains(TallyFields::CONTROL) && !self.control.is_empty() {
                let data = self.control.clone();
                self.listeners.emit(&TallyEvent::Control { key, data });
            }
        }

        changed
    }

    /// Applies the fields carried by `display`, see [`TallyUpdate::from_display`].
    #[inline]
    pub fn update_from_display(&mut self, display: &Display) -> TallyFields {
        self.update(TallyUpdate::from_display(display))
    }

    /// Builds a display record from this tally, carrying either its text or its
    /// control data.
    pub fn to_display(&self, kind: MessageType) -> Display {
        let payload = match kind {
            MessageType::Display => DisplayPayload::Text(self.text.clone()),
            MessageType::Control => DisplayPayload::Control(self.control.clone()),
        };

        Display {
            index: self.key.index,
            rh_tally: self.rh_tally,
            txt_tally: self.txt_tally,
            lh_tally: self.lh_tally,
            brightness: self.brightness,
            payload,
            text_length: None,
        }
    }

    #[inline]
    pub fn subscribe(&mut self, callback: impl FnMut(&TallyEvent) + Send + 'static) -> ListenerId {
        self.listeners.subscribe(callback)
    }

    #[inline]
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}

/// Compares the fields a display carries: text is ignored for control displays,
/// control data is ignored for text displays.
impl PartialEq<Display> for Tally {
    fn eq(&self, display: &Display) -> bool {
        let payload_eq = match &display.payload {
            DisplayPayload::Text(text) => self.text == *text,
            DisplayPayload::Control(data) => self.control == *data,
        };

        self.key.index == display.index
            && self.rh_tally == display.rh_tally
            && self.txt_tally == display.txt_tally
            && self.lh_tally == display.lh_tally
            && self.brightness == display.brightness
            && payload_eq
    }
}

impl PartialEq<Tally> for Display {
    #[inline(always)]
    fn eq(&self, tally: &Tally) -> bool {
        tally == self
    }
}
