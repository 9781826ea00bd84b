//! Screens: groups of tallies sharing a screen index, updated by whole messages.

use crate::{Error, IndexMap, Tally, TallyFields, TallyKey, TallyUpdate};
use std::collections::hash_map::Entry;
use umd_proto::{BROADCAST, Message, MessagePayload, MessageType};
use umd_utils::{ListenerId, Listeners};

/// Events produced by [`Screen::update_from_message`] and emitted to the screen's
/// listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenEvent {
    /// A tally was created.
    TallyAdded { key: TallyKey },
    /// Fields of an existing tally changed.
    TallyUpdated { key: TallyKey, changed: TallyFields },
    /// A tally received new, non-empty, control data.
    TallyControl { key: TallyKey, data: Vec<u8> },
    /// The screen received new, non-empty, `SCONTROL` data.
    Control { screen: u16, data: Vec<u8> },
}

#[derive(Debug)]
pub struct Screen {
    index: u16,
    scontrol: Vec<u8>,
    tallies: IndexMap<Tally>,
    listeners: Listeners<ScreenEvent>,
}

impl Screen {
    pub fn new(index: u16) -> Self {
        Self {
            index,
            scontrol: Vec::new(),
            tallies: IndexMap::default(),
            listeners: Listeners::new(),
        }
    }

    /// The screen addressing every screen.
    #[inline(always)]
    pub fn broadcast() -> Self {
        Self::new(BROADCAST)
    }

    #[inline(always)]
    pub const fn index(&self) -> u16 {
        self.index
    }

    #[inline(always)]
    pub const fn is_broadcast(&self) -> bool {
        self.index == BROADCAST
    }

    /// The last `SCONTROL` data received or sent, empty if none.
    #[inline(always)]
    pub fn scontrol(&self) -> &[u8] {
        &self.scontrol
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.tallies.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.tallies.is_empty()
    }

    #[inline(always)]
    pub fn contains(&self, index: u16) -> bool {
        self.tallies.contains_key(&index)
    }

    #[inline]
    pub fn tally(&self, index: u16) -> Option<&Tally> {
        self.tallies.get(&index)
    }

    #[inline]
    pub fn tally_mut(&mut self, index: u16) -> Option<&mut Tally> {
        self.tallies.get_mut(&index)
    }

    /// Iterates over the tallies of this screen, in no particular order.
    #[inline]
    pub fn tallies(&self) -> impl Iterator<Item = &Tally> {
        self.tallies.values()
    }

    #[inline]
    pub fn tallies_mut(&mut self) -> impl Iterator<Item = &mut Tally> {
        self.tallies.values_mut()
    }

    /// The indices of the tallies of this screen, in ascending order.
    pub fn indices(&self) -> Vec<u16> {
        let mut indices: Vec<_> = self.tallies.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Creates a tally at `index`.
    ///
    /// # Errors
    ///
    /// - [`Error::TallyExists`] if there already is one.
    /// - [`Error::BroadcastTally`] if `index` is [`BROADCAST`], see
    ///   [`broadcast_tally`](Self::broadcast_tally) instead.
    pub fn add_tally(&mut self, index: u16) -> Result<&mut Tally, Error> {
        if self.contains(index) {
            return Err(Error::TallyExists(TallyKey::new(self.index, index)));
        }

        self.get_or_create_tally(index)
    }

    /// Returns the tally at `index`, creating it if needed.
    ///
    /// # Errors
    ///
    /// [`Error::BroadcastTally`] if `index` is [`BROADCAST`].
    pub fn get_or_create_tally(&mut self, index: u16) -> Result<&mut Tally, Error> {
        if index == BROADCAST {
            return Err(Error::BroadcastTally);
        }

        let key = TallyKey::new(self.index, index);

        let tally = match self.tallies.entry(index) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                log::debug!("tally {key} added");
                self.listeners.emit(&ScreenEvent::TallyAdded { key });
                entry.insert(Tally::new(key))
            }
        };

        Ok(tally)
    }

    /// Creates a transient tally with the [`BROADCAST`] index, holding `update`.
    ///
    /// The tally is not stored in this screen. Its display record, once sent,
    /// applies to every display of the screen.
    pub fn broadcast_tally(&self, update: TallyUpdate) -> Tally {
        let mut tally = Tally::new(TallyKey::new(self.index, BROADCAST));
        tally.update(update);
        tally
    }

    /// Applies a received message, and returns the resulting events, which are
    /// also emitted to this screen's listeners.
    ///
    /// Messages addressed to another screen are ignored, unless they are
    /// broadcast to every screen.
    ///
    /// A display record with the [`BROADCAST`] index is applied to every tally
    /// of this screen and never creates one. Other records update the tally with
    /// the same index, creating it if needed.
    pub fn update_from_message(&mut self, message: &Message) -> Vec<ScreenEvent> {
        if message.screen != self.index && !message.is_broadcast() {
            return Vec::new();
        }

        let mut events = Vec::new();

        match &message.payload {
            MessagePayload::Control(data) => {
                self.scontrol.clone_from(data);

                if !data.is_empty() {
                    events.push(ScreenEvent::Control {
                        screen: self.index,
                        data: data.clone(),
                    });
                }
            }
            MessagePayload::Displays(displays) => {
                for display in displays {
                    if display.is_broadcast() {
                        for index in self.indices() {
                            if let Some(tally) = self.tallies.get_mut(&index) {
                                let changed = tally.update_from_display(display);
                                push_tally_events(&mut events, tally, changed);
                            }
                        }
                        continue;
                    }

                    match self.tallies.entry(display.index) {
                        Entry::Occupied(mut entry) => {
                            let tally = entry.get_mut();
                            let changed = tally.update_from_display(display);
                            push_tally_events(&mut events, tally, changed);
                        }
                        Entry::Vacant(entry) => {
                            let tally = Tally::from_display(self.index, display);
                            let key = tally.key();

                            log::debug!("tally {key} added");
                            events.push(ScreenEvent::TallyAdded { key });

                            // a brand new tally can't report its control data as changed
                            if display.kind() == MessageType::Control && !tally.control().is_empty() {
                                events.push(ScreenEvent::TallyControl {
                                    key,
                                    data: tally.control().into(),
                                });
                            }

                            entry.insert(tally);
                        }
                    }
                }
            }
        }

        for event in &events {
            self.listeners.emit(event);
        }

        events
    }

    /// Applies `update` to every tally of this screen, in index order, and
    /// returns the resulting events, which are also emitted to this screen's
    /// listeners.
    ///
    /// Unlike a broadcast display record, which carries every field, only the
    /// fields set in `update` are touched.
    pub fn update_all(&mut self, update: &TallyUpdate) -> Vec<ScreenEvent> {
        let mut events = Vec::new();

        for index in self.indices() {
            if let Some(tally) = self.tallies.get_mut(&index) {
                let changed = tally.update(update.clone());
                push_tally_events(&mut events, tally, changed);
            }
        }

        for event in &events {
            self.listeners.emit(event);
        }

        events
    }

    #[inline]
    pub fn subscribe(&mut self, callback: impl FnMut(&ScreenEvent) + Send + 'static) -> ListenerId {
        self.listeners.subscribe(callback)
    }

    #[inline]
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}

fn push_tally_events(events: &mut Vec<ScreenEvent>, tally: &Tally, changed: TallyFields) {
    if changed.is_empty() {
        return;
    }

    let key = tally.key();
    events.push(ScreenEvent::TallyUpdated { key, changed });

    if changed.contains(TallyFields::CONTROL) && !tally.control().is_empty() {
        events.push(ScreenEvent::TallyControl {
            key,
            data: tally.control().into(),
        });
    }
}
