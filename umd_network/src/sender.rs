//! Sending endpoint: batches local tally changes into messages, and periodically
//! refreshes every tally it knows.

use crate::{Error, IndexMap, Screen, Tally, TallyEvent, TallyFields, TallyKey, TallyUpdate, UdpSock};
use core::{mem, net::SocketAddr, ops::ControlFlow, time::Duration};
use std::{
    collections::{BTreeMap, BTreeSet, hash_map::Entry},
    sync::mpsc,
};
use umd_proto::{BROADCAST, Message, MessagePayload, MessageType, TallyColor, TallyType};
use umd_utils::IntervalTimer;

/// Period of the [`UmdSender::start`] loop.
pub const TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderConfig {
    /// Every tally is sent again if nothing was sent for this long.
    pub tx_interval: Duration,
    /// Turn every lamp off when closing.
    pub all_off_on_close: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            tx_interval: Duration::from_millis(300),
            all_off_on_close: false,
        }
    }
}

type Pending = (TallyKey, MessageType);

/// Sends the state of its tallies to a set of clients.
///
/// Changes to tallies are queued, and sent by [`flush`](Self::flush), which
/// coalesces every change to the same screen into a single message.
///
/// # Note
///
/// Tallies are observed through their listeners, so changes made through
/// [`tally_mut`](Self::tally_mut) are picked up as well.
#[derive(Debug)]
pub struct UmdSender {
    config: SenderConfig,
    clients: rustc_hash::FxHashSet<SocketAddr>,
    screens: IndexMap<Screen>,
    pending_tx: mpsc::Sender<Pending>,
    pending_rx: mpsc::Receiver<Pending>,
    // one-shot messages, sent before pending changes
    outbox: Vec<Message>,
    refresh: IntervalTimer,
}

impl Default for UmdSender {
    fn default() -> Self {
        Self::new(SenderConfig::default())
    }
}

impl UmdSender {
    /// Creates a sender with no clients, knowing only of the broadcast screen.
    pub fn new(config: SenderConfig) -> Self {
        let (pending_tx, pending_rx) = mpsc::channel();

        let mut screens = IndexMap::default();
        screens.insert(BROADCAST, Screen::broadcast());

        Self {
            refresh: IntervalTimer::new(config.tx_interval),
            config,
            clients: Default::default(),
            screens,
            pending_tx,
            pending_rx,
            outbox: Vec::new(),
        }
    }

    #[inline(always)]
    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    pub fn set_tx_interval(&mut self, tx_interval: Duration) {
        self.config.tx_interval = tx_interval;
        self.refresh.set_interval(tx_interval);
    }

    #[inline(always)]
    pub fn set_all_off_on_close(&mut self, all_off_on_close: bool) {
        self.config.all_off_on_close = all_off_on_close;
    }

    /// Returns `false` if `addr` already was a client.
    pub fn add_client(&mut self, addr: SocketAddr) -> bool {
        let added = self.clients.insert(addr);
        if added {
            log::debug!("client {addr} added");
        }
        added
    }

    /// Returns `false` if `addr` wasn't a client.
    pub fn remove_client(&mut self, addr: &SocketAddr) -> bool {
        self.clients.remove(addr)
    }

    #[inline]
    pub fn clients(&self) -> impl Iterator<Item = &SocketAddr> {
        self.clients.iter()
    }

    #[inline]
    pub fn screen(&self, index: u16) -> Option<&Screen> {
        self.screens.get(&index)
    }

    /// Iterates over every known screen, including the broadcast screen, in no
    /// particular order.
    #[inline]
    pub fn screens(&self) -> impl Iterator<Item = &Screen> {
        self.screens.values()
    }

    #[inline]
    pub fn tally(&self, key: TallyKey) -> Option<&Tally> {
        self.screen(key.screen)?.tally(key.index)
    }

    /// Changes made through the returned reference are sent with the next
    /// [`flush`](Self::flush).
    #[inline]
    pub fn tally_mut(&mut self, key: TallyKey) -> Option<&mut Tally> {
        self.screens.get_mut(&key.screen)?.tally_mut(key.index)
    }

    #[inline]
    pub fn tallies(&self) -> impl Iterator<Item = &Tally> {
        self.screens.values().flat_map(Screen::tallies)
    }

    fn screen_entry(&mut self, index: u16) -> &mut Screen {
        self.screens.entry(index).or_insert_with(|| {
            log::debug!("screen {index} added");
            Screen::new(index)
        })
    }

    /// Returns the tally at `key`, creating it, and its screen, if needed.
    ///
    /// New tallies are sent with the next flush.
    fn tally_entry(&mut self, key: TallyKey) -> Result<&mut Tally, Error> {
        let screen = match self.screens.entry(key.screen) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                log::debug!("screen {} added", key.screen);
                entry.insert(Screen::new(key.screen))
            }
        };

        let created = !screen.contains(key.index);
        let tally = screen.get_or_create_tally(key.index)?;

        if created {
            let tx = self.pending_tx.clone();

            tally.subscribe(move |event| {
                let pending = match event {
                    TallyEvent::Updated { key, changed } => {
                        let mut changed = *changed;
                        changed.remove(TallyFields::CONTROL);
                        (!changed.is_empty()).then_some((*key, MessageType::Display))
                    }
                    TallyEvent::Control { key, .. } => Some((*key, MessageType::Control)),
                };

                if let Some(pending) = pending {
                    // only fails once the sender is dropped
                    let _ = tx.send(pending);
                }
            });

            let _ = self.pending_tx.send((key, MessageType::Display));
        }

        Ok(tally)
    }

    /// Creates a tally, sent with the next flush.
    ///
    /// # Errors
    ///
    /// - [`Error::TallyExists`] if there already is one.
    /// - [`Error::BroadcastTally`] if `key` has the broadcast index.
    pub fn add_tally(&mut self, key: TallyKey) -> Result<&mut Tally, Error> {
        if self.tally(key).is_some() {
            return Err(Error::TallyExists(key));
        }

        self.tally_entry(key)
    }

    /// Updates a tally, creating it if needed. Changes are sent with the next
    /// flush.
    ///
    /// # Errors
    ///
    /// [`Error::BroadcastTally`] if `key` has the broadcast index, see
    /// [`send_broadcast_tally`](Self::send_broadcast_tally) instead.
    pub fn update_tally(&mut self, key: TallyKey, update: TallyUpdate) -> Result<TallyFields, Error> {
        Ok(self.tally_entry(key)?.update(update))
    }

    /// Sets the color of every lamp position in `tally_type`.
    ///
    /// # Errors
    ///
    /// See [`update_tally`](Self::update_tally), and [`Error::NoTallyType`] if
    /// `tally_type` is empty.
    pub fn set_tally_color(
        &mut self,
        key: TallyKey,
        tally_type: TallyType,
        color: TallyColor,
    ) -> Result<TallyFields, Error> {
        if tally_type.is_empty() {
            return Err(Error::NoTallyType);
        }

        self.update_tally(key, TallyUpdate::new().color(tally_type, color))
    }

    #[inline]
    pub fn set_tally_text(&mut self, key: TallyKey, text: impl Into<String>) -> Result<TallyFields, Error> {
        self.update_tally(key, TallyUpdate::new().text(text))
    }

    /// Sends control data to a tally with the next flush. The same data can be
    /// sent repeatedly.
    pub fn send_tally_control(&mut self, key: TallyKey, data: impl Into<Vec<u8>>) -> Result<(), Error> {
        self.update_tally(key, TallyUpdate::new().control(data))
            .map(|_| ())
    }

    /// Sends `update` to every display of a screen, with a single broadcast
    /// display record. The record is a control record if `update` holds
    /// non-empty control data.
    ///
    /// Tallies of that screen known to this sender take the fields set in
    /// `update`, and keep the others.
    ///
    /// # Note
    ///
    /// A display record always carries every field, receivers see the default
    /// value of the fields missing from `update` until the next refresh.
    pub fn send_broadcast_tally(&mut self, screen: u16, update: TallyUpdate) {
        let kind = match &update.control {
            Some(data) if !data.is_empty() => MessageType::Control,
            _ => MessageType::Display,
        };

        self.broadcast_tally(screen, update, kind);
    }

    /// Sends control data to every display of a screen, along with the other
    /// fields set in `update`, e.g. lamp colors.
    ///
    /// See [`send_broadcast_tally`](Self::send_broadcast_tally).
    pub fn send_broadcast_tally_control(
        &mut self,
        screen: u16,
        data: impl Into<Vec<u8>>,
        update: TallyUpdate,
    ) {
        self.broadcast_tally(screen, update.control(data), MessageType::Control);
    }

    fn broadcast_tally(&mut self, screen: u16, update: TallyUpdate, kind: MessageType) {
        let display = self
            .screen_entry(screen)
            .broadcast_tally(update.clone())
            .to_display(kind);

        self.outbox.push(Message::new(screen).with_display(display));

        self.mirror(|screens| {
            screens
                .values_mut()
                .filter(|s| screen == BROADCAST || s.index() == screen)
                .for_each(|s| {
                    s.update_all(&update);
                });
        });
    }

    /// Sends `SCONTROL` data to a screen.
    pub fn send_scontrol(&mut self, screen: u16, data: impl Into<Vec<u8>>) {
        self.screen_entry(screen);

        let message = Message::control(screen, data);

        self.mirror(|screens| {
            for s in screens.values_mut() {
                s.update_from_message(&message);
            }
        });

        self.outbox.push(message);
    }

    /// Sends `SCONTROL` data to every screen.
    #[inline]
    pub fn send_broadcast_scontrol(&mut self, data: impl Into<Vec<u8>>) {
        self.send_scontrol(BROADCAST, data);
    }

    /// Applies `f` to the local screens without queueing the resulting
    /// changes, which are already part of an outgoing message.
    fn mirror(&mut self, f: impl FnOnce(&mut IndexMap<Screen>)) {
        let pending: Vec<_> = self.pending_rx.try_iter().collect();

        f(&mut self.screens);

        self.pending_rx.try_iter().for_each(drop);

        for pending in pending {
            let _ = self.pending_tx.send(pending);
        }
    }

    /// Sends queued messages and pending changes to every client, returns the
    /// number of packets sent to each.
    ///
    /// Pending changes are grouped into one message per screen, tallies
    /// ordered by index. If nothing was sent for [`SenderConfig::tx_interval`],
    /// every tally of every screen but the broadcast screen is sent instead of
    /// the pending text and lamp changes.
    ///
    /// Display records too large for a packet are logged and left out, the
    /// rest of their message is still sent.
    ///
    /// # Errors
    ///
    /// Only socket errors are returned.
    pub fn flush(&mut self, sock: &impl UdpSock) -> Result<usize, Error> {
        let mut messages = mem::take(&mut self.outbox);
        let refresh = self.refresh.is_due();

        // (screen, index, kind), sorted
        let pending: BTreeSet<_> = self
            .pending_rx
            .try_iter()
            .filter(|&(_, kind)| !(refresh && kind == MessageType::Display))
            .map(|(key, kind)| (key.screen, key.index, kind))
            .collect();

        let mut batches = BTreeMap::new();

        if refresh {
            for screen in self
                .screens
                .values()
                .filter(|screen| !screen.is_broadcast() && !screen.is_empty())
            {
                let message = batches
                    .entry(screen.index())
                    .or_insert_with(|| Message::new(screen.index()));

                for index in screen.indices() {
                    if let Some(tally) = screen.tally(index) {
                        message.push_display(tally.to_display(MessageType::Display));
                    }
                }
            }
        }

        for (screen, index, kind) in pending {
            let Some(tally) = self.screens.get(&screen).and_then(|s| s.tally(index)) else {
                continue;
            };

            batches
                .entry(screen)
                .or_insert_with(|| Message::new(screen))
                .push_display(tally.to_display(kind));
        }

        messages.extend(batches.into_values());

        if messages.is_empty() && !refresh {
            return Ok(0);
        }

        let mut sent = 0;

        for message in &messages {
            for packet in packets(message) {
                for &client in &self.clients {
                    sock.send(&packet, client)?;
                }

                sent += 1;
            }
        }

        self.refresh.reset();

        if sent != 0 {
            log::debug!(
                "sent {sent} packets to {} clients{}",
                self.clients.len(),
                if refresh { " (refresh)" } else { "" }
            );
        }

        Ok(sent)
    }

    /// Runs the send loop, blocking until `on_tick` breaks, then
    /// [`close`](Self::close)s the sender.
    ///
    /// Every [`TICK`], `on_tick` is called, and then [`flush`](Self::flush).
    ///
    /// The function returns early if a packet can't be sent.
    pub fn start(
        &mut self,
        sock: &impl UdpSock,
        mut on_tick: impl FnMut(&mut Self) -> ControlFlow<()>,
    ) -> Result<(), Error> {
        log::info!("sender started, {} clients", self.clients.len());

        loop {
            if on_tick(self).is_break() {
                break;
            }

            self.flush(sock)?;
            std::thread::sleep(TICK);
        }

        self.close(sock)
    }

    /// Sends everything still queued. With [`SenderConfig::all_off_on_close`],
    /// every lamp of every screen is turned off first.
    pub fn close(&mut self, sock: &impl UdpSock) -> Result<(), Error> {
        if self.config.all_off_on_close {
            let mut screens: Vec<_> = self
                .screens
                .values()
                .filter(|screen| !screen.is_broadcast() && !screen.is_empty())
                .map(Screen::index)
                .collect();
            screens.sort_unstable();

            for screen in screens {
                self.send_broadcast_tally(
                    screen,
                    TallyUpdate::new().color(TallyType::ALL_TALLY, TallyColor::Off),
                );
            }
        }

        self.flush(sock)?;
        log::info!("sender closed");

        Ok(())
    }
}

/// Builds the packets of `message`, leaving out display records that can't
/// fit in a packet on their own.
fn packets(message: &Message) -> Vec<Vec<u8>> {
    let err = match message.build_messages().collect::<Result<Vec<_>, _>>() {
        Ok(packets) => return packets,
        Err(e) => e,
    };

    let MessagePayload::Displays(displays) = &message.payload else {
        log::error!("screen {}: {err}, message dropped", message.screen);
        return Vec::new();
    };

    let mut fitting = Message::new(message.screen);

    for display in displays {
        let single = Message::new(message.screen).with_display(display.clone());

        match single.build_message(false) {
            Ok(_) => fitting.push_display(display.clone()),
            Err(e) => log::error!(
                "tally {}: {e}, record dropped",
                TallyKey::new(message.screen, display.index)
            ),
        }
    }

    if fitting.displays().is_empty() {
        return Vec::new();
    }

    fitting
        .build_messages()
        .collect::<Result<_, _>>()
        .unwrap_or_default()
}
