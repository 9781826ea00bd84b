//! Receiving endpoint: applies every received message to its screens.

use crate::{DEFAULT_PORT, IndexMap, Screen, ScreenEvent, Tally, TallyKey, UdpSock};
use core::{convert::Infallible, net::SocketAddr};
use std::collections::hash_map::Entry;
use umd_proto::{BROADCAST, Message, ParseError};
use umd_utils::{ListenerId, Listeners};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// Local address to listen on.
    pub bind_addr: SocketAddr,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
        }
    }
}

impl ReceiverConfig {
    /// Opens a socket bound to [`bind_addr`](Self::bind_addr).
    pub fn bind(&self) -> std::io::Result<std::net::UdpSocket> {
        std::net::UdpSocket::bind(self.bind_addr)
    }
}

/// Events emitted by an [`UmdReceiver`] to its listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// A message for a previously unknown screen was received.
    ScreenAdded { screen: u16 },
    Screen(ScreenEvent),
}

/// Listens for UMDv5 messages, and keeps track of the screens and tallies they
/// describe.
#[derive(Debug)]
pub struct UmdReceiver {
    config: ReceiverConfig,
    screens: IndexMap<Screen>,
    listeners: Listeners<ReceiverEvent>,
}

impl Default for UmdReceiver {
    fn default() -> Self {
        Self::new(ReceiverConfig::default())
    }
}

impl UmdReceiver {
    /// Creates a receiver knowing only of the broadcast screen.
    pub fn new(config: ReceiverConfig) -> Self {
        let mut screens = IndexMap::default();
        screens.insert(BROADCAST, Screen::broadcast());

        Self {
            config,
            screens,
            listeners: Listeners::new(),
        }
    }

    #[inline(always)]
    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    #[inline]
    pub fn screen(&self, index: u16) -> Option<&Screen> {
        self.screens.get(&index)
    }

    #[inline]
    pub fn screen_mut(&mut self, index: u16) -> Option<&mut Screen> {
        self.screens.get_mut(&index)
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

    #[inline]
    pub fn tally_mut(&mut self, key: TallyKey) -> Option<&mut Tally> {
        self.screen_mut(key.screen)?.tally_mut(key.index)
    }

    /// Iterates over every known tally, in no particular order.
    #[inline]
    pub fn tallies(&self) -> impl Iterator<Item = &Tally> {
        self.screens.values().flat_map(Screen::tallies)
    }

    #[inline]
    pub fn subscribe(&mut self, callback: impl FnMut(&ReceiverEvent) + Send + 'static) -> ListenerId {
        self.listeners.subscribe(callback)
    }

    #[inline]
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Parses a received datagram, which may hold several messages back to back,
    /// and applies each message to the matching screen.
    ///
    /// Messages for unknown screens create them. Messages for the broadcast
    /// screen are applied to every screen.
    ///
    /// Returns every resulting event, in order. They are also emitted to this
    /// receiver's listeners.
    ///
    /// # Errors
    ///
    /// Parsing stops at the first malformed message, messages preceding it are
    /// still applied.
    pub fn parse_incoming(
        &mut self,
        data: &[u8],
        addr: SocketAddr,
    ) -> Result<Vec<ReceiverEvent>, ParseError> {
        let mut events = Vec::new();
        let mut remaining = data;

        let res = loop {
            if remaining.is_empty() {
                break Ok(());
            }

            match Message::parse(remaining) {
                Ok((message, rem)) => {
                    log::trace!("{addr}: message for screen {}", message.screen);
                    self.apply(&message, &mut events);
                    remaining = rem;
                }
                Err(e) => break Err(e),
            }
        };

        for event in &events {
            self.listeners.emit(event);
        }

        res.map(|()| events)
    }

    fn apply(&mut self, message: &Message, events: &mut Vec<ReceiverEvent>) {
        if message.is_broadcast() {
            let mut indices: Vec<_> = self.screens.keys().copied().collect();
            indices.sort_unstable();

            for index in indices {
                if let Some(screen) = self.screens.get_mut(&index) {
                    events.extend(
                        screen
                            .update_from_message(message)
                            .into_iter()
                            .map(ReceiverEvent::Screen),
                    );
                }
            }

            return;
        }

        let screen = match self.screens.entry(message.screen) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                log::debug!("screen {} added", message.screen);
                events.push(ReceiverEvent::ScreenAdded {
                    screen: message.screen,
                });
                entry.insert(Screen::new(message.screen))
            }
        };

        events.extend(
            screen
                .update_from_message(message)
                .into_iter()
                .map(ReceiverEvent::Screen),
        );
    }

    /// Runs the receive loop, blocking indefinitely.
    ///
    /// Timeouts are ignored, malformed datagrams are logged and skipped.
    ///
    /// The function only returns if a non-recoverable I/O error occurs.
    pub fn start(&mut self, sock: &impl UdpSock) -> std::io::Result<Infallible> {
        log::info!("receiver listening on {}", self.config.bind_addr);

        // room for several back to back packets
        let mut buf = vec![0; 1 << 16];

        loop {
            let (n, addr) = match sock.recv(&mut buf) {
                Ok(r) => r,
                Err(e) if crate::io_err_is_timeout(e.kind()) => continue,
                Err(e) => {
                    log::info!("receiver stopped: {e}");
                    return Err(e);
                }
            };

            if let Err(e) = self.parse_incoming(&buf[..n], addr) {
                log::warn!("{addr}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        TallyFields,
        mock::{MockSock, addr},
    };
    use std::sync::{Arc, Mutex};
    use umd_proto::{Display, TallyColor, TallyType};

    fn packet(message: &Message) -> Vec<u8> {
        message.build_message(false).unwrap()
    }

    #[test]
    fn creates_screens_and_tallies() {
        let mut receiver = UmdReceiver::default();
        assert_eq!(receiver.screens().count(), 1);

        let message = Message::new(2).with_display(Display::new(1).with_text("CAM 1"));
        let events = receiver.parse_incoming(&packet(&message), addr(1)).unwrap();

        assert_eq!(
            events,
            [
                ReceiverEvent::ScreenAdded { screen: 2 },
                ReceiverEvent::Screen(ScreenEvent::TallyAdded {
                    key: TallyKey::new(2, 1)
                }),
            ]
        );

        assert_eq!(receiver.tally(TallyKey::new(2, 1)).unwrap().text(), "CAM 1");
        assert_eq!(receiver.tallies().count(), 1);
        assert!(receiver.screen(BROADCAST).unwrap().is_empty());
    }

    #[test]
    fn back_to_back_messages() {
        let mut receiver = UmdReceiver::default();

        let mut datagram = packet(&Message::new(0).with_display(Display::new(1)));
        datagram.extend(packet(
            &Message::new(0).with_display(Display::new(1).with_color(TallyType::LH_TALLY, TallyColor::Green)),
        ));

        let events = receiver.parse_incoming(&datagram, addr(1)).unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2],
            ReceiverEvent::Screen(ScreenEvent::TallyUpdated {
                key: TallyKey::new(0, 1),
                changed: TallyFields::LH_TALLY,
            })
        );
    }

    #[test]
    fn malformed_tail_keeps_leading_messages() {
        let mut receiver = UmdReceiver::default();

        let mut datagram = packet(&Message::new(0).with_display(Display::new(1)));
        datagram.extend([0xFF, 0x00, 0x00]);

        assert!(matches!(
            receiver.parse_incoming(&datagram, addr(1)),
            Err(ParseError::HeaderLength { .. })
        ));
        assert!(receiver.tally(TallyKey::new(0, 1)).is_some());
    }

    #[test]
    fn screen_broadcast_reaches_every_screen() {
        let mut receiver = UmdReceiver::default();

        for screen in [1, 2] {
            let message = Message::new(screen).with_display(Display::new(5));
            receiver.parse_incoming(&packet(&message), addr(1)).unwrap();
        }

        let message = Message::broadcast().with_display(
            Display::broadcast().with_color(TallyType::TXT_TALLY, TallyColor::Red),
        );
        let events = receiver.parse_incoming(&packet(&message), addr(1)).unwrap();

        assert_eq!(events.len(), 2);
        for screen in [1, 2] {
            let tally = receiver.tally(TallyKey::new(screen, 5)).unwrap();
            assert_eq!(tally.txt_tally(), TallyColor::Red);
        }

        // no screen, nor tally, was created
        assert_eq!(receiver.screens().count(), 3);
        assert_eq!(receiver.tallies().count(), 2);
    }

    #[test]
    fn screen_control() {
        let mut receiver = UmdReceiver::default();
        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let events = Arc::clone(&events);
            receiver.subscribe(move |e| events.lock().unwrap().push(e.clone()));
        }

        receiver
            .parse_incoming(&packet(&Message::control(3, [0xDE, 0xAD])), addr(1))
            .unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            [
                ReceiverEvent::ScreenAdded { screen: 3 },
                ReceiverEvent::Screen(ScreenEvent::Control {
                    screen: 3,
                    data: vec![0xDE, 0xAD],
                }),
            ]
        );
        assert_eq!(receiver.screen(3).unwrap().scontrol(), [0xDE, 0xAD]);
    }

    #[test]
    fn receive_loop() {
        let sock = MockSock::default();
        let message = Message::new(1).with_display(Display::new(2).with_text("PGM"));

        sock.push_incoming(Ok((vec![1, 2, 3], addr(1))));
        sock.push_incoming(Err(std::io::ErrorKind::WouldBlock.into()));
        sock.push_incoming(Ok((packet(&message), addr(1))));
        // the mock fails once it runs out of datagrams

        let mut receiver = UmdReceiver::default();
        let err = receiver.start(&sock).unwrap_err();

        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
        assert_eq!(receiver.tally(TallyKey::new(1, 2)).unwrap().text(), "PGM");
    }
}
