use proptest::prelude::*;
use umd_proto::{
    Display, DisplayPayload, Flags, MAX_PACKET_LEN, Message, MessagePayload, TallyColor,
};

fn color() -> impl Strategy<Value = TallyColor> {
    (0u8..4).prop_map(TallyColor::from_bits_truncate)
}

fn payload() -> impl Strategy<Value = DisplayPayload> {
    prop_oneof![
        // no NULs, they terminate UTF-8 text
        "[^\\x00]{0,40}".prop_map(DisplayPayload::Text),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(DisplayPayload::Control),
    ]
}

fn display() -> impl Strategy<Value = Display> {
    (any::<u16>(), color(), color(), color(), 0u8..4, payload()).prop_map(
        |(index, rh_tally, txt_tally, lh_tally, brightness, payload)| Display {
            index,
            rh_tally,
            txt_tally,
            lh_tally,
            brightness,
            payload,
            text_length: None,
        },
    )
}

fn display_message() -> impl Strategy<Value = Message> {
    (
        any::<u8>(),
        any::<bool>(),
        any::<u16>(),
        prop::collection::vec(display(), 0..300),
    )
        .prop_map(|(version, utf16, screen, displays)| Message {
            version,
            flags: if utf16 { Flags::UTF16 } else { Flags::NONE },
            screen,
            payload: MessagePayload::Displays(displays),
        })
}

proptest! {
    #[test]
    fn packets_reassemble_into_message(message in display_message()) {
        let mut displays = Vec::new();

        for packet in message.build_messages() {
            let packet = packet.unwrap();
            prop_assert!(packet.len() <= MAX_PACKET_LEN);

            let (parsed, rem) = Message::parse(&packet).unwrap();
            prop_assert!(rem.is_empty());
            prop_assert_eq!(parsed.version, message.version);
            prop_assert_eq!(parsed.screen, message.screen);
            prop_assert!(!parsed.flags.contains(Flags::SCONTROL));

            displays.extend_from_slice(parsed.displays());
        }

        prop_assert_eq!(displays.as_slice(), message.displays());
    }

    #[test]
    fn control_messages_roundtrip(
        screen in any::<u16>(),
        data in prop::collection::vec(any::<u8>(), 0..=MAX_PACKET_LEN - 6),
    ) {
        let message = Message::control(screen, data);
        let packet = message.build_message(false).unwrap();

        let (parsed, rem) = Message::parse(&packet).unwrap();
        prop_assert!(rem.is_empty());
        prop_assert_eq!(parsed, message);
    }

    #[test]
    fn parse_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut rem = bytes.as_slice();

        while let Ok((_, next)) = Message::parse(rem) {
            if next.is_empty() {
                break;
            }
            rem = next;
        }
    }
}
