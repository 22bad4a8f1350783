//! Property tests for the STOMP frame codec.
//!
//! 1. Arbitrary text never panics the decoder.
//! 2. Header names and values with STOMP special characters survive
//!    encode → decode on frames that use escaping.
//! 3. Bodies (including embedded NULs) survive thanks to `content-length`.

use arena_proto::stomp::{self, Command, Frame};
use proptest::prelude::*;

fn arb_header_text() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            Just('\\'),
            Just('\n'),
            Just('\r'),
            Just(':'),
            any::<char>().prop_filter("no NUL", |c| *c != '\0'),
        ],
        1..24,
    )
    .prop_map(|chars| chars.into_iter().collect())
}

proptest! {
    #[test]
    fn decode_never_panics(input in ".{0,512}") {
        let _ = stomp::decode(&input);
    }

    #[test]
    fn escaped_headers_survive(name in arb_header_text(), value in arb_header_text()) {
        let frame = Frame::new(Command::Message).header(name.clone(), value.clone());
        let decoded = stomp::decode(&frame.encode()).unwrap().unwrap();
        prop_assert_eq!(decoded.get(&name), Some(value.as_str()));
    }

    #[test]
    fn bodies_survive_with_content_length(body in ".{1,256}") {
        let frame = Frame::send_json("/app/chat.sendMessage", body.clone());
        let decoded = stomp::decode(&frame.encode()).unwrap().unwrap();
        prop_assert_eq!(decoded.body, body);
        prop_assert_eq!(decoded.command, Command::Send);
    }
}
