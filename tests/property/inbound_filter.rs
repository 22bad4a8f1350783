//! Property tests for the inbound conversation filter.
//!
//! 1. Arbitrary bodies never panic the filter.
//! 2. A message is accepted exactly when its conversation id equals the
//!    active one, whether the id travels as a JSON number or a string.
//! 3. Nothing is accepted while no conversation is active.

use arena::channel::accept_inbound;
use arena_proto::model::ConversationId;
use proptest::prelude::*;

fn body(conversation: &serde_json::Value, content: &str) -> String {
    serde_json::json!({
        "conversationId": conversation,
        "senderId": 7,
        "content": content,
    })
    .to_string()
}

proptest! {
    #[test]
    fn arbitrary_bodies_never_panic(input in ".{0,256}", active in "[a-z0-9-]{0,12}") {
        let active = ConversationId::new(active);
        let _ = accept_inbound(&input, Some(&active));
        let _ = accept_inbound(&input, None);
    }

    #[test]
    fn accepted_iff_ids_match(active in 0u32..50, incoming in 0u32..50, as_number: bool, content in ".{0,32}") {
        let wire = if as_number {
            serde_json::json!(incoming)
        } else {
            serde_json::json!(incoming.to_string())
        };
        let active_id = ConversationId::new(active.to_string());
        let accepted = accept_inbound(&body(&wire, &content), Some(&active_id));
        prop_assert_eq!(accepted.is_some(), active == incoming);
        if let Some(message) = accepted {
            prop_assert_eq!(message.content, content);
        }
    }

    #[test]
    fn nothing_is_accepted_without_an_active_conversation(id in "[a-z0-9-]{1,12}") {
        let wire = serde_json::json!(id);
        prop_assert!(accept_inbound(&body(&wire, "hi"), None).is_none());
    }
}
