//! Property-based wire codec tests.
//!
//! Uses proptest to verify:
//! 1. Any valid `ChatMessage` survives a `ServerFrame` round-trip.
//! 2. Any valid `ClientFrame` survives encode → decode.
//! 3. Random bytes never panic the decoders (they return `Err` gracefully).

use neochat_proto::message::{ChatMessage, MessageId, Timestamp, UserId};
use neochat_proto::wire::{
    ClientFrame, ServerFrame, decode_client, decode_server, encode_client, encode_server,
};
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy for generating arbitrary `MessageId` values.
fn arb_message_id() -> impl Strategy<Value = MessageId> {
    any::<u128>().prop_map(|n| MessageId::from_uuid(Uuid::from_u128(n)))
}

/// Strategy for generating arbitrary opaque `UserId` values.
fn arb_user_id() -> impl Strategy<Value = UserId> {
    "[a-zA-Z0-9_-]{1,32}".prop_map(UserId::new)
}

/// Strategy for generating arbitrary `ChatMessage` values.
fn arb_chat_message() -> impl Strategy<Value = ChatMessage> {
    (
        arb_message_id(),
        arb_user_id(),
        arb_user_id(),
        "[^\x00]{0,64}",
        "[^\x00]{0,64}",
        "[^\x00]{1,1024}",
        any::<i64>(),
        any::<bool>(),
    )
        .prop_map(
            |(id, sender_id, recipient_id, sender_name, recipient_name, content, ms, read)| {
                ChatMessage {
                    id,
                    sender_id,
                    recipient_id,
                    sender_name,
                    recipient_name,
                    content,
                    created_at: Timestamp::from_millis(ms),
                    read,
                }
            },
        )
}

/// Strategy for generating arbitrary `ClientFrame` values.
fn arb_client_frame() -> impl Strategy<Value = ClientFrame> {
    prop_oneof![
        ".{0,128}".prop_map(|token| ClientFrame::Hello { token }),
        (arb_user_id(), "[^\x00]{1,256}").prop_map(|(recipient_id, content)| {
            ClientFrame::Send {
                recipient_id,
                content,
            }
        }),
        arb_message_id().prop_map(|message_id| ClientFrame::DeleteMessage { message_id }),
        arb_user_id().prop_map(|peer_id| ClientFrame::ClearConversation { peer_id }),
    ]
}

proptest! {
    #[test]
    fn client_frame_round_trip(frame in arb_client_frame()) {
        let bytes = encode_client(&frame).unwrap();
        let decoded = decode_client(&bytes).unwrap();
        prop_assert_eq!(frame, decoded);
    }

    #[test]
    fn server_message_created_round_trip(message in arb_chat_message()) {
        let frame = ServerFrame::MessageCreated { message };
        let bytes = encode_server(&frame).unwrap();
        let decoded = decode_server(&bytes).unwrap();
        prop_assert_eq!(frame, decoded);
    }

    #[test]
    fn random_bytes_never_panic_decoders(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        // Either outcome is fine; the property is "no panic".
        let _ = decode_client(&bytes);
        let _ = decode_server(&bytes);
    }
}
