//! Contract golden tests: each frozen v1 frame shape, verified byte-level
//! against the serializer and back through the strict decoders.

use skein_protocol::{
    decode_client, decode_server, encode, ClientMessage, ServerMessage, PROTOCOL_VERSION,
};

fn assert_client_contract(json: &str, expected: &ClientMessage) {
    let decoded = decode_client(json).unwrap_or_else(|| panic!("failed to decode: {json}"));
    assert_eq!(&decoded, expected);
    let reencoded = encode(expected);
    let original: serde_json::Value = serde_json::from_str(json).unwrap();
    let ours: serde_json::Value = serde_json::from_str(&reencoded).unwrap();
    assert_eq!(original, ours, "encode drifted from the frozen frame: {json}");
}

fn assert_server_contract(json: &str, expected: &ServerMessage) {
    let decoded = decode_server(json).unwrap_or_else(|| panic!("failed to decode: {json}"));
    assert_eq!(&decoded, expected);
    let reencoded = encode(expected);
    let original: serde_json::Value = serde_json::from_str(json).unwrap();
    let ours: serde_json::Value = serde_json::from_str(&reencoded).unwrap();
    assert_eq!(original, ours, "encode drifted from the frozen frame: {json}");
}

#[test]
fn hello_and_server_hello_contract() {
    assert_client_contract(
        r#"{"type":"hello","version":1}"#,
        &ClientMessage::Hello {
            version: PROTOCOL_VERSION,
        },
    );
    assert_server_contract(
        r#"{"type":"server-hello","version":1}"#,
        &ServerMessage::ServerHello {
            version: PROTOCOL_VERSION,
        },
    );
}

#[test]
fn subscribe_unsubscribe_pong_contract() {
    assert_client_contract(
        r#"{"type":"subscribe","streamId":"run:01HZX","afterSeq":42}"#,
        &ClientMessage::Subscribe {
            stream_id: "run:01HZX".to_owned(),
            after_seq: 42,
        },
    );
    assert_client_contract(
        r#"{"type":"unsubscribe","streamId":"run:01HZX"}"#,
        &ClientMessage::Unsubscribe {
            stream_id: "run:01HZX".to_owned(),
        },
    );
    assert_client_contract(r#"{"type":"pong"}"#, &ClientMessage::Pong {});
}

#[test]
fn event_frame_contract_carries_stored_event_verbatim() {
    let json = concat!(
        r#"{"type":"event","streamId":"run:01HZX","event":"#,
        r#"{"seq":3,"timestamp":"2026-03-01T12:00:00.000Z","streamId":"run:01HZX","#,
        r#""event":{"kind":"text-delta","delta":"Hel"}}}"#,
    );
    let expected = ServerMessage::Event {
        stream_id: "run:01HZX".to_owned(),
        event: skein_core::StoredEvent {
            seq: 3,
            timestamp: "2026-03-01T12:00:00.000Z".to_owned(),
            stream_id: "run:01HZX".to_owned(),
            event: serde_json::json!({"kind": "text-delta", "delta": "Hel"}),
        },
    };
    assert_server_contract(json, &expected);
}

#[test]
fn replay_end_ping_error_contract() {
    assert_server_contract(
        r#"{"type":"replay-end","streamId":"run:01HZX","lastReplaySeq":500}"#,
        &ServerMessage::ReplayEnd {
            stream_id: "run:01HZX".to_owned(),
            last_replay_seq: 500,
        },
    );
    assert_server_contract(r#"{"type":"ping"}"#, &ServerMessage::Ping {});
    assert_server_contract(
        r#"{"type":"error","code":"REPLAY_FAILED","message":"store read failed"}"#,
        &ServerMessage::Error {
            code: "REPLAY_FAILED".to_owned(),
            message: "store read failed".to_owned(),
        },
    );
}

#[test]
fn decoders_reject_frames_from_the_wrong_direction_shape() {
    // A server frame fed to the client decoder (and vice versa) must not
    // alias onto some variant by accident.
    assert!(decode_client(r#"{"type":"server-hello","version":1}"#).is_none());
    assert!(decode_server(r#"{"type":"subscribe","streamId":"s"}"#).is_none());
}
