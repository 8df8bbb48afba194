use super::*;
use serde_json::json;

#[test]
fn parses_object_frame() {
    let frame = json!({
        "event": "messages.upsert",
        "instance": "store-01",
        "date_time": "2024-05-01T10:00:00.000Z",
        "data": {"key": {"id": "A1"}}
    })
    .to_string();

    let envelope = parse_realtime_frame(&frame).expect("envelope");
    assert_eq!(envelope.kind(), RealtimeEventKind::MessagesUpsert);
    assert_eq!(envelope.instance.as_deref(), Some("store-01"));
    assert_eq!(envelope.data["key"]["id"], "A1");
}

#[test]
fn parses_legacy_array_frame_with_bare_payload() {
    let frame = json!(["MESSAGES_UPSERT", {"messages": []}]).to_string();

    let envelope = parse_realtime_frame(&frame).expect("envelope");
    assert_eq!(envelope.kind(), RealtimeEventKind::MessagesUpsert);
    assert!(envelope.instance.is_none());
    assert!(envelope.data["messages"].is_array());
}

#[test]
fn parses_legacy_array_frame_wrapping_full_envelope() {
    let frame = json!([
        "messages.upsert",
        {"event": "messages.upsert", "instance": "store-01", "data": {"key": {"id": "B"}}}
    ])
    .to_string();

    let envelope = parse_realtime_frame(&frame).expect("envelope");
    assert_eq!(envelope.instance.as_deref(), Some("store-01"));
    assert_eq!(envelope.data["key"]["id"], "B");
}

#[test]
fn rejects_frames_without_event_name() {
    assert!(matches!(
        parse_realtime_frame("[]"),
        Err(FrameError::MissingEventName)
    ));
    assert!(matches!(
        parse_realtime_frame("[42, {}]"),
        Err(FrameError::MissingEventName)
    ));
    assert!(matches!(
        parse_realtime_frame("{\"data\": {}}"),
        Err(FrameError::UnsupportedShape)
    ));
    assert!(matches!(
        parse_realtime_frame("not json"),
        Err(FrameError::InvalidJson(_))
    ));
}

#[test]
fn event_names_compare_without_case_or_separator() {
    assert_eq!(canonical_event_name("SEND_MESSAGE"), "send.message");
    assert!(RealtimeEventKind::from_event_name("Messages_Set").carries_messages());
    assert!(!RealtimeEventKind::from_event_name("connection.update").carries_messages());
}

#[test]
fn subscribe_request_serializes_expected_shape() {
    let body = serde_json::to_value(SubscribeRequest::new("store-01")).expect("json");
    assert_eq!(body, json!({"action": "subscribe", "instance": "store-01"}));
}

#[test]
fn send_text_request_uses_gateway_field_names() {
    let body = serde_json::to_value(SendTextRequest::new("5511@c.us", "hi")).expect("json");
    assert_eq!(body["textMessage"]["text"], "hi");
    assert_eq!(body["options"]["delay"], 1200);
    assert_eq!(body["options"]["presence"], "composing");
}

#[test]
fn connection_state_accepts_flat_and_nested_forms() {
    let flat: ConnectionStateResponse = serde_json::from_value(json!({"state": "open"})).unwrap();
    let nested: ConnectionStateResponse =
        serde_json::from_value(json!({"instance": {"state": "connected"}})).unwrap();
    let closed: ConnectionStateResponse =
        serde_json::from_value(json!({"instance": {"state": "close"}})).unwrap();
    assert!(flat.is_connected());
    assert!(nested.is_connected());
    assert!(!closed.is_connected());
}

#[test]
fn profile_picture_response_prefers_primary_field() {
    let response: ProfilePictureResponse = serde_json::from_value(json!({
        "wuid": "5511@s.whatsapp.net",
        "profilePictureUrl": "https://pps.example/a.jpg",
        "pictureUrl": "https://pps.example/b.jpg"
    }))
    .unwrap();
    assert_eq!(response.url().as_deref(), Some("https://pps.example/a.jpg"));

    let fallback: ProfilePictureResponse =
        serde_json::from_value(json!({"pictureUrl": "https://pps.example/b.jpg"})).unwrap();
    assert_eq!(fallback.url().as_deref(), Some("https://pps.example/b.jpg"));
}
