use super::*;
use events::Message as ChatMessage;

#[test]
fn ws_url_maps_http_schemes() {
    assert_eq!(ws_url("http://127.0.0.1:1999").expect("url"), "ws://127.0.0.1:1999/api/ws");
    assert_eq!(ws_url("https://chat.example.com/").expect("url"), "wss://chat.example.com/api/ws");
}

#[test]
fn ws_url_rejects_other_schemes() {
    assert!(matches!(ws_url("ftp://example.com"), Err(CliError::InvalidBaseUrl(_))));
}

#[test]
fn describe_names_each_event() {
    let channel_id = Uuid::new_v4();
    let message = ChatMessage {
        id: Uuid::new_v4(),
        member_id: Uuid::new_v4(),
        channel_id,
        content: "hi".into(),
        file_url: None,
        created_at: 1,
        edited_at: None,
    };

    assert!(describe(&ChatEvent::Created(message.clone())).starts_with("new-message "));
    assert!(describe(&ChatEvent::Deleted { id: message.id, channel_id }).starts_with("message-delete "));
}

#[test]
fn cli_parses_send_with_env_free_flags() {
    let member_id = Uuid::new_v4();
    let channel_id = Uuid::new_v4();
    let cli = Cli::try_parse_from([
        "chat-cli",
        "--session-token",
        "abc",
        "send",
        "--member-id",
        &member_id.to_string(),
        "--channel-id",
        &channel_id.to_string(),
        "hello there",
    ])
    .expect("parse");

    let Command::Send(args) = cli.command else {
        panic!("expected send");
    };
    assert_eq!(args.member_id, member_id);
    assert_eq!(args.content, "hello there");
    assert_eq!(args.file_url, None);
}

fn context(connection_id: Option<Uuid>) -> CliContext {
    CliContext { base_url: "http://127.0.0.1:1999".into(), session_token: Some("abc".into()), connection_id }
}

fn stored(channel_id: Uuid, created_at: i64) -> ChatMessage {
    ChatMessage {
        id: Uuid::new_v4(),
        member_id: Uuid::new_v4(),
        channel_id,
        content: format!("m{created_at}"),
        file_url: None,
        created_at,
        edited_at: None,
    }
}

#[test]
fn next_fetch_walks_history_until_exhausted() {
    let channel_id = Uuid::new_v4();
    let mut cache = MessageCache::new();
    assert_eq!(next_fetch(cache.channel(channel_id)), Some(0));

    cache.append_page(channel_id, MessagePage { items: vec![stored(channel_id, 2)], next_cursor: Some(1) });
    assert_eq!(next_fetch(cache.channel(channel_id)), Some(1));

    cache.append_page(channel_id, MessagePage { items: vec![stored(channel_id, 1)], next_cursor: None });
    assert_eq!(next_fetch(cache.channel(channel_id)), None);

    // Reconnect drops the view; the next fetch starts from the newest page.
    cache.reset_channel(channel_id);
    assert_eq!(next_fetch(cache.channel(channel_id)), Some(0));
}

#[test]
fn next_fetch_after_live_event_still_loads_history() {
    let channel_id = Uuid::new_v4();
    let mut cache = MessageCache::new();
    cache.apply(&ChatEvent::Created(stored(channel_id, 5)));

    assert_eq!(next_fetch(cache.channel(channel_id)), Some(0));
}

#[test]
fn socket_failures_reconnect_and_others_stop() {
    assert!(is_transient(&CliError::WsClosed));
    assert!(is_transient(&CliError::Timeout));
    assert!(is_transient(&CliError::from(tungstenite::Error::ConnectionClosed)));
    assert!(!is_transient(&CliError::MissingSessionToken));
    assert!(!is_transient(&CliError::ServerError { status: "HTTP 400".into(), message: "x".into() }));
}

#[test]
fn backoff_doubles_up_to_the_cap() {
    assert_eq!(next_backoff(RECONNECT_MIN), RECONNECT_MIN * 2);
    assert_eq!(next_backoff(RECONNECT_MAX), RECONNECT_MAX);
    assert_eq!(next_backoff(Duration::from_secs(20)), RECONNECT_MAX);
}

#[test]
fn api_headers_carry_bearer_and_connection_id() {
    let connection_id = Uuid::new_v4();
    let headers = api_headers(&context(Some(connection_id))).expect("headers");

    assert_eq!(headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()), Some("Bearer abc"));
    let expected = connection_id.to_string();
    assert_eq!(
        headers.get(events::CONNECTION_ID_HEADER).and_then(|v| v.to_str().ok()),
        Some(expected.as_str())
    );

    let headers = api_headers(&context(None)).expect("headers");
    assert!(headers.get(events::CONNECTION_ID_HEADER).is_none());
}

#[test]
fn api_headers_require_a_session_token() {
    let ctx = CliContext { session_token: None, ..context(None) };
    assert!(matches!(api_headers(&ctx), Err(CliError::MissingSessionToken)));
}

#[test]
fn watch_parses_page_count() {
    let channel_id = Uuid::new_v4();
    let cli = Cli::try_parse_from(["chat-cli", "watch", &channel_id.to_string(), "--pages", "3"]).expect("parse");

    let Command::Watch { channel_id: parsed, show, pages } = cli.command else {
        panic!("expected watch");
    };
    assert_eq!(parsed, channel_id);
    assert_eq!(show, 10);
    assert_eq!(pages, 3);
}
