use super::*;
use crate::services::memory_store::MemoryStore;
use crate::services::store::{Member, MessageStore, Role};
use crate::services::token::Identity;
use crate::state::test_helpers;
use axum::extract::FromRequest;
use axum::http::HeaderValue;
use events::ServerEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

struct Fixture {
    state: AppState,
    store: Arc<MemoryStore>,
    channel_id: Uuid,
    user_id: Uuid,
    member: Member,
}

impl Fixture {
    fn new() -> Self {
        let (state, store) = test_helpers::test_app_state();
        let guild_id = Uuid::new_v4();
        let channel_id = store.seed_channel(guild_id).id;
        let user_id = Uuid::new_v4();
        let member = store.seed_member(user_id, guild_id, Role::Member);
        Self { state, store, channel_id, user_id, member }
    }

    fn auth(&self) -> AuthUser {
        AuthUser { identity: Identity { id: self.user_id, name: None, email: None, avatar: None } }
    }

    fn create_body(&self, content: &str) -> Result<Json<CreateMessageBody>, JsonRejection> {
        Ok(Json(CreateMessageBody {
            member_id: self.member.id,
            content: content.to_owned(),
            channel_id: self.channel_id,
            file_url: None,
        }))
    }

    async fn listen(&self) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(16);
        self.state
            .broadcaster
            .subscribe(self.channel_id, Uuid::new_v4(), tx)
            .await;
        rx
    }
}

async fn body_json(resp: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn recv_event(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("relay receive timed out")
        .expect("relay channel closed")
}

async fn assert_no_event(rx: &mut mpsc::Receiver<ServerEvent>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected no relayed event"
    );
}

// =============================================================================
// message_error_response
// =============================================================================

#[tokio::test]
async fn message_error_response_maps_each_outcome() {
    let cases = [
        (MessageError::NotMember, StatusCode::BAD_REQUEST, "not member of channel"),
        (MessageError::NotFound(Uuid::nil()), StatusCode::NOT_FOUND, "message not found"),
        (
            MessageError::Forbidden { member_id: Uuid::nil(), message_id: Uuid::nil() },
            StatusCode::FORBIDDEN,
            "forbidden",
        ),
        (
            MessageError::Store(crate::services::store::StoreError::CorruptRow("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal server error",
        ),
    ];
    for (err, status, text) in cases {
        let resp = message_error_response(&err);
        assert_eq!(resp.status(), status);
        assert_eq!(body_json(resp).await["error"], text);
    }

    let resp = message_error_response(&MessageError::Invalid(events::ContentError::Empty));
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// POST /messages
// =============================================================================

#[tokio::test]
async fn create_persists_and_relays_one_event() {
    let fx = Fixture::new();
    let mut rx = fx.listen().await;

    let resp = create_message(State(fx.state.clone()), fx.auth(), HeaderMap::new(), fx.create_body("hello")).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["message"], "message sent");
    assert_eq!(fx.store.message_count(), 1);

    let ServerEvent::MessageCreated(relayed) = recv_event(&mut rx).await else {
        panic!("expected new-message");
    };
    assert_eq!(relayed.content, "hello");
    assert_eq!(fx.store.message(relayed.id), Some(relayed));
    assert_no_event(&mut rx).await;
}

#[tokio::test]
async fn create_skips_the_originating_connection() {
    let fx = Fixture::new();
    let origin = Uuid::new_v4();
    let (origin_tx, mut origin_rx) = mpsc::channel(4);
    fx.state
        .broadcaster
        .subscribe(fx.channel_id, origin, origin_tx)
        .await;
    let mut peer_rx = fx.listen().await;

    let mut headers = HeaderMap::new();
    headers.insert(
        events::CONNECTION_ID_HEADER,
        HeaderValue::from_str(&origin.to_string()).expect("header"),
    );
    let resp = create_message(State(fx.state.clone()), fx.auth(), headers, fx.create_body("hi")).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(recv_event(&mut peer_rx).await.name(), "new-message");
    assert_no_event(&mut origin_rx).await;
}

#[tokio::test]
async fn create_over_limit_is_rejected_without_write_or_relay() {
    let fx = Fixture::new();
    let mut rx = fx.listen().await;
    let content = "x".repeat(events::MAX_CONTENT_CHARS + 1);

    let resp = create_message(State(fx.state.clone()), fx.auth(), HeaderMap::new(), fx.create_body(&content)).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(fx.store.message_count(), 0);
    assert_no_event(&mut rx).await;
}

#[tokio::test]
async fn create_by_non_member_is_400() {
    let fx = Fixture::new();
    let stranger = AuthUser { identity: Identity { id: Uuid::new_v4(), name: None, email: None, avatar: None } };

    let resp = create_message(State(fx.state.clone()), stranger, HeaderMap::new(), fx.create_body("hi")).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"], "not member of channel");
}

#[tokio::test]
async fn create_store_failure_is_500_and_not_relayed() {
    let fx = Fixture::new();
    let mut rx = fx.listen().await;
    fx.store.set_unavailable(true);

    let resp = create_message(State(fx.state.clone()), fx.auth(), HeaderMap::new(), fx.create_body("hi")).await;

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_no_event(&mut rx).await;
}

// =============================================================================
// PATCH / DELETE /messages/{id}
// =============================================================================

#[tokio::test]
async fn update_relays_full_record_with_cleared_attachment() {
    let fx = Fixture::new();
    let mut original = fx.store.seed_message(fx.channel_id, fx.member.id, "before", 1);
    original.file_url = Some("https://example.com/a.png".into());
    fx.store.insert_message(&original).await.expect("attach file");
    assert!(fx.store.message(original.id).and_then(|m| m.file_url).is_some());
    let mut rx = fx.listen().await;

    let body = UpdateMessageBody {
        member_id: fx.member.id,
        content: "after".into(),
        channel_id: fx.channel_id,
        file_url: None,
    };
    let resp = update_message(
        State(fx.state.clone()),
        fx.auth(),
        HeaderMap::new(),
        Ok(Path(original.id)),
        Ok(Json(body)),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["message"], "message updated");
    let ServerEvent::MessageUpdated(relayed) = recv_event(&mut rx).await else {
        panic!("expected message-update");
    };
    assert_eq!(relayed.id, original.id);
    assert_eq!(relayed.content, "after");
    assert_eq!(relayed.file_url, None);
    assert!(relayed.edited_at.is_some());
}

#[tokio::test]
async fn update_of_someone_elses_message_is_403_and_unchanged() {
    let fx = Fixture::new();
    let other = fx.store.seed_member(Uuid::new_v4(), Uuid::new_v4(), Role::Member);
    let original = fx.store.seed_message(fx.channel_id, other.id, "theirs", 1);
    let mut rx = fx.listen().await;

    let body = UpdateMessageBody {
        member_id: fx.member.id,
        content: "mine now".into(),
        channel_id: fx.channel_id,
        file_url: None,
    };
    let resp = update_message(
        State(fx.state.clone()),
        fx.auth(),
        HeaderMap::new(),
        Ok(Path(original.id)),
        Ok(Json(body)),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(fx.store.message(original.id), Some(original));
    assert_no_event(&mut rx).await;
}

async fn patch_body(value: serde_json::Value) -> Result<Json<UpdateMessageBody>, JsonRejection> {
    let request = axum::http::Request::builder()
        .method("PATCH")
        .uri("/messages/x")
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(value.to_string()))
        .expect("request");
    Json::<UpdateMessageBody>::from_request(request, &()).await
}

#[tokio::test]
async fn update_body_requires_file_url_but_accepts_null() {
    let member_id = Uuid::new_v4();
    let channel_id = Uuid::new_v4();

    let missing = patch_body(serde_json::json!({
        "memberId": member_id, "channelId": channel_id, "content": "edited",
    }))
    .await;
    assert!(missing.is_err());

    let Ok(Json(null)) = patch_body(serde_json::json!({
        "memberId": member_id, "channelId": channel_id, "content": "edited", "fileUrl": null,
    }))
    .await
    else {
        panic!("null fileUrl should parse");
    };
    assert_eq!(null.file_url, None);

    let Ok(Json(set)) = patch_body(serde_json::json!({
        "memberId": member_id, "channelId": channel_id, "content": "edited", "fileUrl": "https://example.com/b.png",
    }))
    .await
    else {
        panic!("string fileUrl should parse");
    };
    assert_eq!(set.file_url.as_deref(), Some("https://example.com/b.png"));
}

#[tokio::test]
async fn update_without_file_url_is_400_and_keeps_attachment() {
    let fx = Fixture::new();
    let mut original = fx.store.seed_message(fx.channel_id, fx.member.id, "before", 1);
    original.file_url = Some("https://example.com/a.png".into());
    fx.store.insert_message(&original).await.expect("attach file");
    let mut rx = fx.listen().await;

    let body = patch_body(serde_json::json!({
        "memberId": fx.member.id, "channelId": fx.channel_id, "content": "after",
    }))
    .await;
    let resp = update_message(State(fx.state.clone()), fx.auth(), HeaderMap::new(), Ok(Path(original.id)), body).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"], "invalid message body");
    assert_eq!(fx.store.message(original.id), Some(original));
    assert_no_event(&mut rx).await;
}

#[tokio::test]
async fn delete_relays_id_and_channel() {
    let fx = Fixture::new();
    let original = fx.store.seed_message(fx.channel_id, fx.member.id, "bye", 1);
    let mut rx = fx.listen().await;

    let body = DeleteMessageBody { member_id: fx.member.id, channel_id: fx.channel_id };
    let resp = delete_message(
        State(fx.state.clone()),
        fx.auth(),
        HeaderMap::new(),
        Ok(Path(original.id)),
        Ok(Json(body)),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["message"], "message deleted");
    assert_eq!(
        recv_event(&mut rx).await,
        ServerEvent::MessageDeleted { id: original.id, channel_id: fx.channel_id }
    );
    assert!(fx.store.message(original.id).is_none());
}

#[tokio::test]
async fn delete_of_unknown_message_is_404() {
    let fx = Fixture::new();
    let body = DeleteMessageBody { member_id: fx.member.id, channel_id: fx.channel_id };
    let resp = delete_message(
        State(fx.state.clone()),
        fx.auth(),
        HeaderMap::new(),
        Ok(Path(Uuid::new_v4())),
        Ok(Json(body)),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// GET /channels/{channel_id}/messages
// =============================================================================

#[tokio::test]
async fn list_returns_camel_case_page() {
    let fx = Fixture::new();
    for ts in 1..=3 {
        fx.store.seed_message(fx.channel_id, fx.member.id, "m", ts);
    }

    let resp = list_messages(
        State(fx.state.clone()),
        fx.auth(),
        Ok(Path(fx.channel_id)),
        Ok(Query(HistoryQuery { cursor: None, limit: Some(2) })),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["items"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["items"][0]["createdAt"], 3);
    assert_eq!(body["nextCursor"], 2);
}

#[tokio::test]
async fn list_for_non_member_is_400() {
    let fx = Fixture::new();
    let stranger = AuthUser { identity: Identity { id: Uuid::new_v4(), name: None, email: None, avatar: None } };

    let resp = list_messages(
        State(fx.state.clone()),
        stranger,
        Ok(Path(fx.channel_id)),
        Ok(Query(HistoryQuery::default())),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
