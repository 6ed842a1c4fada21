use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use client::state::connection::ConnectionState;
use client::state::messages::{ChannelMessages, MessageCache};
use events::{ChatEvent, MessagePage, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use uuid::Uuid;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_TIMEOUT: Duration = Duration::from_secs(3600);
const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type StdinLines = tokio::io::Lines<BufReader<tokio::io::Stdin>>;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing session token; pass --session-token or set CHAT_SESSION_TOKEN")]
    MissingSessionToken,
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error("websocket failed: {0}")]
    Ws(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket closed")]
    WsClosed,
    #[error("event decode failed: {0}")]
    Decode(#[from] events::CodecError),
    #[error("timed out waiting for websocket event")]
    Timeout,
    #[error("server returned {status}: {message}")]
    ServerError { status: String, message: String },
    #[error("missing expected field `{0}`")]
    MissingField(&'static str),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for CliError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Ws(Box::new(error))
    }
}

#[derive(Parser, Debug)]
#[command(name = "chat-cli", about = "Chat relay API and websocket CLI")]
struct Cli {
    #[arg(long, env = "CHAT_BASE_URL", default_value = "http://127.0.0.1:1999")]
    base_url: String,

    #[arg(long, env = "CHAT_SESSION_TOKEN")]
    session_token: Option<String>,

    /// Realtime connection to exclude from the relay of this command.
    #[arg(long, env = "CHAT_CONNECTION_ID")]
    connection_id: Option<Uuid>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone)]
struct CliContext {
    base_url: String,
    session_token: Option<String>,
    connection_id: Option<Uuid>,
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping,
    /// Mint a session token (server must run with `DEV_TOKEN_ISSUER=true`).
    Token(TokenArgs),
    /// Print one page of channel history.
    History {
        channel_id: Uuid,
        #[arg(long)]
        cursor: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },
    Send(SendArgs),
    Edit(EditArgs),
    Delete(DeleteArgs),
    /// Subscribe to a channel and print the reconciled view on every event.
    /// Reconnects on socket loss. Type `more` for older history, `quit` to
    /// exit.
    Watch {
        channel_id: Uuid,
        #[arg(long, default_value_t = 10)]
        show: usize,
        /// History pages to load after each (re)connect.
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
}

#[derive(Args, Debug)]
struct TokenArgs {
    #[arg(long)]
    sub: Uuid,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    picture: Option<String>,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[arg(long)]
    member_id: Uuid,
    #[arg(long)]
    channel_id: Uuid,
    #[arg(long)]
    file_url: Option<String>,
    content: String,
}

#[derive(Args, Debug)]
struct EditArgs {
    message_id: Uuid,
    #[arg(long)]
    member_id: Uuid,
    #[arg(long)]
    channel_id: Uuid,
    /// Omit to clear the attachment.
    #[arg(long)]
    file_url: Option<String>,
    content: String,
}

#[derive(Args, Debug)]
struct DeleteArgs {
    message_id: Uuid,
    #[arg(long)]
    member_id: Uuid,
    #[arg(long)]
    channel_id: Uuid,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let ctx = CliContext { base_url: cli.base_url, session_token: cli.session_token, connection_id: cli.connection_id };

    match cli.command {
        Command::Ping => run_ping(&ctx).await,
        Command::Token(args) => run_token(&ctx, args).await,
        Command::History { channel_id, cursor, limit } => {
            let page = fetch_page(&ctx, channel_id, cursor, limit).await?;
            print_json(&serde_json::to_value(&page)?)
        }
        Command::Send(args) => {
            let body = serde_json::json!({
                "memberId": args.member_id,
                "channelId": args.channel_id,
                "content": args.content,
                "fileUrl": args.file_url,
            });
            let json = api_request(&ctx, reqwest::Method::POST, "/messages", Some(body)).await?;
            print_json(&json)
        }
        Command::Edit(args) => {
            let body = serde_json::json!({
                "memberId": args.member_id,
                "channelId": args.channel_id,
                "content": args.content,
                "fileUrl": args.file_url,
            });
            let path = format!("/messages/{}", args.message_id);
            let json = api_request(&ctx, reqwest::Method::PATCH, &path, Some(body)).await?;
            print_json(&json)
        }
        Command::Delete(args) => {
            let body = serde_json::json!({ "memberId": args.member_id, "channelId": args.channel_id });
            let path = format!("/messages/{}", args.message_id);
            let json = api_request(&ctx, reqwest::Method::DELETE, &path, Some(body)).await?;
            print_json(&json)
        }
        Command::Watch { channel_id, show, pages } => run_watch(&ctx, channel_id, show, pages).await,
    }
}

async fn run_ping(cli: &CliContext) -> Result<(), CliError> {
    let client = reqwest::Client::new();
    let url = format!("{}/healthz", cli.base_url.trim_end_matches('/'));
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::ServerError {
            status: format!("HTTP {}", status.as_u16()),
            message: "health check failed".to_owned(),
        });
    }
    println!("ok");
    Ok(())
}

async fn run_token(cli: &CliContext, args: TokenArgs) -> Result<(), CliError> {
    let url = format!("{}/api/dev/token", cli.base_url.trim_end_matches('/'));
    let body = serde_json::json!({
        "sub": args.sub,
        "name": args.name,
        "email": args.email,
        "picture": args.picture,
    });
    let response = reqwest::Client::new().post(url).json(&body).send().await?;
    let value = read_json(response).await?;
    let token = value
        .get("sessionToken")
        .and_then(Value::as_str)
        .ok_or(CliError::MissingField("sessionToken"))?;
    println!("{token}");
    Ok(())
}

// =============================================================================
// WATCH
// =============================================================================

/// One `watch` run: connection bookkeeping plus the reconciled channel view.
/// Both outlive individual sockets.
struct Watch<'a> {
    cli: &'a CliContext,
    channel_id: Uuid,
    show: usize,
    connection: ConnectionState,
    cache: MessageCache,
}

async fn run_watch(cli: &CliContext, channel_id: Uuid, show: usize, pages: usize) -> Result<(), CliError> {
    let session_token = cli
        .session_token
        .as_deref()
        .ok_or(CliError::MissingSessionToken)?;

    let mut watch = Watch { cli, channel_id, show, connection: ConnectionState::new(), cache: MessageCache::new() };
    // Remembered once; every `connected` re-subscribes it.
    watch.connection.want(channel_id);

    let mut commands = Some(BufReader::new(tokio::io::stdin()).lines());
    let mut backoff = RECONNECT_MIN;

    loop {
        let error = match watch
            .session(session_token, pages, &mut commands, &mut backoff)
            .await
        {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if !is_transient(&error) {
            return Err(error);
        }

        // No resumption: events sent while offline are gone, so the view is
        // rebuilt from a fresh first page after the next handshake.
        watch.connection.disconnected();
        watch.cache.reset_channel(channel_id);
        eprintln!("disconnected: {error}; reconnecting in {}s", backoff.as_secs());
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}

impl Watch<'_> {
    /// Run one socket until it fails or the user quits (`Ok`).
    async fn session(
        &mut self,
        session_token: &str,
        pages: usize,
        commands: &mut Option<StdinLines>,
        backoff: &mut Duration,
    ) -> Result<(), CliError> {
        let mut request = ws_url(&self.cli.base_url)?.into_client_request()?;
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {session_token}"))?);

        self.connection.connecting();
        let (mut stream, _) = connect_async(request).await?;

        let connection_id = loop {
            if let ServerEvent::Connected { connection_id, .. } = recv_next(&mut stream, HANDSHAKE_TIMEOUT).await? {
                break connection_id;
            }
        };
        for event in self.connection.connected(connection_id) {
            stream.send(Message::Text(events::encode_client_event(&event)?.into())).await?;
        }
        *backoff = RECONNECT_MIN;
        eprintln!("connected: connection_id={connection_id}");

        // Subscribe is on the wire before the first fetch, so no mutation
        // falls between the two.
        for _ in 0..pages.max(1) {
            if !self.load_older().await? {
                break;
            }
        }
        self.print();

        loop {
            tokio::select! {
                event = recv_next(&mut stream, IDLE_TIMEOUT) => self.handle_event(event?),
                line = next_command(commands) => match line.as_deref().map(str::trim) {
                    Some("more") => {
                        if self.load_older().await? {
                            self.print();
                        } else {
                            eprintln!("history exhausted");
                        }
                    }
                    Some("quit") => return Ok(()),
                    Some("") | None => {}
                    Some(other) => eprintln!("unknown command {other:?}; try `more` or `quit`"),
                },
            }
        }
    }

    fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Subscribed { channel_id } => {
                self.connection.subscribed(channel_id);
                eprintln!("subscribed: channel_id={channel_id}");
            }
            ServerEvent::Error { code, message, retryable } => {
                let hint = if retryable { " (retryable)" } else { "" };
                eprintln!("server error: {code} {message}{hint}");
            }
            other => {
                if let Some(chat) = other.into_chat() {
                    println!("{}", describe(&chat));
                    self.cache.apply(&chat);
                    self.print();
                }
            }
        }
    }

    /// Append the next older page. `false` once history is exhausted.
    async fn load_older(&mut self) -> Result<bool, CliError> {
        let Some(cursor) = next_fetch(self.cache.channel(self.channel_id)) else {
            return Ok(false);
        };
        let page = fetch_page(self.cli, self.channel_id, Some(cursor), None).await?;
        self.cache.append_page(self.channel_id, page);
        Ok(true)
    }

    fn print(&self) {
        let status = if self.connection.is_live(self.channel_id) { "live" } else { "awaiting subscribe" };
        println!("-- channel {} ({status})", self.channel_id);
        print_view(self.cache.channel(self.channel_id), self.show);
    }
}

/// Cursor of the next history fetch, `None` when there is nothing older.
fn next_fetch(view: Option<&ChannelMessages>) -> Option<u32> {
    match view {
        None => Some(0),
        Some(view) if view.has_more() => view.next_cursor(),
        Some(_) => None,
    }
}

/// Socket-level failures reconnect; a refused handshake or API error stops.
fn is_transient(error: &CliError) -> bool {
    match error {
        CliError::WsClosed | CliError::Timeout => true,
        CliError::Ws(e) => !matches!(**e, tungstenite::Error::Http(_)),
        CliError::Http(e) => e.is_connect() || e.is_timeout(),
        _ => false,
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(RECONNECT_MAX)
}

/// Next stdin line. After EOF or a read error stdin is dropped and this
/// never resolves again.
async fn next_command(commands: &mut Option<StdinLines>) -> Option<String> {
    let Some(lines) = commands.as_mut() else {
        return std::future::pending().await;
    };
    match lines.next_line().await {
        Ok(Some(line)) => Some(line),
        Ok(None) | Err(_) => {
            *commands = None;
            None
        }
    }
}

fn describe(event: &ChatEvent) -> String {
    match event {
        ChatEvent::Created(message) => format!("{} {} {}", event.name(), message.id, message.content),
        ChatEvent::Updated(message) => format!("{} {} {}", event.name(), message.id, message.content),
        ChatEvent::Deleted { id, .. } => format!("{} {id}", event.name()),
    }
}

fn print_view(view: Option<&ChannelMessages>, show: usize) {
    let Some(view) = view else {
        println!("  (empty)");
        return;
    };
    for message in view.messages().take(show) {
        let edited = if message.edited_at.is_some() { " (edited)" } else { "" };
        println!("  [{}] {}{edited}", message.created_at, message.content);
    }
    if view.len() > show {
        println!("  ... {} more loaded", view.len() - show);
    }
    if view.has_more() {
        println!("  (type `more` for older messages)");
    }
}

// =============================================================================
// HTTP
// =============================================================================

async fn fetch_page(
    cli: &CliContext,
    channel_id: Uuid,
    cursor: Option<u32>,
    limit: Option<u32>,
) -> Result<MessagePage, CliError> {
    let mut query = Vec::new();
    if let Some(cursor) = cursor {
        query.push(format!("cursor={cursor}"));
    }
    if let Some(limit) = limit {
        query.push(format!("limit={limit}"));
    }
    let mut path = format!("/channels/{channel_id}/messages");
    if !query.is_empty() {
        path = format!("{path}?{}", query.join("&"));
    }

    let json = api_request(cli, reqwest::Method::GET, &path, None).await?;
    Ok(serde_json::from_value(json)?)
}

async fn api_request(
    cli: &CliContext,
    method: reqwest::Method,
    path: &str,
    body: Option<Value>,
) -> Result<Value, CliError> {
    let client = reqwest::Client::builder()
        .default_headers(api_headers(cli)?)
        .build()?;
    let url = format!("{}{}", cli.base_url.trim_end_matches('/'), path);

    let request = client.request(method, &url);
    let request = if let Some(json) = body { request.json(&json) } else { request };

    read_json(request.send().await?).await
}

/// Bearer auth plus the optional originating connection.
fn api_headers(cli: &CliContext) -> Result<HeaderMap, CliError> {
    let session_token = cli
        .session_token
        .as_deref()
        .ok_or(CliError::MissingSessionToken)?;

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {session_token}"))?);
    if let Some(connection_id) = cli.connection_id {
        headers.insert(events::CONNECTION_ID_HEADER, HeaderValue::from_str(&connection_id.to_string())?);
    }
    Ok(headers)
}

async fn read_json(response: reqwest::Response) -> Result<Value, CliError> {
    let status = response.status();
    let value = response
        .json::<Value>()
        .await
        .unwrap_or_else(|_| Value::Null);

    if !status.is_success() {
        return Err(CliError::ServerError { status: format!("HTTP {}", status.as_u16()), message: value.to_string() });
    }

    Ok(value)
}

// =============================================================================
// WEBSOCKET
// =============================================================================

fn ws_url(base_url: &str) -> Result<String, CliError> {
    let base_url = base_url.trim_end_matches('/');
    if let Some(rest) = base_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/api/ws"));
    }
    if let Some(rest) = base_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/api/ws"));
    }

    Err(CliError::InvalidBaseUrl(base_url.to_owned()))
}

async fn recv_next(stream: &mut WsStream, timeout: Duration) -> Result<ServerEvent, CliError> {
    let fut = async {
        loop {
            let Some(message) = stream.next().await else {
                return Err(CliError::WsClosed);
            };
            match message? {
                Message::Text(text) => {
                    return events::decode_server_event(text.as_str()).map_err(CliError::from);
                }
                Message::Close(_) => return Err(CliError::WsClosed),
                _ => {}
            }
        }
    };

    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| CliError::Timeout)?
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
