//! Matrix client-server API, just the parts the bridge needs.
//!
//! Requests run on a private current-thread runtime and every method blocks
//! until the homeserver answers, so the caller stays single threaded.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::runtime::Runtime;

use crate::error::TransportError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const SYNC_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// A room event as delivered to the transaction handler.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomEvent {
    pub room_id: String,
    pub kind: String,
    pub sender: String,
    pub msgtype: Option<String>,
    /// Only set for `m.text` messages.
    pub body: Option<String>,
}

impl RoomEvent {
    pub fn text(room_id: &str, sender: &str, body: &str) -> RoomEvent {
        RoomEvent {
            room_id: room_id.to_string(),
            kind: "m.room.message".to_string(),
            sender: sender.to_string(),
            msgtype: Some("m.text".to_string()),
            body: Some(body.to_string()),
        }
    }

    fn from_raw(room_id: &str, raw: &RawEvent) -> RoomEvent {
        let msgtype = raw
            .content
            .get("msgtype")
            .and_then(Value::as_str)
            .map(str::to_string);
        let body = match msgtype.as_deref() {
            Some("m.text") => raw
                .content
                .get("body")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        };
        RoomEvent {
            room_id: room_id.to_string(),
            kind: raw.kind.clone(),
            sender: raw.sender.clone(),
            msgtype,
            body,
        }
    }
}

/// Callbacks the poller drives.
pub trait Handler {
    /// Whether an invite for a room with this alias should be accepted.
    fn room_query(&mut self, alias: &str) -> bool;
    /// Whether the syncing account is the one this handler serves.
    fn user_query(&mut self, user_id: &str) -> bool;
    /// Handles one batch of timeline events. `false` stops polling.
    fn transaction(&mut self, events: &[RoomEvent]) -> bool;
}

#[derive(Debug, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    rooms: Rooms,
}

#[derive(Debug, Default, Deserialize)]
struct Rooms {
    #[serde(default)]
    join: BTreeMap<String, JoinedRoom>,
    #[serde(default)]
    invite: BTreeMap<String, InvitedRoom>,
}

#[derive(Debug, Default, Deserialize)]
struct JoinedRoom {
    #[serde(default)]
    timeline: EventList,
}

#[derive(Debug, Default, Deserialize)]
struct InvitedRoom {
    #[serde(default)]
    invite_state: EventList,
}

#[derive(Debug, Default, Deserialize)]
struct EventList {
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    content: Value,
}

impl SyncResponse {
    pub fn timeline(&self) -> Vec<RoomEvent> {
        let mut events = Vec::new();
        for (room_id, room) in &self.rooms.join {
            for raw in &room.timeline.events {
                events.push(RoomEvent::from_raw(room_id, raw));
            }
        }
        events
    }

    /// Invited rooms with their canonical alias, if the invite carried one.
    pub fn invites(&self) -> Vec<(String, Option<String>)> {
        self.rooms
            .invite
            .iter()
            .map(|(room_id, room)| {
                let alias = room
                    .invite_state
                    .events
                    .iter()
                    .find(|e| e.kind == "m.room.canonical_alias")
                    .and_then(|e| e.content.get("alias"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                (room_id.clone(), alias)
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct MatrixClient {
    http: reqwest::Client,
    base: Url,
    token: String,
    runtime: Arc<Runtime>,
    txn_prefix: u64,
    txn_counter: Arc<AtomicU64>,
}

impl MatrixClient {
    pub fn new(hs_address: &str, token: &str) -> Result<MatrixClient, TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let base = Url::parse(hs_address).map_err(|e| TransportError::Url(e.to_string()))?;
        let txn_prefix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Ok(MatrixClient {
            http,
            base,
            token: token.to_string(),
            runtime: Arc::new(runtime),
            txn_prefix,
            txn_counter: Arc::new(AtomicU64::new(0)),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        endpoint(&self.base, segments)
    }

    fn next_txn_id(&self) -> String {
        let n = self.txn_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}.{}", self.txn_prefix, n)
    }

    fn call(&self, request: RequestBuilder) -> Result<Value, TransportError> {
        self.runtime
            .block_on(execute(request.bearer_auth(&self.token)))
    }

    pub fn create_room(&self, local_alias: &str, public: bool) -> Result<String, TransportError> {
        let url = self.endpoint(&["_matrix", "client", "v3", "createRoom"])?;
        let (visibility, preset) = if public {
            ("public", "public_chat")
        } else {
            ("private", "private_chat")
        };
        let body = json!({
            "room_alias_name": local_alias,
            "visibility": visibility,
            "preset": preset,
        });
        let response = self.call(self.http.post(url).json(&body))?;
        string_field(&response, "room_id")
    }

    pub fn get_room_id(&self, alias: &str) -> Result<String, TransportError> {
        let url = self.endpoint(&["_matrix", "client", "v3", "directory", "room", alias])?;
        let response = self.call(self.http.get(url))?;
        string_field(&response, "room_id")
    }

    pub fn media_upload(&self, data: Vec<u8>, mime: &str) -> Result<String, TransportError> {
        let url = self.endpoint(&["_matrix", "media", "v3", "upload"])?;
        let request = self.http.post(url).header(CONTENT_TYPE, mime).body(data);
        let response = self.call(request)?;
        string_field(&response, "content_uri")
    }

    pub fn send_content(
        &self,
        room_id: &str,
        uri: &str,
        file_name: &str,
        msgtype: &str,
    ) -> Result<(), TransportError> {
        self.send_message(
            room_id,
            json!({ "msgtype": msgtype, "body": file_name, "url": uri }),
        )
    }

    pub fn send_notice(&self, room_id: &str, text: &str) -> Result<(), TransportError> {
        self.send_message(room_id, json!({ "msgtype": "m.notice", "body": text }))
    }

    fn send_message(&self, room_id: &str, content: Value) -> Result<(), TransportError> {
        let txn_id = self.next_txn_id();
        let url = self.endpoint(&[
            "_matrix",
            "client",
            "v3",
            "rooms",
            room_id,
            "send",
            "m.room.message",
            &txn_id,
        ])?;
        self.call(self.http.put(url).json(&content))?;
        Ok(())
    }

    pub fn whoami(&self) -> Result<String, TransportError> {
        let url = self.endpoint(&["_matrix", "client", "v3", "account", "whoami"])?;
        let response = self.call(self.http.get(url))?;
        string_field(&response, "user_id")
    }

    pub fn join(&self, room_id: &str) -> Result<(), TransportError> {
        let url = self.endpoint(&["_matrix", "client", "v3", "join", room_id])?;
        self.call(self.http.post(url).json(&json!({})))?;
        Ok(())
    }

    pub fn sync(
        &self,
        since: Option<&str>,
        timeout: Duration,
    ) -> Result<SyncResponse, TransportError> {
        let mut url = self.endpoint(&["_matrix", "client", "v3", "sync"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("timeout", &timeout.as_millis().to_string());
            if let Some(since) = since {
                query.append_pair("since", since);
            }
        }
        let response = self.call(self.http.get(url).timeout(REQUEST_TIMEOUT + timeout))?;
        serde_json::from_value(response).map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

async fn execute(request: RequestBuilder) -> Result<Value, TransportError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<Value>().await?);
    }
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    Err(api_error(status, &body))
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, TransportError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| TransportError::Url(format!("{} cannot be a base url", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn api_error(status: StatusCode, body: &Value) -> TransportError {
    let errcode = body
        .get("errcode")
        .and_then(Value::as_str)
        .unwrap_or("M_UNKNOWN");
    if errcode == "M_ROOM_IN_USE" {
        return TransportError::AliasTaken;
    }
    let message = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or_default();
    TransportError::Api {
        status: status.as_u16(),
        errcode: errcode.to_string(),
        message: message.to_string(),
    }
}

fn string_field(value: &Value, field: &str) -> Result<String, TransportError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| TransportError::Malformed(format!("response has no {}", field)))
}

/// What one sync asks of the poller.
#[derive(Debug)]
struct Dispatch {
    joins: Vec<String>,
    keep_going: bool,
}

/// Runs the handler over one sync response. The first sync after startup
/// only settles the position in the stream; its timeline is history.
fn dispatch(sync: &SyncResponse, initial: bool, handler: &mut impl Handler) -> Dispatch {
    let mut joins = Vec::new();
    for (room_id, alias) in sync.invites() {
        match alias {
            Some(alias) if handler.room_query(&alias) => joins.push(room_id),
            _ => debug!("Ignoring invite to {}", room_id),
        }
    }

    if initial {
        return Dispatch {
            joins,
            keep_going: true,
        };
    }

    let events = sync.timeline();
    let keep_going = events.is_empty() || handler.transaction(&events);
    Dispatch { joins, keep_going }
}

fn authorize(user_id: &str, handler: &mut impl Handler) -> Result<()> {
    if !handler.user_query(user_id) {
        bail!("Access token belongs to {}, not the bot account", user_id);
    }
    Ok(())
}

/// Long-polls `/sync` and feeds the handler one batch at a time.
pub struct Poller {
    client: MatrixClient,
    since: Option<String>,
    stop: Arc<AtomicBool>,
}

impl Poller {
    pub fn new(client: MatrixClient) -> Poller {
        Poller {
            client,
            since: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Once set, `run` returns after the sync in flight.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn run(&mut self, handler: &mut impl Handler) -> Result<()> {
        let user_id = self
            .client
            .whoami()
            .context("Failed to look up the syncing account")?;
        authorize(&user_id, handler)?;
        info!("Polling as {}", user_id);

        while !self.stopped() {
            match self.poll_once(handler) {
                Ok(true) => {}
                Ok(false) => {
                    info!("Handler stopped polling");
                    return Ok(());
                }
                Err(e) => {
                    warn!("Sync failed: {}", e);
                    if !self.stopped() {
                        std::thread::sleep(RETRY_DELAY);
                    }
                }
            }
        }
        info!("Stop requested, no longer polling");
        Ok(())
    }

    fn poll_once(&mut self, handler: &mut impl Handler) -> Result<bool, TransportError> {
        let initial = self.since.is_none();
        let timeout = if initial { Duration::ZERO } else { SYNC_TIMEOUT };
        let sync = self.client.sync(self.since.as_deref(), timeout)?;
        self.since = Some(sync.next_batch.clone());

        let dispatch = dispatch(&sync, initial, handler);
        for room_id in dispatch.joins {
            match self.client.join(&room_id) {
                Ok(()) => info!("Joined {}", room_id),
                Err(e) => warn!("Failed to join {}: {}", room_id, e),
            }
        }
        Ok(dispatch.keep_going)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    const SYNC: &str = r##"{
        "next_batch": "s72595_4483_1934",
        "rooms": {
            "join": {
                "!game:example.org": {
                    "timeline": {
                        "events": [
                            {
                                "type": "m.room.message",
                                "sender": "@ash:example.org",
                                "content": { "msgtype": "m.text", "body": "Up" }
                            },
                            {
                                "type": "m.room.message",
                                "sender": "@mpp_bot:example.org",
                                "content": { "msgtype": "m.image", "body": "1500000000.jpg", "url": "mxc://example.org/abc" }
                            },
                            {
                                "type": "m.room.member",
                                "sender": "@misty:example.org",
                                "content": { "membership": "join" }
                            }
                        ]
                    }
                }
            },
            "invite": {
                "!other:example.org": {
                    "invite_state": {
                        "events": [
                            { "type": "m.room.canonical_alias", "content": { "alias": "#other:example.org" } }
                        ]
                    }
                },
                "!mpp:example.org": {
                    "invite_state": {
                        "events": [
                            { "type": "m.room.name", "content": { "name": "MPP" } },
                            { "type": "m.room.canonical_alias", "content": { "alias": "#mpp:example.org" } }
                        ]
                    }
                },
                "!bare:example.org": {}
            }
        }
    }"##;

    fn sync() -> SyncResponse {
        serde_json::from_str(SYNC).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        aliases: Vec<String>,
        batches: Vec<Vec<RoomEvent>>,
        stop: bool,
    }

    impl Handler for Recorder {
        fn room_query(&mut self, alias: &str) -> bool {
            self.aliases.push(alias.to_string());
            alias == "#mpp:example.org"
        }

        fn user_query(&mut self, user_id: &str) -> bool {
            user_id == "@mpp_bot:example.org"
        }

        fn transaction(&mut self, events: &[RoomEvent]) -> bool {
            self.batches.push(events.to_vec());
            !self.stop
        }
    }

    #[test]
    fn timeline_keeps_body_only_for_text() {
        let events = sync().timeline();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], RoomEvent::text("!game:example.org", "@ash:example.org", "Up"));
        assert_eq!(events[1].msgtype.as_deref(), Some("m.image"));
        assert_eq!(events[1].body, None);
        assert_eq!(events[2].kind, "m.room.member");
        assert_eq!(events[2].msgtype, None);
    }

    #[test]
    fn invites_carry_canonical_alias() {
        let invites = sync().invites();

        assert_eq!(
            invites,
            vec![
                ("!bare:example.org".to_string(), None),
                ("!mpp:example.org".to_string(), Some("#mpp:example.org".to_string())),
                ("!other:example.org".to_string(), Some("#other:example.org".to_string())),
            ]
        );
    }

    #[test]
    fn initial_sync_skips_backlog() {
        let mut handler = Recorder::default();

        let dispatch = dispatch(&sync(), true, &mut handler);

        assert!(dispatch.keep_going);
        assert!(handler.batches.is_empty());
    }

    #[test]
    fn dispatch_joins_only_accepted_aliases() {
        let mut handler = Recorder::default();

        let dispatch = dispatch(&sync(), false, &mut handler);

        assert_eq!(dispatch.joins, vec!["!mpp:example.org".to_string()]);
        assert_eq!(handler.aliases.len(), 2);
        assert_eq!(handler.batches.len(), 1);
        assert_eq!(handler.batches[0].len(), 3);
    }

    #[test]
    fn handler_can_stop_polling() {
        let mut handler = Recorder {
            stop: true,
            ..Recorder::default()
        };

        assert!(!dispatch(&sync(), false, &mut handler).keep_going);
    }

    #[test]
    fn empty_sync_does_not_call_handler() {
        let empty: SyncResponse = serde_json::from_str(r#"{"next_batch": "s1"}"#).unwrap();
        let mut handler = Recorder {
            stop: true,
            ..Recorder::default()
        };

        assert!(dispatch(&empty, false, &mut handler).keep_going);
        assert!(handler.batches.is_empty());
    }

    #[test]
    fn room_in_use_is_alias_taken() {
        let body = json!({ "errcode": "M_ROOM_IN_USE", "error": "Room alias already taken" });
        assert!(matches!(
            api_error(StatusCode::BAD_REQUEST, &body),
            TransportError::AliasTaken
        ));
    }

    #[test]
    fn other_errors_keep_code_and_message() {
        let body = json!({ "errcode": "M_FORBIDDEN", "error": "nope" });
        match api_error(StatusCode::FORBIDDEN, &body) {
            TransportError::Api {
                status,
                errcode,
                message,
            } => {
                assert_eq!(status, 403);
                assert_eq!(errcode, "M_FORBIDDEN");
                assert_eq!(message, "nope");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(matches!(
            api_error(StatusCode::BAD_GATEWAY, &Value::Null),
            TransportError::Api { status: 502, .. }
        ));
    }

    #[test]
    fn endpoint_escapes_aliases() {
        let base = Url::parse("https://matrix.example.org").unwrap();

        let url = endpoint(
            &base,
            &["_matrix", "client", "v3", "directory", "room", "#mpp:example.org"],
        )
        .unwrap();

        assert_eq!(
            url.as_str(),
            "https://matrix.example.org/_matrix/client/v3/directory/room/%23mpp:example.org"
        );
    }

    #[test]
    fn string_field_reports_missing_field() {
        assert_eq!(string_field(&json!({"room_id": "!a:b"}), "room_id").unwrap(), "!a:b");
        assert!(matches!(
            string_field(&json!({}), "room_id"),
            Err(TransportError::Malformed(_))
        ));
    }

    /// Answers exactly one request with `body` and returns the base url.
    fn serve_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )
            .unwrap();
        });
        address
    }

    #[test]
    fn authorize_rejects_other_account() {
        let mut recorder = Recorder::default();

        assert!(authorize("@mpp_bot:example.org", &mut recorder).is_ok());
        let err = authorize("@intruder:example.org", &mut recorder).unwrap_err();
        assert!(err.to_string().contains("@intruder:example.org"));
    }

    #[test]
    fn run_refuses_token_of_other_account() {
        let address = serve_once(r#"{"user_id": "@intruder:example.org"}"#);
        let client = MatrixClient::new(&address, "secret").unwrap();
        let mut recorder = Recorder::default();

        let err = Poller::new(client).run(&mut recorder).unwrap_err();

        assert!(err.to_string().contains("not the bot account"));
        assert!(recorder.batches.is_empty());
    }

    #[test]
    fn run_returns_once_stop_is_requested() {
        let address = serve_once(r#"{"user_id": "@mpp_bot:example.org"}"#);
        let client = MatrixClient::new(&address, "secret").unwrap();
        let mut poller = Poller::new(client);
        poller.stop_flag().store(true, Ordering::SeqCst);
        let mut recorder = Recorder::default();

        poller.run(&mut recorder).unwrap();

        assert!(poller.since.is_none());
        assert!(recorder.batches.is_empty());
    }
}
