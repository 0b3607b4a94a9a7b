//! Chat orchestration: grounded streaming chat over WebSocket.
//!
//! One logical session per connection. A user message triggers retrieval,
//! prompt composition, and a streaming model call; content deltas flow to
//! the client as `{"chunk": ...}` frames while a watchdog task detects
//! completion by sampling the response buffer. Cancellation is cooperative:
//! a stop control frame sets a flag that suppresses further chunk frames
//! without aborting the upstream stream.
//!
//! Session state lives in a process-local map — a chat stream is sticky to
//! the server instance that accepted it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pagoda_cache::SessionSubject;
use pagoda_core::defaults::{
    CHAT_SNIPPET_CHARS, CHAT_TOP_K, STOP_FLAG_CLEAR_SECS, WATCHDOG_EXTRA_WINDOWS,
    WATCHDOG_INITIAL_DELAY_SECS, WATCHDOG_SAMPLE_DELAY_SECS, WATCHDOG_WINDOW_SECS,
};
use pagoda_core::SearchResult;

use crate::state::AppState;

/// Per-session streaming state.
#[derive(Clone)]
pub struct SessionState {
    pub buffer: Arc<Mutex<String>>,
    pub cancel: Arc<AtomicBool>,
    /// Set when the model stream terminated cleanly; lets the watchdog
    /// complete on its first stable sample instead of burning windows.
    pub finished: Arc<AtomicBool>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(String::new())),
            cancel: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    fn buffer_len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    fn snapshot(&self) -> String {
        self.buffer.lock().unwrap().clone()
    }
}

/// Process-local registry of live chat sessions.
#[derive(Clone, Default)]
pub struct ChatSessions {
    inner: Arc<Mutex<HashMap<String, SessionState>>>,
}

impl ChatSessions {
    pub fn new() -> Self {
        Self::default()
    }

    fn create(&self, session_id: &str) -> SessionState {
        let state = SessionState::new();
        self.inner
            .lock()
            .unwrap()
            .insert(session_id.to_string(), state.clone());
        state
    }

    fn get(&self, session_id: &str) -> Option<SessionState> {
        self.inner.lock().unwrap().get(session_id).cloned()
    }

    fn remove(&self, session_id: &str) {
        self.inner.lock().unwrap().remove(session_id);
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

/// Render retrieval hits into the reference block: one line per hit,
/// `[i] (filename) <text truncated to 300 chars>`.
pub fn build_context(results: &[SearchResult]) -> String {
    let mut context = String::new();
    for (i, result) in results.iter().take(CHAT_TOP_K).enumerate() {
        let snippet: String = if result.text_content.chars().count() > CHAT_SNIPPET_CHARS {
            let truncated: String = result.text_content.chars().take(CHAT_SNIPPET_CHARS).collect();
            format!("{truncated}…")
        } else {
            result.text_content.clone()
        };
        let file_label = result.file_name.as_deref().unwrap_or("unknown");
        context.push_str(&format!("[{}] ({}) {}\n", i + 1, file_label, snippet));
    }
    context
}

fn iso_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn completion_frame() -> Value {
    json!({
        "type": "completion",
        "status": "finished",
        "message": "response complete",
        "timestamp": Utc::now().timestamp_millis(),
        "date": iso_now(),
    })
}

/// GET /ws/chat/{handle} — the session handle rides in the final path
/// segment because WebSocket clients cannot set an Authorization header.
pub async fn chat_upgrade(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    match state.sessions.validate(&handle).await {
        Ok(Some(subject)) => {
            ws.on_upgrade(move |socket| handle_socket(state, subject, socket))
                .into_response()
        }
        Ok(None) => (
            axum::http::StatusCode::UNAUTHORIZED,
            "invalid or expired session handle",
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Session validation failed on chat upgrade");
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "session validation failed",
            )
                .into_response()
        }
    }
}

async fn handle_socket(state: AppState, subject: SessionSubject, socket: WebSocket) {
    let session_id = Uuid::new_v4().to_string();
    let cmd_token = Uuid::new_v4().to_string();
    info!(user = %subject.username, session_id = %session_id, "Chat session opened");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Single writer task; everything else sends frames through the channel.
    let (out_tx, mut out_rx) = mpsc::channel::<Value>(64);
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = frame.to_string();
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // The stop command token is issued at session open.
    let _ = out_tx
        .send(json!({
            "type": "session",
            "_internal_cmd_token": cmd_token,
        }))
        .await;

    while let Some(message) = ws_rx.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "WebSocket receive error");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                if let Some(control) = parse_stop_command(&text, &cmd_token) {
                    if control {
                        handle_stop(&state, &session_id, &out_tx).await;
                    } else {
                        warn!(session_id = %session_id, "Stop command with wrong token ignored");
                    }
                    continue;
                }

                // A regular user message starts a turn; processing runs in
                // its own task so stop frames keep flowing in.
                let state = state.clone();
                let subject = subject.clone();
                let session_id = session_id.clone();
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    process_message(state, subject, session_id, text, out_tx).await;
                });
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.chat_sessions.remove(&session_id);
    writer.abort();
    info!(session_id = %session_id, "Chat session closed");
}

/// Returns `Some(token_ok)` when the frame is a stop command, `None` for
/// ordinary messages.
fn parse_stop_command(text: &str, expected_token: &str) -> Option<bool> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("type")?.as_str()? != "stop" {
        return None;
    }
    let token = value.get("_internal_cmd_token").and_then(|t| t.as_str());
    Some(token == Some(expected_token))
}

async fn handle_stop(state: &AppState, session_id: &str, out_tx: &mpsc::Sender<Value>) {
    let Some(session) = state.chat_sessions.get(session_id) else {
        debug!(session_id = %session_id, "Stop received with no active turn");
        return;
    };

    session.cancel.store(true, Ordering::SeqCst);
    let _ = out_tx
        .send(json!({
            "type": "stop",
            "message": "response stopped",
            "timestamp": Utc::now().timestamp_millis(),
            "date": iso_now(),
        }))
        .await;

    // The flag clears shortly after so the next message on this session is
    // unaffected.
    let cancel = session.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(STOP_FLAG_CLEAR_SECS)).await;
        cancel.store(false, Ordering::SeqCst);
    });
}

async fn process_message(
    state: AppState,
    subject: SessionSubject,
    session_id: String,
    user_message: String,
    out_tx: mpsc::Sender<Value>,
) {
    let user_id = subject.user_id.to_string();

    let conversation_id = match state.conversations.current_conversation(&user_id).await {
        Ok(id) => id,
        Err(e) => {
            error!(error = %e, "Failed to resolve conversation id");
            send_error_and_complete(&out_tx, "conversation state unavailable").await;
            return;
        }
    };

    let history = state
        .conversations
        .history(&conversation_id)
        .await
        .unwrap_or_default();

    // Grounding context from permissioned retrieval. Retrieval failure
    // degrades to an ungrounded answer rather than failing the turn.
    let results = state
        .search
        .search_with_permission(&user_message, &user_id, CHAT_TOP_K)
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Retrieval failed; answering without references");
            Vec::new()
        });
    let context = build_context(&results);

    let session = state.chat_sessions.create(&session_id);

    let stream = match state
        .chat_backend
        .stream_chat(&user_message, &context, &history)
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "Chat stream failed to open");
            send_error_and_complete(&out_tx, "the model service is unavailable").await;
            state.chat_sessions.remove(&session_id);
            return;
        }
    };

    // Consumer: append deltas to the buffer and forward them unless the
    // stop flag is set. The upstream stream is never forcibly aborted.
    {
        let session = session.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            let mut stream = stream;
            while let Some(delta) = stream.next().await {
                match delta {
                    Ok(text) if !text.is_empty() => {
                        session.buffer.lock().unwrap().push_str(&text);
                        if !session.cancel.load(Ordering::SeqCst) {
                            let _ = out_tx.send(json!({ "chunk": text })).await;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Model stream error mid-response");
                        break;
                    }
                }
            }
            session.finished.store(true, Ordering::SeqCst);
        });
    }

    // Watchdog: completion is declared when two consecutive buffer-length
    // samples match, with a hard cap of five extra windows.
    tokio::time::sleep(Duration::from_secs(WATCHDOG_INITIAL_DELAY_SECS)).await;

    let mut completed = false;
    let mut last_len = session.buffer_len();
    tokio::time::sleep(Duration::from_secs(WATCHDOG_SAMPLE_DELAY_SECS)).await;

    if session.buffer_len() == last_len && (session.finished.load(Ordering::SeqCst) || last_len > 0)
    {
        completed = true;
    }

    if !completed {
        for _ in 0..WATCHDOG_EXTRA_WINDOWS {
            tokio::time::sleep(Duration::from_secs(WATCHDOG_WINDOW_SECS)).await;
            last_len = session.buffer_len();
            tokio::time::sleep(Duration::from_secs(WATCHDOG_SAMPLE_DELAY_SECS)).await;
            if session.buffer_len() == last_len {
                completed = true;
                break;
            }
        }
    }

    if !completed {
        // Cap reached: force completion regardless of stream state.
        warn!(session_id = %session_id, "Completion watchdog cap reached; forcing completion");
    }

    let response = session.snapshot();
    let _ = out_tx.send(completion_frame()).await;

    if let Err(e) = state
        .conversations
        .append_exchange(&conversation_id, &user_message, &response, &iso_now())
        .await
    {
        error!(error = %e, "Failed to persist conversation history");
    }

    state.chat_sessions.remove(&session_id);
    debug!(session_id = %session_id, response_len = response.len(), "Turn complete");
}

async fn send_error_and_complete(out_tx: &mpsc::Sender<Value>, message: &str) {
    let _ = out_tx.send(json!({ "error": message })).await;
    let _ = out_tx.send(completion_frame()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(file_name: Option<&str>, text: &str) -> SearchResult {
        SearchResult {
            file_md5: "d41d8cd98f00b204e9800998ecf8427e".into(),
            chunk_id: 1,
            text_content: text.into(),
            score: 1.0,
            user_id: "42".into(),
            org_tag: "DEFAULT".into(),
            is_public: true,
            file_name: file_name.map(String::from),
        }
    }

    #[test]
    fn context_lines_match_grounding_format() {
        let results = vec![result(Some("a.pdf"), "Alpha beta.")];
        assert_eq!(build_context(&results), "[1] (a.pdf) Alpha beta.\n");
    }

    #[test]
    fn context_numbers_multiple_hits() {
        let results = vec![
            result(Some("a.pdf"), "First."),
            result(Some("b.md"), "Second."),
        ];
        let context = build_context(&results);
        assert!(context.starts_with("[1] (a.pdf) First.\n"));
        assert!(context.contains("[2] (b.md) Second.\n"));
    }

    #[test]
    fn context_truncates_at_300_chars() {
        let long = "x".repeat(400);
        let context = build_context(&[result(Some("a.pdf"), &long)]);
        // 300 chars plus the ellipsis marker.
        assert!(context.contains(&"x".repeat(300)));
        assert!(!context.contains(&"x".repeat(301)));
        assert!(context.contains('…'));
    }

    #[test]
    fn context_uses_unknown_for_missing_filenames() {
        let context = build_context(&[result(None, "text")]);
        assert!(context.starts_with("[1] (unknown) "));
    }

    #[test]
    fn context_caps_at_top_five() {
        let results: Vec<SearchResult> =
            (0..8).map(|i| result(Some("f"), &format!("r{i}"))).collect();
        let context = build_context(&results);
        assert!(context.contains("[5]"));
        assert!(!context.contains("[6]"));
    }

    #[test]
    fn empty_results_render_empty_context() {
        assert_eq!(build_context(&[]), "");
    }

    #[test]
    fn stop_command_parsing() {
        assert_eq!(
            parse_stop_command(r#"{"type":"stop","_internal_cmd_token":"t1"}"#, "t1"),
            Some(true)
        );
        assert_eq!(
            parse_stop_command(r#"{"type":"stop","_internal_cmd_token":"bad"}"#, "t1"),
            Some(false)
        );
        assert_eq!(parse_stop_command(r#"{"type":"stop"}"#, "t1"), Some(false));
        // Ordinary text and non-stop JSON are user messages.
        assert_eq!(parse_stop_command("hello there", "t1"), None);
        assert_eq!(parse_stop_command(r#"{"type":"ping"}"#, "t1"), None);
    }

    #[test]
    fn completion_frame_shape() {
        let frame = completion_frame();
        assert_eq!(frame["type"], "completion");
        assert_eq!(frame["status"], "finished");
        assert!(frame["timestamp"].is_i64());
        assert!(frame["message"].is_string());
    }

    #[test]
    fn session_registry_lifecycle() {
        let sessions = ChatSessions::new();
        let state = sessions.create("s1");
        assert_eq!(sessions.live_count(), 1);

        state.buffer.lock().unwrap().push_str("partial");
        assert_eq!(sessions.get("s1").unwrap().buffer_len(), 7);

        sessions.remove("s1");
        assert!(sessions.get("s1").is_none());
        assert_eq!(sessions.live_count(), 0);
    }
}
