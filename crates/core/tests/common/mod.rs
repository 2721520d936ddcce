//! Scripted in-process automation host for integration tests.
//!
//! Serves the wire protocol over the same message-channel pair the real
//! embedder would bridge to a transport: `__create__` announcements before
//! every response that references a new object, responses correlated by
//! id, and events pushed on host initiative.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub struct Host {
    state: Arc<Mutex<HostState>>,
    to_client: mpsc::UnboundedSender<Value>,
    start_gate: watch::Sender<bool>,
}

#[derive(Default)]
struct HostState {
    next_session: u32,
    next_page: u32,
    /// Tabs the browser currently has, by id.
    tabs: Vec<u32>,
    sessions: HashMap<String, SessionRec>,
    /// context guid -> owning session guid
    contexts: HashMap<String, String>,
    /// page guid -> tab id
    pages: HashMap<String, u32>,
    /// Every request seen: (guid, method, params)
    calls: Vec<(String, String, Value)>,
    /// Respond to the next `start` with this error instead.
    fail_next_start: Option<(String, String)>,
}

struct SessionRec {
    context_guid: String,
    recorder_guid: String,
    dead: bool,
    closed: bool,
}

impl Host {
    /// Wires a controller to a fresh host.
    pub async fn connect() -> (bext::SessionController, Host) {
        Self::connect_with_gate(false).await
    }

    /// Like [`connect`](Self::connect), but `start` requests stall until
    /// [`release_starts`](Self::release_starts) is called.
    pub async fn connect_gated() -> (bext::SessionController, Host) {
        Self::connect_with_gate(true).await
    }

    async fn connect_with_gate(hold_starts: bool) -> (bext::SessionController, Host) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let (start_gate, gate_rx) = watch::channel(!hold_starts);
        let state = Arc::new(Mutex::new(HostState::default()));

        tokio::spawn(serve(
            Arc::clone(&state),
            outbound_rx,
            inbound_tx.clone(),
            gate_rx,
        ));

        let controller = bext::connect(outbound_tx, inbound_rx)
            .await
            .expect("handshake with scripted host failed");

        let host = Host {
            state,
            to_client: inbound_tx,
            start_gate,
        };
        (controller, host)
    }

    /// Lets gated `start` requests proceed.
    pub fn release_starts(&self) {
        let _ = self.start_gate.send(true);
    }

    /// Pushes an event to the client, as the host would on its own.
    pub fn emit(&self, guid: &str, method: &str, params: Value) {
        let _ = self.to_client.send(json!({
            "guid": guid,
            "method": method,
            "params": params,
        }));
    }

    /// Makes every further call touching this session fail, without any
    /// close notification - the "silently died" case.
    pub fn mark_dead(&self, session_guid: &str) {
        if let Some(session) = self.state.lock().sessions.get_mut(session_guid) {
            session.dead = true;
        }
    }

    /// Makes the next `start` request fail with the given error.
    pub fn fail_next_start(&self, name: &str, message: &str) {
        self.state.lock().fail_next_start = Some((name.to_string(), message.to_string()));
    }

    /// Adds a tab the host will report for attach operations.
    pub fn add_tab(&self, tab_id: u32) {
        self.state.lock().tabs.push(tab_id);
    }

    /// Params of every request with the given method, in arrival order.
    pub fn calls_for(&self, method: &str) -> Vec<Value> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(_, m, _)| m == method)
            .map(|(_, _, params)| params.clone())
            .collect()
    }

    /// Number of `start` requests that reached the host.
    pub fn start_count(&self) -> usize {
        self.calls_for("start").len()
    }

    /// True if the host saw `method` addressed to `guid`.
    pub fn saw_call(&self, guid: &str, method: &str) -> bool {
        self.state
            .lock()
            .calls
            .iter()
            .any(|(g, m, _)| g == guid && m == method)
    }
}

async fn serve(
    state: Arc<Mutex<HostState>>,
    mut from_client: mpsc::UnboundedReceiver<Value>,
    to_client: mpsc::UnboundedSender<Value>,
    gate_rx: watch::Receiver<bool>,
) {
    while let Some(message) = from_client.recv().await {
        let id = message["id"].as_u64().expect("request without id") as u32;
        let guid = message["guid"].as_str().unwrap_or("").to_string();
        let method = message["method"].as_str().unwrap_or("").to_string();
        let params = message["params"].clone();

        state
            .lock()
            .calls
            .push((guid.clone(), method.clone(), params.clone()));

        match method.as_str() {
            "initialize" => {
                send_create(&to_client, "", "Controller", "controller@1", json!({}));
                respond(
                    &to_client,
                    id,
                    json!({"controller": {"guid": "controller@1"}}),
                );
            }

            "start" => {
                let mut gate = gate_rx.clone();
                let _ = gate.wait_for(|released| *released).await;

                if let Some((name, msg)) = state.lock().fail_next_start.take() {
                    respond_error(&to_client, id, &name, &msg);
                    continue;
                }

                let n = {
                    let mut s = state.lock();
                    s.next_session += 1;
                    s.next_session
                };
                let session = format!("session@{n}");
                let context = format!("context@{n}");
                let recorder = format!("recorder@{n}");

                send_create(
                    &to_client,
                    "controller@1",
                    "Session",
                    &session,
                    json!({
                        "context": {"guid": context},
                        "recorder": {"guid": recorder},
                    }),
                );
                send_create(&to_client, &session, "BrowsingContext", &context, json!({}));
                send_create(&to_client, &session, "Recorder", &recorder, json!({}));

                {
                    let mut s = state.lock();
                    s.contexts.insert(context.clone(), session.clone());
                    s.sessions.insert(
                        session.clone(),
                        SessionRec {
                            context_guid: context,
                            recorder_guid: recorder,
                            dead: false,
                            closed: false,
                        },
                    );
                }

                respond(&to_client, id, json!({"session": {"guid": session}}));
            }

            "pages" => {
                let usable = {
                    let s = state.lock();
                    s.contexts
                        .get(&guid)
                        .and_then(|session| s.sessions.get(session))
                        .map(|rec| !rec.dead && !rec.closed)
                        .unwrap_or(false)
                };
                if usable {
                    let pages: Vec<Value> = {
                        let s = state.lock();
                        let session = s.contexts.get(&guid).cloned().unwrap_or_default();
                        s.pages
                            .keys()
                            .filter(|page| page_belongs_to(page.as_str(), &session))
                            .map(|page| json!({"guid": page}))
                            .collect()
                    };
                    respond(&to_client, id, json!({"pages": pages}));
                } else {
                    respond_error(&to_client, id, "TargetClosedError", "context is closed");
                }
            }

            "close" => {
                let session_close = {
                    let mut s = state.lock();
                    match s.sessions.get_mut(&guid) {
                        Some(rec) if !rec.dead && !rec.closed => {
                            rec.closed = true;
                            Some(rec.context_guid.clone())
                        }
                        _ => None,
                    }
                };
                match session_close {
                    Some(context) => {
                        respond(&to_client, id, json!({}));
                        // Context closure is what ends the session.
                        send_event(&to_client, &context, "close", json!({}));
                    }
                    None => {
                        respond_error(&to_client, id, "TargetClosedError", "session is gone")
                    }
                }
            }

            "attach" => {
                let tab_id = params["tabId"].as_u64().unwrap_or(0) as u32;
                let known = state.lock().tabs.contains(&tab_id);
                if !known {
                    respond_error(
                        &to_client,
                        id,
                        "Error",
                        &format!("no tab with id {tab_id}"),
                    );
                    continue;
                }
                let page = create_page(&state, &to_client, &guid, tab_id, "about:blank");
                respond(&to_client, id, json!({"page": {"guid": page}}));
                send_event(
                    &to_client,
                    &guid,
                    "attached",
                    json!({"tabId": tab_id, "page": {"guid": page}}),
                );
            }

            "attachAll" => {
                let tabs: Vec<u32> = state.lock().tabs.clone();
                let mut pages = Vec::new();
                for tab_id in tabs {
                    let page = create_page(&state, &to_client, &guid, tab_id, "about:blank");
                    send_event(
                        &to_client,
                        &guid,
                        "attached",
                        json!({"tabId": tab_id, "page": {"guid": page}}),
                    );
                    pages.push(json!({"guid": page}));
                }
                respond(&to_client, id, json!({"pages": pages}));
            }

            "detach" => {
                let tab_id = if let Some(tab_id) = params["tabId"].as_u64() {
                    Some(tab_id as u32)
                } else {
                    params["page"]["guid"]
                        .as_str()
                        .and_then(|page| state.lock().pages.get(page).copied())
                };
                respond(&to_client, id, json!({}));
                if let Some(tab_id) = tab_id {
                    send_event(&to_client, &guid, "detached", json!({"tabId": tab_id}));
                }
            }

            "detachAll" => {
                respond(&to_client, id, json!({}));
            }

            "newPage" => {
                let url = params["url"].as_str().unwrap_or("about:blank").to_string();
                let tab_id = {
                    let mut s = state.lock();
                    let tab_id = 1000 + s.next_page;
                    s.tabs.push(tab_id);
                    tab_id
                };
                let page = create_page(&state, &to_client, &guid, tab_id, &url);
                respond(&to_client, id, json!({"page": {"guid": page}}));
                send_event(
                    &to_client,
                    &guid,
                    "attached",
                    json!({"tabId": tab_id, "page": {"guid": page}}),
                );
            }

            "list" => {
                respond(
                    &to_client,
                    id,
                    json!({"tests": [{"title": "example test"}]}),
                );
            }

            // Recorder commands are acknowledged but never echoed as
            // events; tests inject the echo explicitly via `emit`.
            "show" | "hide" | "setMode" | "load" | "run" => {
                respond(&to_client, id, json!({}));
            }

            other => {
                respond_error(
                    &to_client,
                    id,
                    "Error",
                    &format!("unexpected method {other}"),
                );
            }
        }
    }
}

fn page_belongs_to(page_guid: &str, session_guid: &str) -> bool {
    // Page guids are minted per session as "page@<session_n>-<n>".
    let prefix = session_guid.trim_start_matches("session@");
    page_guid
        .trim_start_matches("page@")
        .starts_with(&format!("{prefix}-"))
}

/// Creates a page object under the session's context and returns its guid.
///
/// `session_guid` is the guid the attach-style request was addressed to.
fn create_page(
    state: &Arc<Mutex<HostState>>,
    to_client: &mpsc::UnboundedSender<Value>,
    session_guid: &str,
    tab_id: u32,
    url: &str,
) -> String {
    let (page, context) = {
        let mut s = state.lock();
        s.next_page += 1;
        let session_n = session_guid.trim_start_matches("session@");
        let page = format!("page@{session_n}-{}", s.next_page);
        let context = s
            .sessions
            .get(session_guid)
            .map(|rec| rec.context_guid.clone())
            .unwrap_or_else(|| "context@0".to_string());
        s.pages.insert(page.clone(), tab_id);
        (page, context)
    };
    send_create(
        to_client,
        &context,
        "Page",
        &page,
        json!({"url": url}),
    );
    page
}

fn send_create(
    to_client: &mpsc::UnboundedSender<Value>,
    parent_guid: &str,
    type_name: &str,
    guid: &str,
    initializer: Value,
) {
    let _ = to_client.send(json!({
        "guid": parent_guid,
        "method": "__create__",
        "params": {
            "type": type_name,
            "guid": guid,
            "initializer": initializer,
        },
    }));
}

fn send_event(
    to_client: &mpsc::UnboundedSender<Value>,
    guid: &str,
    method: &str,
    params: Value,
) {
    let _ = to_client.send(json!({
        "guid": guid,
        "method": method,
        "params": params,
    }));
}

fn respond(to_client: &mpsc::UnboundedSender<Value>, id: u32, result: Value) {
    let _ = to_client.send(json!({"id": id, "result": result}));
}

fn respond_error(to_client: &mpsc::UnboundedSender<Value>, id: u32, name: &str, message: &str) {
    let _ = to_client.send(json!({
        "id": id,
        "error": {"error": {"name": name, "message": message}},
    }));
}
