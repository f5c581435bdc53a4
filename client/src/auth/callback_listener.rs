//! Loopback HTTP listener that receives the identity provider's redirect.
//!
//! The listener binds `127.0.0.1` on an ephemeral port and serves two paths:
//!
//! - `GET /auth?code=..&state=..` (or `?error=..&error_description=..`)
//!   carries the outcome of the browser sign-in.
//! - `GET /closed` reports that the sign-in window went away.
//!
//! A sign-in waits on a single-assignment slot armed with [`CallbackListener::arm`].
//! The slot is taken under a mutex by whichever event comes first (callback,
//! `/closed`, or the listener shutting down), so a wait resolves exactly once.

use crate::common::ManagementError;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

const AUTH_PATH: &str = "/auth";
const CLOSED_PATH: &str = "/closed";
const MAX_HEADER_LINES: usize = 100;

const SIGNED_IN_PAGE: &str = "<!DOCTYPE html><html><head><title>Signed in</title></head>\
<body><p>Authentication complete. You can close this window and return to the application.</p></body></html>";

/// What the browser reported back to the listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The identity provider issued an authorization code
    Code(String),
    /// The identity provider reported an error, or the callback was unusable
    Failure {
        error: String,
        description: Option<String>,
    },
    /// The listener closed before any callback arrived
    Closed,
}

struct PendingCallback {
    state: String,
    sender: oneshot::Sender<CallbackOutcome>,
}

type PendingSlot = Arc<Mutex<Option<PendingCallback>>>;

/// Takes the pending slot and completes it. Returns `false` when nothing was
/// waiting, i.e. the wait already resolved through another path.
fn resolve_pending(
    pending: &PendingSlot,
    outcome: impl FnOnce(&str) -> CallbackOutcome,
) -> bool {
    let taken = match pending.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };

    match taken {
        Some(callback) => {
            let outcome = outcome(&callback.state);
            // The waiter may have given up; the slot is consumed either way.
            let _ = callback.sender.send(outcome);
            true
        }
        None => false,
    }
}

/// Local redirect endpoint for the authorization-code flow.
pub struct CallbackListener {
    local_addr: SocketAddr,
    pending: PendingSlot,
    shutdown: CancellationToken,
}

impl CallbackListener {
    /// Binds an ephemeral loopback port and starts the accept loop.
    pub async fn bind() -> Result<Self, ManagementError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| ManagementError::Listener {
                reason: format!("failed to bind loopback listener: {e}"),
            })?;
        let local_addr = listener.local_addr().map_err(|e| ManagementError::Listener {
            reason: format!("failed to read listener address: {e}"),
        })?;

        let pending: PendingSlot = Arc::new(Mutex::new(None));
        let shutdown = CancellationToken::new();

        tokio::spawn(accept_loop(listener, pending.clone(), shutdown.clone()));
        log::debug!("Callback listener started on {local_addr}");

        Ok(Self {
            local_addr,
            pending,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL the identity provider should redirect the browser to.
    pub fn callback_url(&self) -> String {
        format!("http://{}{AUTH_PATH}", self.local_addr)
    }

    /// URL a launcher calls when the sign-in window is closed.
    pub fn closed_url(&self) -> String {
        format!("http://{}{CLOSED_PATH}", self.local_addr)
    }

    /// Arms the slot for a new sign-in expecting `state` on the callback.
    ///
    /// A previous wait still armed is resolved as [`CallbackOutcome::Closed`].
    pub fn arm(&self, state: String) -> oneshot::Receiver<CallbackOutcome> {
        let (sender, receiver) = oneshot::channel();
        let previous = match self.pending.lock() {
            Ok(mut guard) => guard.replace(PendingCallback { state, sender }),
            Err(poisoned) => poisoned.into_inner().replace(PendingCallback { state, sender }),
        };
        if let Some(previous) = previous {
            let _ = previous.sender.send(CallbackOutcome::Closed);
        }
        receiver
    }

    /// Drops an armed wait as cancelled. Returns `false` if it already resolved.
    pub fn disarm(&self) -> bool {
        resolve_pending(&self.pending, |_| CallbackOutcome::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stops accepting connections and releases the port. Safe to call repeatedly.
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            log::debug!("Closing callback listener on {}", self.local_addr);
        }
        self.shutdown.cancel();
        self.disarm();
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(listener: TcpListener, pending: PendingSlot, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let pending = pending.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &pending).await {
                            log::debug!("Callback connection from {peer} failed: {e}");
                        }
                    });
                }
                Err(e) => {
                    log::warn!("Callback listener accept failed: {e}");
                }
            }
        }
    }

    resolve_pending(&pending, |_| CallbackOutcome::Closed);
}

async fn handle_connection(stream: TcpStream, pending: &PendingSlot) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    // Only the request head matters; drain the headers.
    let mut line = String::new();
    for _ in 0..MAX_HEADER_LINES {
        line.clear();
        let read = reader.read_line(&mut line).await?;
        if read == 0 || line.trim_end().is_empty() {
            break;
        }
    }

    let (status, body) = route(&request_line, pending);

    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let mut stream = reader.into_inner();
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn route(request_line: &str, pending: &PendingSlot) -> (&'static str, String) {
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();

    if method != "GET" {
        return ("405 Method Not Allowed", String::new());
    }

    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    match path {
        AUTH_PATH => {
            let params = parse_query(query);
            let mut delivered_code = false;
            let resolved = resolve_pending(pending, |expected_state| {
                let outcome = outcome_from_params(&params, expected_state);
                delivered_code = matches!(outcome, CallbackOutcome::Code(_));
                outcome
            });

            if !resolved {
                ("400 Bad Request", "No sign-in is in progress.".to_string())
            } else if delivered_code {
                ("200 OK", SIGNED_IN_PAGE.to_string())
            } else {
                ("400 Bad Request", "Authentication failed.".to_string())
            }
        }
        CLOSED_PATH => {
            resolve_pending(pending, |_| CallbackOutcome::Closed);
            ("200 OK", String::new())
        }
        _ => ("404 Not Found", String::new()),
    }
}

fn outcome_from_params(params: &HashMap<String, String>, expected_state: &str) -> CallbackOutcome {
    let code = params
        .get("code")
        .map(|c| c.trim())
        .filter(|c| !c.is_empty());

    match code {
        Some(code) if params.get("state").map(String::as_str) == Some(expected_state) => {
            CallbackOutcome::Code(code.to_string())
        }
        Some(_) => CallbackOutcome::Failure {
            error: "state_mismatch".to_string(),
            description: Some(
                "The authorization response does not belong to the pending sign-in.".to_string(),
            ),
        },
        None => CallbackOutcome::Failure {
            error: params
                .get("error")
                .cloned()
                .unwrap_or_else(|| "missing_code".to_string()),
            description: params.get("error_description").cloned().or_else(|| {
                Some("An error occurred during authentication. 'code' is null/empty.".to_string())
            }),
        },
    }
}

/// Parses an `application/x-www-form-urlencoded` query string.
pub(crate) fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(component: &str) -> String {
    let spaced = component.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(spaced)
}
