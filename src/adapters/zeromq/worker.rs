//! Per-function serving threads.
//!
//! Each function gets one OS thread that owns its socket(s). The loop polls
//! with a one second timeout so a cleared running flag is observed promptly;
//! transport errors are logged and followed by a short pause, never a crash.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::pattern::{bound_port, EndpointConfig, Pattern};
use super::reply::{handle_publish, handle_push, handle_request};
use crate::registry::ServiceMetadata;
use crate::types::Result;

/// Poll timeout of every serving loop, in milliseconds.
const POLL_TIMEOUT_MS: i64 = 1000;

/// Pause after a transport error before the loop resumes.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Send timeout of the push/pull result socket; results without a consumer
/// are dropped after this long.
const PUSH_SEND_TIMEOUT_MS: i32 = 1000;

/// Granularity of interruptible sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Lifecycle of one function's endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Configured,
    Bound,
    Serving,
    Stopping,
    Closed,
}

pub(super) type SharedState = Arc<Mutex<EndpointState>>;

pub(super) fn set_state(state: &SharedState, next: EndpointState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
}

pub(super) fn get_state(state: &SharedState) -> EndpointState {
    *state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sockets bound for one function, moved into its thread.
pub(super) enum BoundSockets {
    Single(zmq::Socket),
    PushPull { pull: zmq::Socket, push: zmq::Socket },
}

/// Result of binding a function's endpoint.
pub(super) struct Binding {
    pub sockets: BoundSockets,
    pub port: u16,
    pub response_port: Option<u16>,
}

/// Create and bind the sockets for `endpoint` on the caller's thread.
pub(super) fn bind(context: &zmq::Context, endpoint: &EndpointConfig) -> Result<Binding> {
    let socket = context.socket(endpoint.pattern.socket_type())?;
    socket.set_linger(0)?;
    socket.bind(&endpoint.bind_endpoint())?;
    let port = bound_port(&socket)?;

    if endpoint.pattern != Pattern::PushPull {
        return Ok(Binding {
            sockets: BoundSockets::Single(socket),
            port,
            response_port: None,
        });
    }

    let push = context.socket(zmq::PUSH)?;
    push.set_linger(0)?;
    push.set_sndtimeo(PUSH_SEND_TIMEOUT_MS)?;
    push.bind(&endpoint.response_endpoint(port))?;
    let response_port = bound_port(&push)?;
    Ok(Binding {
        sockets: BoundSockets::PushPull { pull: socket, push },
        port,
        response_port: Some(response_port),
    })
}

/// State a serving thread needs besides its sockets.
pub(super) struct Worker {
    pub service: Arc<ServiceMetadata>,
    pub endpoint: EndpointConfig,
    pub running: Arc<AtomicBool>,
    pub state: SharedState,
    pub publish_interval: Duration,
}

impl Worker {
    /// Spawn the serving thread. `done` is signalled after the sockets are
    /// closed, whether the loop ended normally or not.
    pub fn spawn(self, sockets: BoundSockets, done: Sender<()>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("zmq-{}", self.service.name))
            .spawn(move || {
                set_state(&self.state, EndpointState::Serving);
                info!(
                    service = %self.service.name,
                    pattern = %self.endpoint.pattern,
                    "serving"
                );
                match &sockets {
                    BoundSockets::Single(socket) => match self.endpoint.pattern {
                        Pattern::PublishSubscribe => self.serve_publish(socket),
                        Pattern::RouterDealer => self.serve_router(socket),
                        _ => self.serve_reply(socket),
                    },
                    BoundSockets::PushPull { pull, push } => self.serve_push_pull(pull, push),
                }
                set_state(&self.state, EndpointState::Stopping);
                drop(sockets);
                set_state(&self.state, EndpointState::Closed);
                debug!(service = %self.service.name, "endpoint closed");
                let _ = done.send(());
            })
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, returning early once the running flag clears.
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    fn backoff(&self, stage: &str, err: zmq::Error) {
        warn!(service = %self.service.name, stage, error = %err, "transport error");
        self.pause(ERROR_BACKOFF);
    }

    /// Wait for input; `false` means nothing arrived (or polling failed).
    fn readable(&self, socket: &zmq::Socket) -> bool {
        match socket.poll(zmq::POLLIN, POLL_TIMEOUT_MS) {
            Ok(n) => n > 0,
            Err(e) => {
                self.backoff("poll", e);
                false
            }
        }
    }

    fn serve_reply(&self, socket: &zmq::Socket) {
        while self.is_running() {
            if !self.readable(socket) {
                continue;
            }
            let request = match socket.recv_bytes(0) {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.backoff("recv", e);
                    continue;
                }
            };
            let reply = handle_request(&self.service, &request);
            if let Err(e) = socket.send(reply, 0) {
                self.backoff("send", e);
            }
        }
    }

    fn serve_publish(&self, socket: &zmq::Socket) {
        let topic = self.endpoint.topic.as_bytes();
        while self.is_running() {
            let payload = handle_publish(&self.service);
            if let Err(e) = socket.send_multipart([topic, payload.as_slice()], 0) {
                warn!(service = %self.service.name, error = %e, "publish failed");
            }
            self.pause(self.publish_interval);
        }
    }

    fn serve_push_pull(&self, pull: &zmq::Socket, push: &zmq::Socket) {
        while self.is_running() {
            if !self.readable(pull) {
                continue;
            }
            let request = match pull.recv_bytes(0) {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.backoff("recv", e);
                    continue;
                }
            };
            let reply = handle_push(&self.service, &request);
            match push.send(reply, 0) {
                Ok(()) => {}
                Err(zmq::Error::EAGAIN) => {
                    warn!(service = %self.service.name, "no result consumer connected, result dropped");
                }
                Err(e) => self.backoff("send", e),
            }
        }
    }

    fn serve_router(&self, socket: &zmq::Socket) {
        while self.is_running() {
            if !self.readable(socket) {
                continue;
            }
            let frames = match socket.recv_multipart(0) {
                Ok(frames) => frames,
                Err(e) => {
                    self.backoff("recv", e);
                    continue;
                }
            };
            let [identity, delimiter, payload] = match <[Vec<u8>; 3]>::try_from(frames) {
                Ok(frames) => frames,
                Err(frames) => {
                    warn!(
                        service = %self.service.name,
                        frames = frames.len(),
                        "dropping malformed envelope"
                    );
                    continue;
                }
            };
            let reply = handle_request(&self.service, &payload);
            if let Err(e) = socket.send_multipart([identity, delimiter, reply], 0) {
                self.backoff("send", e);
            }
        }
    }
}
