use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Local;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::{mpsc, oneshot, Mutex},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::AppConfig,
    error::{ControlError, ControlResult},
    journal::{AuditEntry, AuditJournal},
    map::TrackLayout,
    segment::SegmentStore,
};

use super::{
    protocol::{encode_response, AuthorizationRequest, MAX_REQUEST_LEN},
    state::AuthorityState,
};

const MAX_CONSECUTIVE_ACCEPT_ERRORS: usize = 10;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Notifications from the authority server to its supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityEvent {
    /// A granted move put the train in a station.
    StationReached {
        /// Train id.
        train: u32,
        /// Station id.
        station: u32,
    },
}

/// Totals reported once the server has shut down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthoritySummary {
    /// Decisions taken, granted or denied. Equals the audit journal length.
    pub decisions: usize,
    /// Decisions that granted movement.
    pub granted: usize,
}

struct Shared {
    state: Mutex<AuthorityState>,
    store: SegmentStore,
    audit: AuditJournal,
    events: mpsc::Sender<AuthorityEvent>,
    decisions: AtomicUsize,
    granted: AtomicUsize,
}

/// Arbitrates segment occupancy for trains under centralized control.
pub struct AuthorityServer {
    listener: UnixListener,
    socket_path: PathBuf,
    shared: Arc<Shared>,
}

impl AuthorityServer {
    /// Wait for the one-shot itinerary broadcast, seed the state from it,
    /// reset the audit journal and bind the endpoint.
    pub async fn start(
        config: &AppConfig,
        store: SegmentStore,
        broadcast: oneshot::Receiver<String>,
        events: mpsc::Sender<AuthorityEvent>,
    ) -> ControlResult<Self> {
        let message = broadcast.await.map_err(|_| {
            ControlError::parse("itinerary broadcast", "<channel closed before delivery>")
        })?;
        let state = AuthorityState::from_broadcast(TrackLayout::default(), &message)?;
        info!(broadcast = %message, "Authority state seeded");

        let audit = AuditJournal::new(config.audit_log_path());
        audit.reset()?;

        let socket_path = config.socket_path.clone();
        let listener = bind(&socket_path)?;
        info!(socket = %socket_path.display(), "Authority server listening");

        Ok(Self {
            listener,
            socket_path,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                store,
                audit,
                events,
                decisions: AtomicUsize::new(0),
                granted: AtomicUsize::new(0),
            }),
        })
    }

    /// Endpoint the server is bound to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until `shutdown` fires (or its sender is dropped),
    /// handing each to its own task. Waits briefly for in-flight exchanges,
    /// then removes the socket.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) -> ControlResult<AuthoritySummary> {
        let mut workers = JoinSet::new();
        let mut error_count = 0;
        let outcome = loop {
            tokio::select! {
                _ = &mut shutdown => break Ok(()),
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(err) = joined {
                        error!(?err, "Authorization worker panicked");
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        error_count = 0;
                        let shared = Arc::clone(&self.shared);
                        workers.spawn(async move {
                            if let Err(err) = serve(stream, &shared).await {
                                error!(?err, "Authorization worker failed");
                            }
                        });
                    }
                    Err(err) => {
                        error!(?err, "Failed to accept authorization request");
                        error_count += 1;
                        if error_count > MAX_CONSECUTIVE_ACCEPT_ERRORS {
                            break Err(ControlError::connection("accept", err));
                        }
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        };

        drop(self.listener);
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(pending = workers.len(), "Abandoning unfinished authorization workers");
            workers.abort_all();
        }

        let summary = AuthoritySummary {
            decisions: self.shared.decisions.load(Ordering::SeqCst),
            granted: self.shared.granted.load(Ordering::SeqCst),
        };
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => info!(socket = %self.socket_path.display(), "Authority server closed"),
            Err(err) => warn!(?err, socket = %self.socket_path.display(), "Failed to remove authority socket"),
        }
        outcome.map(|()| summary)
    }
}

fn bind(socket_path: &Path) -> ControlResult<UnixListener> {
    match std::fs::remove_file(socket_path) {
        Ok(()) => debug!(socket = %socket_path.display(), "Removed stale authority socket"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(ControlError::connection("remove stale socket", err)),
    }
    UnixListener::bind(socket_path).map_err(|err| ControlError::connection("bind", err))
}

/// Read until the payload decodes, the peer half-closes or the cap is hit.
async fn receive_request(stream: &mut UnixStream) -> ControlResult<AuthorizationRequest> {
    let mut payload = Vec::with_capacity(MAX_REQUEST_LEN);
    let mut chunk = [0u8; MAX_REQUEST_LEN];
    while payload.len() < MAX_REQUEST_LEN {
        let read = stream
            .read(&mut chunk[..MAX_REQUEST_LEN - payload.len()])
            .await
            .map_err(|err| ControlError::connection("receive request", err))?;
        if read == 0 {
            break;
        }
        payload.extend_from_slice(&chunk[..read]);
        if let Ok(request) = AuthorizationRequest::decode(&payload) {
            return Ok(request);
        }
    }
    AuthorizationRequest::decode(&payload)
}

/// One request/response exchange. The state lock is held from the decision
/// until the state reflects it, so concurrent workers never interleave.
async fn serve(mut stream: UnixStream, shared: &Shared) -> ControlResult<()> {
    let request = tokio::time::timeout(REQUEST_TIMEOUT, receive_request(&mut stream))
        .await
        .map_err(|_| {
            ControlError::connection(
                "receive request",
                io::Error::new(io::ErrorKind::TimedOut, "no request before timeout"),
            )
        })??;

    let mut state = shared.state.lock().await;
    if !state.follows_itinerary(&request) {
        warn!(request = %request, "Request does not follow the assigned itinerary");
    }
    let decision = state.decide(&request, &shared.store)?;
    let granted = decision.granted();
    debug!(request = %request, ?decision, "Authorization decided");

    stream
        .write_all(&[encode_response(granted)])
        .await
        .map_err(|err| ControlError::connection("send response", err))?;
    if let Err(err) = stream.shutdown().await {
        debug!(?err, "Train closed the connection first");
    }

    let reached = if granted { state.apply(&request)? } else { None };
    shared.audit.append(&AuditEntry {
        train: request.train,
        current: request.current,
        next: request.next,
        granted,
        at: Local::now(),
    })?;
    shared.decisions.fetch_add(1, Ordering::SeqCst);
    if granted {
        shared.granted.fetch_add(1, Ordering::SeqCst);
    }
    drop(state);

    info!(train = request.train, current = %request.current, next = %request.next, granted, "Authorization served");
    if let Some(station) = reached {
        let event = AuthorityEvent::StationReached {
            train: request.train,
            station,
        };
        if shared.events.send(event).await.is_err() {
            debug!(train = request.train, "Supervisor no longer listening for station events");
        }
    }
    Ok(())
}
