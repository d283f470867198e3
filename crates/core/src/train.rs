//! Train actor: waits for its itinerary, then walks it one hop at a time.

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::{
    authority::{AuthorityClient, AuthorizationRequest},
    config::AppConfig,
    error::{ControlError, ControlResult},
    journal::{MovementJournal, Waypoint},
    map::TrackLayout,
    models::{Itinerary, Position},
    segment::SegmentStore,
};

/// Lifecycle of a train.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainState {
    /// Blocked on the itinerary channel.
    AwaitingItinerary,
    /// Walking the itinerary.
    Traveling,
    /// Done; terminal.
    Completed,
}

/// What a train did before completing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainReport {
    /// Train id.
    pub train: u32,
    /// Where the train stopped; `None` when it had no itinerary.
    pub terminus: Option<Position>,
    /// Hops completed.
    pub hops: usize,
    /// Advance attempts, including denied ones.
    pub attempts: u64,
}

/// One train. Runs to completion; there is no mid-flight cancellation.
#[derive(Debug)]
pub struct Train {
    id: u32,
    state: TrainState,
    layout: TrackLayout,
    store: SegmentStore,
    authority: Option<AuthorityClient>,
    journal: MovementJournal,
    poll_interval: Duration,
}

impl Train {
    /// Train `id` configured for the control level in `config`.
    pub fn new(id: u32, config: &AppConfig, store: SegmentStore) -> Self {
        let authority = config
            .level
            .is_centralized()
            .then(|| AuthorityClient::from_config(config));
        Self {
            id,
            state: TrainState::AwaitingItinerary,
            layout: TrackLayout::default(),
            store,
            authority,
            journal: MovementJournal::new(config.train_log_path(id)),
            poll_interval: config.poll_interval(),
        }
    }

    /// Train id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TrainState {
        self.state
    }

    /// Receive the itinerary message, travel it, and report.
    pub async fn run(mut self, itinerary: oneshot::Receiver<String>) -> ControlResult<TrainReport> {
        info!(train = self.id, "Train started");
        let message = itinerary
            .await
            .map_err(|_| ControlError::parse("itinerary", "<channel closed before delivery>"))?;

        let Some(itinerary) = Itinerary::parse_message(&message)? else {
            info!(train = self.id, "No itinerary assigned");
            self.journal.record(Waypoint::Nowhere, Waypoint::Nowhere)?;
            self.state = TrainState::Completed;
            return Ok(TrainReport {
                train: self.id,
                terminus: None,
                hops: 0,
                attempts: 0,
            });
        };
        for position in itinerary.positions() {
            self.layout.check(*position)?;
        }

        self.state = TrainState::Traveling;
        info!(train = self.id, itinerary = %itinerary, "Itinerary received");
        let mut attempts = 0;
        let mut current = itinerary.start();
        for (_, next) in itinerary.hops() {
            self.journal.record(current.into(), next.into())?;
            attempts += self.advance(current, next).await?;
            current = next;
        }

        self.journal.record(current.into(), Waypoint::Nowhere)?;
        self.state = TrainState::Completed;
        info!(train = self.id, terminus = %current, attempts, "Itinerary completed");
        Ok(TrainReport {
            train: self.id,
            terminus: Some(current),
            hops: itinerary.positions().len() - 1,
            attempts,
        })
    }

    /// Retry at a fixed interval until the move is permitted. Returns the
    /// number of attempts it took.
    async fn advance(&self, current: Position, next: Position) -> ControlResult<u64> {
        let mut attempts = 0;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            attempts += 1;
            debug!(train = self.id, %current, %next, attempts, "Requesting permission to proceed");
            if self.try_advance(current, next).await? {
                info!(train = self.id, from = %current, to = %next, "Advanced");
                return Ok(attempts);
            }
        }
    }

    async fn try_advance(&self, current: Position, next: Position) -> ControlResult<bool> {
        if let Some(authority) = &self.authority {
            let request = AuthorizationRequest::new(self.id, current, next);
            if !authority.authorize(&request).await? {
                return Ok(false);
            }
        }
        if let Some(segment) = next.segment() {
            if !self.store.try_occupy(segment)? {
                return Ok(false);
            }
        }
        if let Some(segment) = current.segment() {
            self.store.set_occupied(segment, false)?;
        }
        Ok(true)
    }
}
