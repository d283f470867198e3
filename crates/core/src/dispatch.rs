//! Itinerary distribution: hands every train its route once, and the
//! authority server the full set once.

use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::{
    error::ControlResult,
    map::{self, RailMap},
    models::NO_POSITION,
};

/// Renders and delivers the itineraries of one built-in map.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    routes: &'static RailMap,
}

impl Dispatcher {
    /// Dispatcher for built-in map `number`.
    pub fn for_map(number: u32) -> ControlResult<Self> {
        Ok(Self {
            routes: map::rail_map(number)?,
        })
    }

    /// Train ids with a slot in the map, in order.
    pub fn trains(&self) -> impl Iterator<Item = u32> {
        1..=self.routes.len() as u32
    }

    /// `start-path-end` message for `train`, or the sentinel when the train
    /// has no slot.
    pub fn itinerary_message(&self, train: u32) -> String {
        (train as usize)
            .checked_sub(1)
            .and_then(|index| self.routes.get(index))
            .map_or_else(|| NO_POSITION.to_string(), |route| route.message())
    }

    /// Every train's itinerary joined with `~`, in train order.
    pub fn broadcast(&self) -> String {
        self.routes
            .iter()
            .map(|route| route.message())
            .collect::<Vec<_>>()
            .join("~")
    }

    /// Send the broadcast to the authority server.
    pub fn send_broadcast(&self, authority: oneshot::Sender<String>) {
        let message = self.broadcast();
        info!(broadcast = %message, "Map sent to authority");
        if authority.send(message).is_err() {
            warn!("Authority server stopped before receiving the map");
        }
    }

    /// Send `train` its itinerary.
    pub fn send_itinerary(&self, train: u32, channel: oneshot::Sender<String>) {
        let message = self.itinerary_message(train);
        info!(train, itinerary = %message, "Itinerary sent");
        if channel.send(message).is_err() {
            warn!(train, "Train stopped before receiving its itinerary");
        }
    }
}
