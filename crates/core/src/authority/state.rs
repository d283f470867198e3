//! The authority's belief about the track, and the grant rule applied to it.

use tracing::warn;

use crate::{
    error::ControlResult,
    map::TrackLayout,
    models::{Itinerary, Position},
    segment::SegmentStore,
};

use super::protocol::AuthorizationRequest;

/// Outcome of evaluating one request against the state and the segment store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// The next position is a station or a segment believed free.
    pub next_available: bool,
    /// Belief about the next segment agrees with its cell.
    pub next_consistent: bool,
    /// Belief about the current segment agrees with its cell.
    pub current_consistent: bool,
}

impl Decision {
    /// All three predicates hold.
    pub fn granted(&self) -> bool {
        self.next_available && self.next_consistent && self.current_consistent
    }
}

/// In-memory occupancy tracked by the authority server.
///
/// Only meaningful under centralized control. Callers must serialize
/// [`decide`](Self::decide) and [`apply`](Self::apply) for a request; the
/// server does so by holding one lock across both.
#[derive(Debug, Clone)]
pub struct AuthorityState {
    layout: TrackLayout,
    segment_occupied: Vec<bool>,
    station_count: Vec<i32>,
    itineraries: Vec<Option<Itinerary>>,
}

impl AuthorityState {
    /// Seed from every train's itinerary (index = train id - 1). Each station
    /// starts with one count per itinerary beginning there.
    pub fn new(layout: TrackLayout, itineraries: Vec<Option<Itinerary>>) -> ControlResult<Self> {
        let mut station_count = vec![0; layout.stations as usize];
        for itinerary in itineraries.iter().flatten() {
            for position in itinerary.positions() {
                layout.check(*position)?;
            }
            if let Position::Station(id) = itinerary.start() {
                station_count[id as usize - 1] += 1;
            }
        }
        Ok(Self {
            layout,
            segment_occupied: vec![false; layout.segments as usize],
            station_count,
            itineraries,
        })
    }

    /// Seed from the `~`-joined itinerary broadcast.
    pub fn from_broadcast(layout: TrackLayout, message: &str) -> ControlResult<Self> {
        Self::new(layout, Itinerary::parse_broadcast(message)?)
    }

    /// Believed occupancy of `segment`.
    pub fn is_occupied(&self, segment: u32) -> bool {
        slot(segment)
            .and_then(|index| self.segment_occupied.get(index))
            .copied()
            .unwrap_or(false)
    }

    /// Trains believed to stand in `station`.
    pub fn station_count(&self, station: u32) -> i32 {
        slot(station)
            .and_then(|index| self.station_count.get(index))
            .copied()
            .unwrap_or(0)
    }

    /// Itinerary assigned to `train`, if any.
    pub fn itinerary(&self, train: u32) -> Option<&Itinerary> {
        self.itineraries.get(slot(train)?).and_then(Option::as_ref)
    }

    /// Whether `(current, next)` is a hop of the train's assigned itinerary.
    pub fn follows_itinerary(&self, request: &AuthorizationRequest) -> bool {
        self.itinerary(request.train).is_some_and(|itinerary| {
            itinerary
                .hops()
                .any(|hop| hop == (request.current, request.next))
        })
    }

    /// Evaluate the grant rule. Reads segment cells but changes nothing.
    pub fn decide(
        &self,
        request: &AuthorizationRequest,
        store: &SegmentStore,
    ) -> ControlResult<Decision> {
        let current = self.layout.check(request.current)?;
        let next = self.layout.check(request.next)?;

        Ok(Decision {
            next_available: next.segment().map_or(true, |id| !self.is_occupied(id)),
            next_consistent: self.consistent(next, store)?,
            current_consistent: self.consistent(current, store)?,
        })
    }

    /// Record a granted move. Returns the station id when the train arrived
    /// at a station.
    pub fn apply(&mut self, request: &AuthorizationRequest) -> ControlResult<Option<u32>> {
        let current = self.layout.check(request.current)?;
        let next = self.layout.check(request.next)?;

        let reached = match next {
            Position::Station(id) => {
                self.station_count[id as usize - 1] += 1;
                Some(id)
            }
            Position::Segment(id) => {
                self.segment_occupied[id as usize - 1] = true;
                None
            }
        };
        match current {
            Position::Station(id) => {
                let count = &mut self.station_count[id as usize - 1];
                if *count == 0 {
                    warn!(station = id, train = request.train, "Departure from a station counted empty");
                }
                *count -= 1;
            }
            Position::Segment(id) => self.segment_occupied[id as usize - 1] = false,
        }
        Ok(reached)
    }

    fn consistent(&self, position: Position, store: &SegmentStore) -> ControlResult<bool> {
        match position.segment() {
            None => Ok(true),
            Some(id) => Ok(store.is_free(id)? == !self.is_occupied(id)),
        }
    }
}

fn slot(id: u32) -> Option<usize> {
    (id as usize).checked_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const BROADCAST: &str = "S1-MA1-MA2-MA3-MA8-S6~S2-MA5-MA6-MA7-MA3-MA8-S6~--";

    fn seeded(broadcast: &str) -> ControlResult<AuthorityState> {
        AuthorityState::from_broadcast(TrackLayout::default(), broadcast)
    }

    fn request(payload: &str) -> AuthorizationRequest {
        AuthorizationRequest::decode(payload.as_bytes()).expect("valid request")
    }

    fn store_with_cells() -> anyhow::Result<(tempfile::TempDir, SegmentStore)> {
        let dir = tempdir()?;
        let store = SegmentStore::new(dir.path());
        for id in TrackLayout::default().segment_ids() {
            store.initialize(id)?;
        }
        Ok((dir, store))
    }

    #[test]
    fn seeds_station_counts_from_itinerary_starts() -> ControlResult<()> {
        let state = seeded(BROADCAST)?;
        assert_eq!(state.station_count(1), 1);
        assert_eq!(state.station_count(2), 1);
        assert_eq!(state.station_count(6), 0);
        assert!(state.itinerary(3).is_none());
        assert!(!state.is_occupied(1));
        Ok(())
    }

    #[test]
    fn rejects_positions_outside_the_layout() {
        assert!(seeded("S9-MA1-S1").is_err());
        assert!(seeded("S1-MA17-S2").is_err());
    }

    #[test]
    fn contested_segment_is_granted_once_then_released() -> anyhow::Result<()> {
        let (_dir, store) = store_with_cells()?;
        let mut state = seeded(BROADCAST)?;

        let first = request("3~S1~MA1");
        let decision = state.decide(&first, &store)?;
        assert!(decision.granted());
        assert_eq!(state.apply(&first)?, None);
        assert!(state.is_occupied(1));
        assert_eq!(state.station_count(1), 0);
        // The train takes the segment after being granted.
        store.set_occupied(1, true)?;

        let rival = request("4~S2~MA1");
        let decision = state.decide(&rival, &store)?;
        assert!(!decision.next_available);
        assert!(!decision.granted());

        let onward = request("3~MA1~MA2");
        assert!(state.decide(&onward, &store)?.granted());
        state.apply(&onward)?;
        store.set_occupied(2, true)?;
        store.set_occupied(1, false)?;
        assert!(!state.is_occupied(1));
        assert!(state.is_occupied(2));

        assert!(state.decide(&rival, &store)?.granted());
        Ok(())
    }

    #[test]
    fn disagreement_with_cells_denies() -> anyhow::Result<()> {
        let (_dir, store) = store_with_cells()?;
        let state = seeded(BROADCAST)?;

        // Cell says occupied while the authority believes it free.
        store.set_occupied(5, true)?;
        let decision = state.decide(&request("2~S2~MA5"), &store)?;
        assert!(decision.next_available);
        assert!(!decision.next_consistent);
        assert!(!decision.granted());

        let decision = state.decide(&request("1~MA5~MA6"), &store)?;
        assert!(!decision.current_consistent);
        assert!(!decision.granted());
        Ok(())
    }

    #[test]
    fn decisions_are_repeatable() -> anyhow::Result<()> {
        let (_dir, store) = store_with_cells()?;
        let state = seeded(BROADCAST)?;
        let probe = request("1~S1~MA1");
        let first = state.decide(&probe, &store)?;
        for _ in 0..5 {
            assert_eq!(state.decide(&probe, &store)?, first);
        }
        Ok(())
    }

    #[test]
    fn arriving_at_a_station_is_reported() -> anyhow::Result<()> {
        let (_dir, store) = store_with_cells()?;
        let mut state = seeded(BROADCAST)?;
        store.set_occupied(8, true)?;
        state.segment_occupied[7] = true;

        let arrival = request("1~MA8~S6");
        assert!(state.follows_itinerary(&arrival));
        assert!(state.decide(&arrival, &store)?.granted());
        assert_eq!(state.apply(&arrival)?, Some(6));
        assert_eq!(state.station_count(6), 1);
        assert!(!state.is_occupied(8));
        Ok(())
    }

    #[test]
    fn station_hops_skip_cell_checks() -> anyhow::Result<()> {
        let dir = tempdir()?;
        // No cells exist: a station-to-station hop never reads them.
        let store = SegmentStore::new(dir.path());
        let state = seeded("S1-S2")?;
        assert!(state.decide(&request("1~S1~S2"), &store)?.granted());
        assert!(state.decide(&request("1~S1~MA1"), &store).is_err());
        Ok(())
    }
}
