//! Track layout and the built-in itinerary maps.

use crate::{
    error::{ControlError, ControlResult},
    models::Position,
};

/// Number of stations on the track graph.
pub const STATIONS: u32 = 8;
/// Number of segments on the track graph.
pub const SEGMENTS: u32 = 16;
/// Number of trains in every map.
pub const TRAINS: u32 = 5;

/// Dimensions of the track graph positions are validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackLayout {
    /// Highest valid station id.
    pub stations: u32,
    /// Highest valid segment id.
    pub segments: u32,
}

impl Default for TrackLayout {
    fn default() -> Self {
        Self {
            stations: STATIONS,
            segments: SEGMENTS,
        }
    }
}

impl TrackLayout {
    /// Reject positions whose id falls outside the layout.
    pub fn check(&self, position: Position) -> ControlResult<Position> {
        let limit = match position {
            Position::Station(_) => self.stations,
            Position::Segment(_) => self.segments,
        };
        if (1..=limit).contains(&position.id()) {
            Ok(position)
        } else {
            Err(ControlError::parse("position", position.to_string()))
        }
    }

    /// Every segment id, in order.
    pub fn segment_ids(&self) -> impl Iterator<Item = u32> {
        1..=self.segments
    }
}

/// One train's route as stored in a map: start station, `-`-joined segment
/// path, end station. An all-empty route means the train stays put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Start station token.
    pub start: &'static str,
    /// `-`-joined segment tokens.
    pub path: &'static str,
    /// End station token.
    pub end: &'static str,
}

impl Route {
    const EMPTY: Self = Self {
        start: "",
        path: "",
        end: "",
    };

    const fn new(start: &'static str, path: &'static str, end: &'static str) -> Self {
        Self { start, path, end }
    }

    /// Itinerary message for this route. The empty route renders as the
    /// no-itinerary sentinel.
    pub fn message(&self) -> String {
        format!("{}-{}-{}", self.start, self.path, self.end)
    }
}

/// A full assignment of routes, indexed by train id minus one.
pub type RailMap = [Route; TRAINS as usize];

const MAPS: [RailMap; 2] = [
    [
        Route::new("S1", "MA1-MA2-MA3-MA8", "S6"),
        Route::new("S2", "MA5-MA6-MA7-MA3-MA8", "S6"),
        Route::new("S7", "MA13-MA12-MA11-MA10-MA9", "S3"),
        Route::new("S4", "MA14-MA15-MA16-MA12", "S8"),
        Route::EMPTY,
    ],
    [
        Route::new("S2", "MA5-MA6-MA7-MA3-MA8", "S6"),
        Route::new("S3", "MA9-MA10-MA11-MA12", "S8"),
        Route::new("S4", "MA14-MA15-MA16-MA12", "S8"),
        Route::new("S6", "MA8-MA3-MA2-MA1", "S1"),
        Route::new("S5", "MA4-MA3-MA2-MA1", "S1"),
    ],
];

/// Number of built-in maps.
pub fn map_count() -> u32 {
    MAPS.len() as u32
}

/// Built-in map by 1-based number.
pub fn rail_map(number: u32) -> ControlResult<&'static RailMap> {
    number
        .checked_sub(1)
        .and_then(|index| MAPS.get(index as usize))
        .ok_or_else(|| {
            ControlError::Configuration(format!(
                "map {number} does not exist (expected 1..={})",
                map_count()
            ))
        })
}
