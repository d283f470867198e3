//! Track positions and train itineraries.

use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ControlError, ControlResult};

/// Wire sentinel for "no position": an absent itinerary or the hop after the
/// final station.
pub const NO_POSITION: &str = "--";

static POSITION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(S|MA)([0-9]+)$").expect("invalid position regex"));

/// A place a train can be: a station or a track segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Position {
    /// Station `S<id>`; any number of trains may stand in it.
    Station(u32),
    /// Segment `MA<id>`; at most one train at a time.
    Segment(u32),
}

impl Position {
    /// Numeric id, 1-based.
    pub fn id(self) -> u32 {
        match self {
            Self::Station(id) | Self::Segment(id) => id,
        }
    }

    /// Whether this is a station.
    pub fn is_station(self) -> bool {
        matches!(self, Self::Station(_))
    }

    /// Segment id, or `None` for a station.
    pub fn segment(self) -> Option<u32> {
        match self {
            Self::Segment(id) => Some(id),
            Self::Station(_) => None,
        }
    }
}

impl FromStr for Position {
    type Err = ControlError;

    fn from_str(input: &str) -> ControlResult<Self> {
        let caps = POSITION_RE
            .captures(input)
            .ok_or_else(|| ControlError::parse("position", input))?;
        let id = caps[2]
            .parse::<u32>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| ControlError::parse("position", input))?;
        Ok(match &caps[1] {
            "S" => Self::Station(id),
            _ => Self::Segment(id),
        })
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Station(id) => write!(f, "S{id}"),
            Self::Segment(id) => write!(f, "MA{id}"),
        }
    }
}

/// Ordered, immutable path of one train. Starts and ends at a station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Itinerary {
    positions: Vec<Position>,
}

impl Itinerary {
    /// Build from positions, rejecting empty paths and non-station endpoints.
    pub fn new(positions: Vec<Position>) -> ControlResult<Self> {
        match (positions.first(), positions.last()) {
            (Some(first), Some(last)) if first.is_station() && last.is_station() => {
                Ok(Self { positions })
            }
            _ => Err(ControlError::parse(
                "itinerary",
                positions
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("-"),
            )),
        }
    }

    /// Decode a per-train itinerary message. The sentinel `--` yields `None`.
    pub fn parse_message(message: &str) -> ControlResult<Option<Self>> {
        let message = message.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        if message == NO_POSITION {
            return Ok(None);
        }
        let positions = message
            .split('-')
            .map(str::parse)
            .collect::<ControlResult<Vec<Position>>>()
            .map_err(|_| ControlError::parse("itinerary", message))?;
        Self::new(positions).map(Some)
    }

    /// Decode the `~`-joined broadcast of every train's itinerary, in train
    /// order.
    pub fn parse_broadcast(message: &str) -> ControlResult<Vec<Option<Self>>> {
        let message = message.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        message.split('~').map(Self::parse_message).collect()
    }

    /// Every position, start to end.
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Starting station.
    pub fn start(&self) -> Position {
        self.positions[0]
    }

    /// Consecutive `(current, next)` pairs in travel order.
    pub fn hops(&self) -> impl Iterator<Item = (Position, Position)> + '_ {
        self.positions.windows(2).map(|pair| (pair[0], pair[1]))
    }
}

impl fmt::Display for Itinerary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, position) in self.positions.iter().enumerate() {
            if index > 0 {
                f.write_str("-")?;
            }
            write!(f, "{position}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positions() {
        assert_eq!("S1".parse::<Position>().ok(), Some(Position::Station(1)));
        assert_eq!("MA16".parse::<Position>().ok(), Some(Position::Segment(16)));
        for bad in ["", "S", "MA", "S0", "X3", "ma1", "S1 ", "MA-1", "S1MA2"] {
            assert!(bad.parse::<Position>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn itinerary_message_yields_hops_in_order() -> ControlResult<()> {
        let itinerary = Itinerary::parse_message("S1-MA1-MA2-MA3-MA8-S6\0")?
            .expect("itinerary expected");
        assert_eq!(itinerary.start(), Position::Station(1));
        assert_eq!(itinerary.to_string(), "S1-MA1-MA2-MA3-MA8-S6");

        let hops: Vec<String> = itinerary
            .hops()
            .map(|(curr, next)| format!("{curr}>{next}"))
            .collect();
        assert_eq!(
            hops,
            ["S1>MA1", "MA1>MA2", "MA2>MA3", "MA3>MA8", "MA8>S6"]
        );
        Ok(())
    }

    #[test]
    fn sentinel_means_no_itinerary() -> ControlResult<()> {
        assert_eq!(Itinerary::parse_message(NO_POSITION)?, None);
        Ok(())
    }

    #[test]
    fn rejects_malformed_itineraries() {
        assert!(Itinerary::parse_message("MA1-MA2-S3").is_err());
        assert!(Itinerary::parse_message("S1-MA2").is_err());
        assert!(Itinerary::parse_message("S1--S2").is_err());
        assert!(Itinerary::parse_message("").is_err());
    }

    #[test]
    fn broadcast_keeps_train_order() -> ControlResult<()> {
        let all = Itinerary::parse_broadcast("S1-MA1-S2~--~S4-MA14-S8")?;
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].as_ref().map(Itinerary::start), Some(Position::Station(1)));
        assert!(all[1].is_none());
        assert_eq!(all[2].as_ref().map(Itinerary::start), Some(Position::Station(4)));
        Ok(())
    }
}
