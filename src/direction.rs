use std::fmt;

use serde::Serialize;

use crate::zones::ZoneStatus;

/// The advisory recommendation derived from zone occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    Forward,
    Left,
    Right,
    Stop,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Forward,
        Direction::Left,
        Direction::Right,
        Direction::Stop,
    ];

    /// Pick a direction from the occupied bands.
    ///
    /// First match wins: a clear center always means forward, then left, then right.
    pub fn decide(zones: &ZoneStatus) -> Self {
        if !zones.center {
            Direction::Forward
        } else if !zones.left {
            Direction::Left
        } else if !zones.right {
            Direction::Right
        } else {
            Direction::Stop
        }
    }

    /// Human-readable text, used both for the on-screen label and for speech.
    pub fn label(self) -> &'static str {
        match self {
            Direction::Forward => "Move Forward",
            Direction::Left => "Move Left",
            Direction::Right => "Move Right",
            Direction::Stop => "Stop",
        }
    }

    /// Short lowercase key, stable for metrics labels and JSON.
    pub fn key(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Stop => "stop",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decide(left: bool, center: bool, right: bool) -> Direction {
        Direction::decide(&ZoneStatus::new(left, center, right))
    }

    #[test]
    fn clear_center_is_always_forward() {
        assert_eq!(decide(false, false, false), Direction::Forward);
        assert_eq!(decide(true, false, true), Direction::Forward);
        assert_eq!(decide(true, false, false), Direction::Forward);
        assert_eq!(decide(false, false, true), Direction::Forward);
    }

    #[test]
    fn blocked_center_prefers_left_then_right() {
        assert_eq!(decide(false, true, false), Direction::Left);
        assert_eq!(decide(false, true, true), Direction::Left);
        assert_eq!(decide(true, true, false), Direction::Right);
    }

    #[test]
    fn all_blocked_is_stop() {
        assert_eq!(decide(true, true, true), Direction::Stop);
    }

    #[test]
    fn every_zone_status_maps_to_the_priority_order() {
        for bits in 0u8..8 {
            let (l, c, r) = (bits & 1 != 0, bits & 2 != 0, bits & 4 != 0);
            let expected = match (l, c, r) {
                (_, false, _) => Direction::Forward,
                (false, true, _) => Direction::Left,
                (true, true, false) => Direction::Right,
                (true, true, true) => Direction::Stop,
            };
            assert_eq!(decide(l, c, r), expected, "zones {l} {c} {r}");
        }
    }

    #[test]
    fn labels_match_spoken_text() {
        assert_eq!(Direction::Forward.to_string(), "Move Forward");
        assert_eq!(Direction::Stop.label(), "Stop");
        assert_eq!(Direction::Left.key(), "left");
    }
}
