//! The door/motion status as a closed sum type, plus its ASCII wire form.
//!
//! Kept separate from [`crate::region`] so the rest of the car's logic never
//! compares raw status strings — the ASCII form only exists at the region
//! boundary (spec design note: "avoid hidden string comparisons in the core
//! loop").

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorStatus {
    Closed,
    Opening,
    Open,
    Closing,
    Between,
}

impl DoorStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            DoorStatus::Closed => "Closed",
            DoorStatus::Opening => "Opening",
            DoorStatus::Open => "Open",
            DoorStatus::Closing => "Closing",
            DoorStatus::Between => "Between",
        }
    }
}

impl fmt::Display for DoorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("\"{0}\" is not a legal door status")]
pub struct ParseDoorStatusError(String);

impl FromStr for DoorStatus {
    type Err = ParseDoorStatusError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Closed" => Ok(DoorStatus::Closed),
            "Opening" => Ok(DoorStatus::Opening),
            "Open" => Ok(DoorStatus::Open),
            "Closing" => Ok(DoorStatus::Closing),
            "Between" => Ok(DoorStatus::Between),
            other => Err(ParseDoorStatusError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_variant() {
        for s in [
            DoorStatus::Closed,
            DoorStatus::Opening,
            DoorStatus::Open,
            DoorStatus::Closing,
            DoorStatus::Between,
        ] {
            assert_eq!(s.as_str().parse::<DoorStatus>().unwrap(), s);
        }
    }

    #[test]
    fn rejects_unknown_strings() {
        assert!("closed".parse::<DoorStatus>().is_err());
        assert!("".parse::<DoorStatus>().is_err());
        assert!("Stuck".parse::<DoorStatus>().is_err());
    }
}
