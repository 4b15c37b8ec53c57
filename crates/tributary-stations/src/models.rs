use serde::{Deserialize, Serialize};
use std::fmt;

/// A station row as ingested from the stations topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub stop_id: i32,
    pub direction_id: String,
    pub stop_name: String,
    pub station_name: String,
    pub station_descriptive_name: String,
    pub station_id: i32,
    pub order: i32,
    pub red: bool,
    pub blue: bool,
    pub green: bool,
}

/// The reduced record published downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformedStation {
    pub station_id: i32,
    pub station_name: String,
    pub order: i32,
    pub line: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    Red,
    Blue,
    Green,
}

impl Line {
    /// First flag set wins, checked red, blue, green.
    pub fn from_flags(red: bool, blue: bool, green: bool) -> Option<Self> {
        if red {
            Some(Line::Red)
        } else if blue {
            Some(Line::Blue)
        } else if green {
            Some(Line::Green)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Line::Red => "red",
            Line::Blue => "blue",
            Line::Green => "green",
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Station {
    pub fn line(&self) -> Option<Line> {
        Line::from_flags(self.red, self.blue, self.green)
    }
}

impl From<&Station> for TransformedStation {
    fn from(station: &Station) -> Self {
        Self {
            station_id: station.station_id,
            station_name: station.station_name.clone(),
            order: station.order,
            line: station.line().map(|l| l.as_str()).unwrap_or_default().to_string(),
        }
    }
}
