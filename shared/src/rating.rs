//! Ratings, facilities and the table that ties them together.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Authorisation level of a user, ordered by integer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Rating {
    Ban = -1,
    Normal = 0,
    Observer = 1,
    Student1 = 2,
    Student2 = 3,
    Student3 = 4,
    Controller1 = 5,
    Controller2 = 6,
    Controller3 = 7,
    Instructor1 = 8,
    Instructor2 = 9,
    Instructor3 = 10,
    Supervisor = 11,
    Administrator = 12,
}

impl Rating {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Facilities a user holding this rating may occupy
    pub fn allowed_facilities(self) -> Facility {
        let student1 = Facility::PILOT | Facility::OBS | Facility::DEL | Facility::GND | Facility::RMP;
        match self {
            Rating::Ban => Facility::NONE,
            Rating::Normal => Facility::PILOT,
            Rating::Observer => Facility::PILOT | Facility::OBS,
            Rating::Student1 => student1,
            Rating::Student2 => student1 | Facility::TWR,
            Rating::Student3 => student1 | Facility::TWR | Facility::APP,
            Rating::Controller1 | Rating::Controller2 => {
                student1 | Facility::TWR | Facility::APP | Facility::CTR
            }
            Rating::Controller3
            | Rating::Instructor1
            | Rating::Instructor2
            | Rating::Instructor3 => {
                student1 | Facility::TWR | Facility::APP | Facility::CTR | Facility::FSS
            }
            Rating::Supervisor => {
                student1
                    | Facility::TWR
                    | Facility::APP
                    | Facility::CTR
                    | Facility::FSS
                    | Facility::SUP
            }
            Rating::Administrator => Facility::ALL,
        }
    }

    pub fn permits(self, facility: Facility) -> bool {
        !facility.is_empty() && self.allowed_facilities().contains(facility)
    }
}

impl TryFrom<i32> for Rating {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        let rating = match value {
            -1 => Rating::Ban,
            0 => Rating::Normal,
            1 => Rating::Observer,
            2 => Rating::Student1,
            3 => Rating::Student2,
            4 => Rating::Student3,
            5 => Rating::Controller1,
            6 => Rating::Controller2,
            7 => Rating::Controller3,
            8 => Rating::Instructor1,
            9 => Rating::Instructor2,
            10 => Rating::Instructor3,
            11 => Rating::Supervisor,
            12 => Rating::Administrator,
            other => return Err(format!("rating {} out of range", other)),
        };
        Ok(rating)
    }
}

impl From<Rating> for i32 {
    fn from(rating: Rating) -> Self {
        rating as i32
    }
}

/// Bitset of facility kinds. A client occupies exactly one bit at a time;
/// unions are used for permission tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Facility(u16);

impl Facility {
    pub const NONE: Facility = Facility(0);
    pub const PILOT: Facility = Facility(1 << 0);
    pub const OBS: Facility = Facility(1 << 1);
    pub const DEL: Facility = Facility(1 << 2);
    pub const GND: Facility = Facility(1 << 3);
    pub const RMP: Facility = Facility(1 << 4);
    pub const TWR: Facility = Facility(1 << 5);
    pub const APP: Facility = Facility(1 << 6);
    pub const CTR: Facility = Facility(1 << 7);
    pub const FSS: Facility = Facility(1 << 8);
    pub const SUP: Facility = Facility(1 << 9);
    pub const ADM: Facility = Facility(1 << 10);
    pub const ALL: Facility = Facility((1 << 11) - 1);

    /// Facilities that actually control traffic (may track and amend plans)
    pub const CONTROLLING: Facility = Facility(
        Self::DEL.0 | Self::GND.0 | Self::TWR.0 | Self::APP.0 | Self::CTR.0 | Self::FSS.0,
    );

    const NAMES: [&'static str; 11] = [
        "PILOT", "OBS", "DEL", "GND", "RMP", "TWR", "APP", "CTR", "FSS", "SUP", "ADM",
    ];

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Facility) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Facility) -> bool {
        self.0 & other.0 != 0
    }

    /// Builds a single facility from its wire index (log2 of the bit)
    pub fn from_index(index: u32) -> Option<Facility> {
        if index < Self::NAMES.len() as u32 {
            Some(Facility(1 << index))
        } else {
            None
        }
    }

    /// Wire index of a single facility
    pub fn index(self) -> Option<u32> {
        if self.0.count_ones() == 1 {
            Some(self.0.trailing_zeros())
        } else {
            None
        }
    }

    /// Short name of a single facility ("CTR", "TWR", ...)
    pub fn name(self) -> &'static str {
        self.index()
            .map(|i| Self::NAMES[i as usize])
            .unwrap_or("UNKNOWN")
    }

    /// Facility claimed by a callsign suffix, e.g. `ZSHA_CTR` claims CTR.
    pub fn from_callsign(callsign: &str, is_atc: bool) -> Facility {
        if !is_atc {
            return Facility::PILOT;
        }
        let suffix = match callsign.rsplit_once('_') {
            Some((_, suffix)) => suffix,
            None => return Facility::OBS,
        };
        match suffix.to_ascii_uppercase().as_str() {
            "DEL" => Facility::DEL,
            "GND" => Facility::GND,
            "RMP" => Facility::RMP,
            "TWR" => Facility::TWR,
            "APP" | "DEP" => Facility::APP,
            "CTR" => Facility::CTR,
            "FSS" => Facility::FSS,
            "SUP" => Facility::SUP,
            "ADM" => Facility::ADM,
            _ => Facility::OBS,
        }
    }
}

impl BitOr for Facility {
    type Output = Facility;

    fn bitor(self, rhs: Self) -> Self::Output {
        Facility(self.0 | rhs.0)
    }
}

impl BitOrAssign for Facility {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
