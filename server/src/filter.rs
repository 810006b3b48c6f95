//! Broadcast filters.
//!
//! A filter decides, for one recipient and the (optional) origin of a
//! broadcast, whether the recipient gets a copy. Filters compose with
//! [`BroadcastFilter::and`].

use std::sync::Arc;

use fsd_shared::{Rating, ALL_ATC, ALL_CLIENTS, ALL_PILOTS, ALL_SUPERVISORS};

use crate::client::{Client, Visibility};

/// Wire broadcast destinations `*`, `*A`, `*P` and `*S`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastTarget {
    AllClients,
    AllAtc,
    AllPilots,
    AllSupervisors,
}

impl BroadcastTarget {
    pub fn from_wire(to: &str) -> Option<Self> {
        match to {
            ALL_CLIENTS => Some(BroadcastTarget::AllClients),
            ALL_ATC => Some(BroadcastTarget::AllAtc),
            ALL_PILOTS => Some(BroadcastTarget::AllPilots),
            ALL_SUPERVISORS => Some(BroadcastTarget::AllSupervisors),
            _ => None,
        }
    }

    pub fn to_wire(self) -> &'static str {
        match self {
            BroadcastTarget::AllClients => ALL_CLIENTS,
            BroadcastTarget::AllAtc => ALL_ATC,
            BroadcastTarget::AllPilots => ALL_PILOTS,
            BroadcastTarget::AllSupervisors => ALL_SUPERVISORS,
        }
    }

    pub fn filter(self) -> BroadcastFilter {
        match self {
            BroadcastTarget::AllClients => BroadcastFilter::All,
            BroadcastTarget::AllAtc => BroadcastFilter::AtcOnly,
            BroadcastTarget::AllPilots => BroadcastFilter::PilotsOnly,
            BroadcastTarget::AllSupervisors => BroadcastFilter::Supervisors,
        }
    }
}

type Predicate = dyn Fn(&Client, Option<&Client>) -> bool + Send + Sync;

#[derive(Clone)]
pub enum BroadcastFilter {
    All,
    AtcOnly,
    PilotsOnly,
    /// Recipients rated Supervisor or above
    Supervisors,
    InRange,
    And(Box<BroadcastFilter>, Box<BroadcastFilter>),
    Custom(Arc<Predicate>),
}

impl BroadcastFilter {
    pub fn and(self, other: BroadcastFilter) -> BroadcastFilter {
        BroadcastFilter::And(Box::new(self), Box::new(other))
    }

    pub fn custom<F>(predicate: F) -> BroadcastFilter
    where
        F: Fn(&Client, Option<&Client>) -> bool + Send + Sync + 'static,
    {
        BroadcastFilter::Custom(Arc::new(predicate))
    }

    pub fn atc_in_range() -> BroadcastFilter {
        BroadcastFilter::AtcOnly.and(BroadcastFilter::InRange)
    }

    pub fn matches(&self, recipient: &Client, origin: Option<&Client>) -> bool {
        match self {
            BroadcastFilter::All => true,
            BroadcastFilter::AtcOnly => recipient.is_atc(),
            BroadcastFilter::PilotsOnly => !recipient.is_atc(),
            BroadcastFilter::Supervisors => recipient.rating() >= Rating::Supervisor,
            BroadcastFilter::InRange => match origin {
                Some(origin) => in_range(&recipient.visibility(), &origin.visibility()),
                None => true,
            },
            BroadcastFilter::And(a, b) => a.matches(recipient, origin) && b.matches(recipient, origin),
            BroadcastFilter::Custom(predicate) => predicate(recipient, origin),
        }
    }
}

impl std::fmt::Debug for BroadcastFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BroadcastFilter::All => write!(f, "All"),
            BroadcastFilter::AtcOnly => write!(f, "AtcOnly"),
            BroadcastFilter::PilotsOnly => write!(f, "PilotsOnly"),
            BroadcastFilter::Supervisors => write!(f, "Supervisors"),
            BroadcastFilter::InRange => write!(f, "InRange"),
            BroadcastFilter::And(a, b) => write!(f, "And({:?}, {:?})", a, b),
            BroadcastFilter::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Distance threshold between two clients:
/// both ATC → the larger range, one ATC → that side's range,
/// two pilots → the sum of both ranges.
pub fn range_threshold(recipient: &Visibility, origin: &Visibility) -> f64 {
    match (recipient.is_atc, origin.is_atc) {
        (true, true) => recipient.visual_range.max(origin.visual_range),
        (true, false) => recipient.visual_range,
        (false, true) => origin.visual_range,
        (false, false) => recipient.visual_range + origin.visual_range,
    }
}

pub fn in_range(recipient: &Visibility, origin: &Visibility) -> bool {
    match recipient.points.min_distance_nm(&origin.points) {
        Some(distance) => distance <= range_threshold(recipient, origin),
        None => false,
    }
}
