//! Revision status and checkout state shared by everything that iterates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::Denial;

/// Common trait for entities that follow the checkout/checkin discipline
pub trait Iterated {
    /// Display key used in errors and logs
    fn display_key(&self) -> String;

    /// Current lock state
    fn checkout(&self) -> &CheckoutState;

    /// Number of the trailing iteration, 0 when there is none
    fn last_iteration_number(&self) -> u32;

    /// Whether the trailing iteration has been checked in
    fn last_iteration_checked_in(&self) -> bool;

    /// Fail unless `user` holds the checkout
    fn require_holder(&self, user: &str) -> Result<(), Denial> {
        self.checkout().release(user).map(|_| ())
    }
}

/// Revision lifecycle status. Moves only forward: WIP → RELEASED → OBSOLETE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum RevisionStatus {
    #[default]
    Wip,
    Released,
    Obsolete,
}

impl std::fmt::Display for RevisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevisionStatus::Wip => write!(f, "wip"),
            RevisionStatus::Released => write!(f, "released"),
            RevisionStatus::Obsolete => write!(f, "obsolete"),
        }
    }
}

impl std::str::FromStr for RevisionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wip" => Ok(RevisionStatus::Wip),
            "released" => Ok(RevisionStatus::Released),
            "obsolete" => Ok(RevisionStatus::Obsolete),
            _ => Err(format!(
                "Invalid revision status: {}. Use wip, released, or obsolete",
                s
            )),
        }
    }
}

/// Exclusive edit lock on a revision or product instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
#[derive(Default)]
pub enum CheckoutState {
    #[default]
    Free,
    CheckedOut {
        holder: String,
        since: DateTime<Utc>,
    },
}

impl CheckoutState {
    /// Build the state from the nullable holder/date columns of a row
    pub fn from_columns(holder: Option<String>, since: Option<DateTime<Utc>>) -> Self {
        match (holder, since) {
            (Some(holder), Some(since)) => CheckoutState::CheckedOut { holder, since },
            (Some(holder), None) => CheckoutState::CheckedOut {
                holder,
                since: DateTime::<Utc>::default(),
            },
            _ => CheckoutState::Free,
        }
    }

    /// Take the lock for `user`
    pub fn acquire(&self, user: &str, now: DateTime<Utc>) -> Result<CheckoutState, Denial> {
        match self {
            CheckoutState::Free => Ok(CheckoutState::CheckedOut {
                holder: user.to_string(),
                since: now,
            }),
            CheckoutState::CheckedOut { holder, .. } => Err(Denial::AlreadyCheckedOut {
                holder: holder.clone(),
            }),
        }
    }

    /// Give the lock back; only its holder may do so
    pub fn release(&self, user: &str) -> Result<CheckoutState, Denial> {
        match self {
            CheckoutState::Free => Err(Denial::NotCheckedOut),
            CheckoutState::CheckedOut { holder, .. } if holder == user => Ok(CheckoutState::Free),
            CheckoutState::CheckedOut { holder, .. } => Err(Denial::CheckedOutByOther {
                holder: holder.clone(),
            }),
        }
    }

    pub fn holder(&self) -> Option<&str> {
        match self {
            CheckoutState::Free => None,
            CheckoutState::CheckedOut { holder, .. } => Some(holder),
        }
    }

    pub fn since(&self) -> Option<DateTime<Utc>> {
        match self {
            CheckoutState::Free => None,
            CheckoutState::CheckedOut { since, .. } => Some(*since),
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, CheckoutState::Free)
    }

    pub fn is_held_by(&self, user: &str) -> bool {
        self.holder() == Some(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let now = Utc::now();
        let free = CheckoutState::Free;

        let held = free.acquire("alice", now).unwrap();
        assert!(held.is_held_by("alice"));
        assert_eq!(held.since(), Some(now));

        assert_eq!(
            held.acquire("bob", now),
            Err(Denial::AlreadyCheckedOut {
                holder: "alice".to_string()
            })
        );
        assert_eq!(
            held.release("bob"),
            Err(Denial::CheckedOutByOther {
                holder: "alice".to_string()
            })
        );
        assert_eq!(held.release("alice"), Ok(CheckoutState::Free));
        assert_eq!(free.release("alice"), Err(Denial::NotCheckedOut));
    }

    #[test]
    fn test_from_columns() {
        assert!(CheckoutState::from_columns(None, None).is_free());
        assert!(CheckoutState::from_columns(None, Some(Utc::now())).is_free());
        assert_eq!(
            CheckoutState::from_columns(Some("bob".into()), None).holder(),
            Some("bob")
        );
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("WIP".parse::<RevisionStatus>().unwrap(), RevisionStatus::Wip);
        assert_eq!(
            "released".parse::<RevisionStatus>().unwrap(),
            RevisionStatus::Released
        );
        assert!("draft".parse::<RevisionStatus>().is_err());
        assert_eq!(RevisionStatus::Obsolete.to_string(), "obsolete");
    }
}
