//! Pin bookkeeping - reasons, other than being online, to keep a member cached.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use teamprog_core::{MemberId, Requester};

/// How a pin taken by `load_member` is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFreeingOption {
    /// Released by the engine after the delay
    Automatic(Duration),
    /// Released by the requester via `release_pin`
    Manual,
}

impl CacheFreeingOption {
    /// The kind of pin this option takes.
    pub fn kind(&self) -> PinKind {
        match self {
            CacheFreeingOption::Automatic(_) => PinKind::Automatic,
            CacheFreeingOption::Manual => PinKind::Manual,
        }
    }
}

/// Kind of pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinKind {
    /// Timer driven
    Automatic,
    /// Requester driven
    Manual,
}

impl fmt::Display for PinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinKind::Automatic => write!(f, "automatic"),
            PinKind::Manual => write!(f, "manual"),
        }
    }
}

/// Pin counters of one requester on one member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PinCounts {
    /// Outstanding automatic pins
    pub automatic: u16,
    /// Outstanding manual pins
    pub manual: u16,
}

impl PinCounts {
    /// Whether no pin is outstanding.
    pub fn is_empty(&self) -> bool {
        self.automatic == 0 && self.manual == 0
    }

    fn slot(&mut self, kind: PinKind) -> &mut u16 {
        match kind {
            PinKind::Automatic => &mut self.automatic,
            PinKind::Manual => &mut self.manual,
        }
    }
}

/// `member -> requester -> counters`.
///
/// Entries whose counters are all zero are removed, so a member appears in the
/// table exactly when it is pinned.
#[derive(Debug, Default)]
pub struct PinTable {
    entries: HashMap<MemberId, HashMap<Requester, PinCounts>>,
}

impl PinTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one pin.
    ///
    /// # Panics
    ///
    /// Panics if the counter would exceed `u16::MAX`. That many outstanding
    /// pins from one requester is a leak in the caller.
    pub fn pin(&mut self, member: MemberId, requester: &Requester, kind: PinKind) {
        let counts = self
            .entries
            .entry(member)
            .or_default()
            .entry(requester.clone())
            .or_default();
        let slot = counts.slot(kind);
        *slot = match slot.checked_add(1) {
            Some(n) => n,
            None => panic!("{} pin counter overflow for {} held by {}", kind, member, requester),
        };
    }

    /// Remove one pin. Returns false if there was none to remove.
    pub fn unpin(&mut self, member: MemberId, requester: &Requester, kind: PinKind) -> bool {
        let Some(by_requester) = self.entries.get_mut(&member) else {
            return false;
        };
        let Some(counts) = by_requester.get_mut(requester) else {
            return false;
        };
        let slot = counts.slot(kind);
        if *slot == 0 {
            return false;
        }
        *slot -= 1;

        if counts.is_empty() {
            by_requester.remove(requester);
        }
        if by_requester.is_empty() {
            self.entries.remove(&member);
        }
        true
    }

    /// Whether any requester pins the member.
    pub fn is_pinned(&self, member: MemberId) -> bool {
        self.entries.contains_key(&member)
    }

    /// Counters of one requester on one member.
    pub fn counts(&self, member: MemberId, requester: &Requester) -> PinCounts {
        self.entries
            .get(&member)
            .and_then(|by_requester| by_requester.get(requester))
            .copied()
            .unwrap_or_default()
    }

    /// Number of pinned members.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no member is pinned.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every pin.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
