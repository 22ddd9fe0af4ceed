//! Team events - what observers are told when team state changes.

use std::sync::Arc;

use crate::id::{MemberId, ObjectiveKey};
use crate::record::ProgressRecord;

/// Something that happened to a cached team.
#[derive(Debug, Clone)]
pub enum TeamEvent {
    /// A record entered the cache
    TeamLoaded {
        /// The new record
        team: Arc<ProgressRecord>,
    },

    /// A record left the cache; it is already invalid when delivered
    TeamUnloaded {
        /// The evicted record
        team: Arc<ProgressRecord>,
    },

    /// The backend saw this member for the first time
    MemberRegistered {
        /// The member's (new) team
        team: Arc<ProgressRecord>,
        /// The new member
        member: MemberId,
    },

    /// Progress of an objective changed
    ProgressChanged {
        /// Team whose progress changed
        team: Arc<ProgressRecord>,
        /// Objective that changed
        objective: ObjectiveKey,
        /// Value before
        old: u32,
        /// Value after
        new: u32,
    },

    /// A member joined a team
    MemberJoined {
        /// Team joined
        team: Arc<ProgressRecord>,
        /// Member
        member: MemberId,
    },

    /// A member left a team
    MemberLeft {
        /// Team left
        team: Arc<ProgressRecord>,
        /// Member
        member: MemberId,
    },

    /// An objective was completed while `member` was online to receive it
    ObjectiveGranted {
        /// Team that completed the objective
        team: Arc<ProgressRecord>,
        /// Completed objective
        objective: ObjectiveKey,
        /// Online member the grant is applied through
        member: MemberId,
        /// Whether rewards should be handed out
        give_rewards: bool,
    },
}

impl TeamEvent {
    /// The team the event is about.
    pub fn team(&self) -> &Arc<ProgressRecord> {
        match self {
            TeamEvent::TeamLoaded { team }
            | TeamEvent::TeamUnloaded { team }
            | TeamEvent::MemberRegistered { team, .. }
            | TeamEvent::ProgressChanged { team, .. }
            | TeamEvent::MemberJoined { team, .. }
            | TeamEvent::MemberLeft { team, .. }
            | TeamEvent::ObjectiveGranted { team, .. } => team,
        }
    }

    /// Short name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            TeamEvent::TeamLoaded { .. } => "team_loaded",
            TeamEvent::TeamUnloaded { .. } => "team_unloaded",
            TeamEvent::MemberRegistered { .. } => "member_registered",
            TeamEvent::ProgressChanged { .. } => "progress_changed",
            TeamEvent::MemberJoined { .. } => "member_joined",
            TeamEvent::MemberLeft { .. } => "member_left",
            TeamEvent::ObjectiveGranted { .. } => "objective_granted",
        }
    }
}

/// Receives team events.
///
/// Observers run synchronously, in registration order, on the task that
/// caused the event. They may call back into the engine.
pub trait Observer: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &TeamEvent);
}

impl<F> Observer for F
where
    F: Fn(&TeamEvent) + Send + Sync,
{
    fn on_event(&self, event: &TeamEvent) {
        self(event)
    }
}
