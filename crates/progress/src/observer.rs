//! Built-in observers.

use teamprog_core::{Observer, TeamEvent};
use tracing::{debug, info};

/// Logs every team event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&self, event: &TeamEvent) {
        let team = event.team().team_id();
        match event {
            TeamEvent::TeamLoaded { .. } => debug!(%team, "team loaded"),
            TeamEvent::TeamUnloaded { .. } => debug!(%team, "team unloaded"),
            TeamEvent::MemberRegistered { member, .. } => info!(%team, %member, "member registered"),
            TeamEvent::ProgressChanged { objective, old, new, .. } => {
                debug!(%team, %objective, old, new, "progress changed")
            }
            TeamEvent::MemberJoined { member, .. } => info!(%team, %member, "member joined"),
            TeamEvent::MemberLeft { member, .. } => info!(%team, %member, "member left"),
            TeamEvent::ObjectiveGranted { objective, member, give_rewards, .. } => {
                info!(%team, %objective, %member, give_rewards, "objective granted")
            }
        }
    }
}
