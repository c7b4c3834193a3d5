pub mod config;
pub mod install;
pub mod logs;
pub mod run;
pub mod status;

use std::sync::Arc;

use itpd_core::{StateChange, Supervisor};
use tokio::sync::mpsc;

/// Forward every state change of `supervisor` into a channel
fn state_changes(supervisor: &Supervisor) -> mpsc::UnboundedReceiver<StateChange> {
    let (tx, rx) = mpsc::unbounded_channel();
    supervisor.add_state_observer(Arc::new(move |change: &StateChange| {
        let _ = tx.send(change.clone());
    }));
    rx
}
