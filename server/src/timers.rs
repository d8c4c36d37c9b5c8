//! Cancellable scheduled work owned by a single match.

use crate::game::{TimerKind, TimerRequest};
use crate::network::ServerMessage;
use log::debug;
use shared::MatchId;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// At most one pending timer per kind. Arming a kind again replaces the
/// previous one; dropping the set aborts everything still pending.
#[derive(Debug, Default)]
pub struct MatchTimers {
    handles: HashMap<TimerKind, JoinHandle<()>>,
}

impl MatchTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a sleep that reports back to the event loop through `tx`.
    pub fn arm(
        &mut self,
        match_id: MatchId,
        request: TimerRequest,
        tx: &mpsc::UnboundedSender<ServerMessage>,
    ) {
        let tx = tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(request.delay).await;
            // The loop may already be gone during shutdown.
            let _ = tx.send(ServerMessage::TimerFired {
                match_id,
                kind: request.kind,
                round_index: request.round_index,
            });
        });

        if let Some(previous) = self.handles.insert(request.kind, handle) {
            previous.abort();
        }
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(handle) = self.handles.remove(&kind) {
            debug!("Cancelled {:?} timer", kind);
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }

    /// Number of timers that have not completed yet.
    pub fn pending(&self) -> usize {
        self.handles.values().filter(|handle| !handle.is_finished()).count()
    }
}

impl Drop for MatchTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
