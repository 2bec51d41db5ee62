//! Conflict publication loop.
//!
//! Pushes the conflict snapshot to stream clients whenever a write
//! changes it, and on a fixed interval re-announces any unacknowledged
//! conflicts so late joiners and missed messages catch up.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::state::AppState;
use convoy_core::{ConflictRecord, ConvoyEvent};

pub async fn run_conflict_loop(state: Arc<AppState>) {
    let period = Duration::from_secs(state.config().conflict_interval_secs);
    let mut ticker = interval(period);
    let mut last_published: Vec<ConflictRecord> = Vec::new();

    loop {
        let periodic = tokio::select! {
            _ = ticker.tick() => true,
            _ = state.conflicts_changed() => false,
        };

        let conflicts = state.conflicts();
        if !periodic && conflicts == last_published {
            continue;
        }

        let open: Vec<&ConflictRecord> = conflicts.iter().filter(|c| !c.acknowledged).collect();
        if periodic && open.is_empty() {
            continue;
        }

        if !open.is_empty() {
            tracing::warn!("{} open conflict(s)", open.len());
            for conflict in &open {
                tracing::warn!(
                    "  [{:?}] {} on {} (risk {:.1}, {:.2} h overlap)",
                    conflict.severity,
                    conflict.convoy_ids.join(" <-> "),
                    conflict.segment_ids.join(", "),
                    conflict.combined_risk_score,
                    conflict.overlap_hours
                );
            }
        }

        state.publish(ConvoyEvent::ConflictDetected {
            conflicts: conflicts.clone(),
        });
        last_published = conflicts;
    }
}
