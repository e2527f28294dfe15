use tracing::warn;

use super::*;
use crate::core::config::StageTimeouts;

/// Fail the session if it stays in one stage longer than its configured
/// limit. Each stage entry restarts the clock.
pub(super) async fn run(session: SessionHandle, timeouts: StageTimeouts) {
    let mut rx = session.watch();
    loop {
        let stage = {
            let snapshot = rx.borrow_and_update();
            if snapshot.abandoned || snapshot.stage.is_terminal() {
                return;
            }
            snapshot.stage
        };

        match timeouts.for_stage(stage) {
            Some(limit) => {
                let left_stage = async {
                    loop {
                        if rx.changed().await.is_err() {
                            return false;
                        }
                        if rx.borrow().stage != stage {
                            return true;
                        }
                    }
                };
                match tokio::time::timeout(limit, left_stage).await {
                    Ok(true) => continue,
                    Ok(false) => return,
                    Err(_) => {
                        warn!(session_id = %session.id(), %stage, "stage exceeded its time limit");
                        session.handle(Input::StageTimedOut { stage, after: limit });
                    }
                }
            }
            None => {
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }
}
