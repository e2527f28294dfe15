//! Failure path tests.
//!
//! These tests verify:
//! - Insufficient memory ends the session before any download
//! - Node errors are recorded verbatim and classified by stage
//! - Rejected or unanswered commands fail the session
//! - Stage timeouts fail the session with a distinguishable error

#[cfg(test)]
pub mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use crate::bus::{DependencyState, NodeEvent};
    use crate::core::config::BootstrapConfig;
    use crate::core::stage::Stage;
    use crate::node::CommandKind;
    use crate::runtime::controller::INSUFFICIENT_MEMORY_MESSAGE;
    use crate::runtime::failure::{FailureKind, Presentation};
    use crate::tests::*;
    use crate::BootstrapError;

    #[tokio::test]
    async fn test_insufficient_memory_never_downloads() {
        let harness = Harness::new(|node| node.reply_memory(false));
        let session = harness.orchestrator.start_session(keys());

        let outcome = tokio::time::timeout(WAIT, session.wait_outcome())
            .await
            .expect("outcome in time");
        match outcome {
            Err(BootstrapError::PreconditionFailure(message)) => {
                assert_eq!(message, INSUFFICIENT_MEMORY_MESSAGE)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert_eq!(session.stage(), Stage::MemoryFailed);
        assert!(matches!(
            session.confirm_start(),
            Err(BootstrapError::NotAwaitingStart(Stage::MemoryFailed))
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(harness.node.count(CommandKind::BeginDependencyDownload), 0);
        assert_eq!(harness.node.commands(), vec![CommandKind::ProbeMemory]);
    }

    #[tokio::test]
    async fn test_error_while_checking_memory_is_precondition_failure() {
        let harness = Harness::new(|node| node);
        let session = harness.orchestrator.start_session(keys());
        wait_for_stage(&session, Stage::MemoryChecking).await;

        harness
            .bus
            .publish(NodeEvent::Error("cannot read /proc/meminfo".to_string()));
        let snapshot = wait_for_stage(&session, Stage::Failed).await;
        let failure = snapshot.failure.expect("failure recorded");
        assert_eq!(failure.kind, FailureKind::PreconditionFailure);
        assert_eq!(failure.stage, Stage::MemoryChecking);
    }

    #[tokio::test]
    async fn test_disk_full_during_install_is_terminal() {
        let harness = Harness::new(|node| node.reply_memory(true));
        let session = harness.confirmed_session().await;
        harness
            .bus
            .publish(NodeEvent::DependencyState(DependencyState::Downloaded));
        wait_for_stage(&session, Stage::DependencyInstalling).await;

        harness.bus.publish(NodeEvent::Error("disk full".to_string()));
        let snapshot = wait_for_stage(&session, Stage::Failed).await;
        let last_error = snapshot.last_error.clone().expect("error recorded");
        assert_eq!(last_error.message, "disk full");
        assert_eq!(last_error.stage, Stage::DependencyInstalling);
        assert_eq!(last_error.kind, FailureKind::DependencyFailure);
        assert_eq!(
            snapshot.presentation,
            Presentation::Error("disk full".to_string())
        );

        harness.bus.publish(NodeEvent::DownloadProgress(80));
        harness
            .bus
            .publish(NodeEvent::DependencyState(DependencyState::Installed));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.stage, Stage::Failed);
        assert_eq!(harness.node.count(CommandKind::StartNode), 0);
        assert!(matches!(
            session.wait_outcome().await,
            Err(BootstrapError::DependencyFailure(message)) if message == "disk full"
        ));
    }

    #[tokio::test]
    async fn test_errors_after_failure_update_last_error_only() {
        let harness = Harness::new(|node| node.reply_memory(true));
        let session = harness.confirmed_session().await;

        harness.bus.publish(NodeEvent::Error("disk full".to_string()));
        wait_for_stage(&session, Stage::Failed).await;
        harness
            .bus
            .publish(NodeEvent::Error("node process exited".to_string()));

        let snapshot = wait_until(&session, |s| {
            s.last_error
                .as_ref()
                .is_some_and(|e| e.message == "node process exited")
        })
        .await;
        assert_eq!(snapshot.failure.unwrap().message, "disk full");
        assert_eq!(snapshot.stage, Stage::Failed);
    }

    #[tokio::test]
    async fn test_error_after_node_start_is_protocol_error() {
        let harness = Harness::new(|node| node.reply_memory(true));
        let session = harness.confirmed_session().await;
        harness
            .bus
            .publish(NodeEvent::DependencyState(DependencyState::Installed));
        wait_for_stage(&session, Stage::RelayConnecting).await;

        harness
            .bus
            .publish(NodeEvent::Error("relay refused connection".to_string()));
        let snapshot = wait_for_stage(&session, Stage::Failed).await;
        let failure = snapshot.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::ProtocolError);
        assert_eq!(failure.stage, Stage::RelayConnecting);
        assert_eq!(failure.message, "relay refused connection");
    }

    #[tokio::test]
    async fn test_rejected_download_fails_session() {
        let harness = Harness::new(|node| {
            node.reply_memory(true)
                .reject(CommandKind::BeginDependencyDownload)
        });
        let session = harness.confirmed_session().await;

        let snapshot = wait_for_stage(&session, Stage::Failed).await;
        let failure = snapshot.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::DependencyFailure);
        assert!(failure.message.contains("refused by test node"));
        assert_eq!(harness.node.count(CommandKind::BeginDependencyDownload), 1);
    }

    #[tokio::test]
    async fn test_rejected_start_fails_even_when_latches_are_set() {
        let harness = Harness::new(|node| node.reply_memory(true).reject(CommandKind::StartNode));
        let session = harness.confirmed_session().await;

        harness.bus.publish(NodeEvent::Turn { is_leader: true });
        harness.bus.publish(sync_status());
        wait_until(&session, |s| s.sync_complete && s.turn.is_some()).await;
        harness
            .bus
            .publish(NodeEvent::DependencyState(DependencyState::Installed));

        let outcome = tokio::time::timeout(WAIT, session.wait_outcome())
            .await
            .expect("outcome in time");
        match outcome {
            Err(BootstrapError::ProtocolError(message)) => {
                assert!(message.contains("refused by test node"), "{message}")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let snapshot = session.snapshot();
        assert_eq!(snapshot.stage, Stage::Failed);
        assert_eq!(snapshot.failure.unwrap().stage, Stage::NodeStarting);
        assert!(snapshot
            .last_error
            .is_some_and(|e| e.message.contains("refused by test node")));
        assert!(session.handoff().is_none());
        assert_eq!(harness.node.count(CommandKind::StartNode), 1);
    }

    #[tokio::test]
    async fn test_unanswered_start_times_out() {
        let config = BootstrapConfig {
            command_timeout_ms: 40,
            ..BootstrapConfig::default()
        };
        let harness = Harness::with_config(
            |node| node.reply_memory(true).stall(CommandKind::StartNode),
            config,
        );
        let session = harness.confirmed_session().await;
        harness
            .bus
            .publish(NodeEvent::DependencyState(DependencyState::Installed));

        let snapshot = wait_for_stage(&session, Stage::Failed).await;
        let failure = snapshot.failure.unwrap();
        assert_eq!(failure.stage, Stage::NodeStarting);
        assert_eq!(failure.message, "start_node timed out after 40ms");
    }

    #[tokio::test]
    async fn test_stage_timeout_fails_session() {
        let mut config = BootstrapConfig::default();
        config.stage_timeouts.memory_check_ms = Some(50);
        let harness = Harness::with_config(|node| node, config);
        let session = harness.orchestrator.start_session(keys());

        let outcome = tokio::time::timeout(WAIT, session.wait_outcome())
            .await
            .expect("outcome in time");
        match outcome {
            Err(BootstrapError::TimedOut(message)) => {
                assert_eq!(message, "stage memory_checking timed out after 50ms")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let failure = session.snapshot().failure.unwrap();
        assert_eq!(failure.kind, FailureKind::TimedOut);
    }

    #[tokio::test]
    async fn test_stage_timeout_resets_on_stage_change() {
        let mut config = BootstrapConfig::default();
        config.stage_timeouts.download_ms = Some(5_000);
        config.stage_timeouts.install_ms = Some(60);
        let harness = Harness::with_config(|node| node.reply_memory(true), config);
        let session = harness.confirmed_session().await;

        harness
            .bus
            .publish(NodeEvent::DependencyState(DependencyState::Downloaded));
        let snapshot = wait_for_stage(&session, Stage::Failed).await;
        let failure = snapshot.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::TimedOut);
        assert_eq!(failure.stage, Stage::DependencyInstalling);
    }
}
