//! End-to-end engine scenarios over a real JSONL journal.
//!
//! Each test wires a journal in a temp directory, runs the engine task,
//! drives it through the feed handle, and asserts on both the published
//! snapshots and the journal contents.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use market_observer::adapters::journal::JsonlJournal;
use market_observer::adapters::metrics::ObserverMetrics;
use market_observer::domain::clock::{Clock, ClockCalibration};
use market_observer::domain::errors::{FeedError, JournalError};
use market_observer::domain::packet::Packet;
use market_observer::domain::policy::FusePolicy;
use market_observer::domain::state::{ShutdownMode, StateSnapshot, SystemState, TransitionReason};
use market_observer::ports::journal::{DurabilityLevel, Journal, JournalCursor, JournalEntry};
use market_observer::usecases::{EngineHandle, ObserverEngine};

struct Harness {
    journal: Arc<JsonlJournal>,
    handle: EngineHandle,
    engine_task: tokio::task::JoinHandle<anyhow::Result<()>>,
    _dir: tempfile::TempDir,
}

async fn start_engine(policy: FusePolicy) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let journal = Arc::new(
        JsonlJournal::open(
            dir.path().join("journal.jsonl"),
            DurabilityLevel::SyncPerEntry,
            1,
        )
        .await
        .unwrap(),
    );
    let metrics = Arc::new(ObserverMetrics::new().unwrap());
    let clock = Clock::with_calibration(ClockCalibration { epoch_offset_us: 0 });
    let (engine, handle) =
        ObserverEngine::new(Arc::clone(&journal), clock, policy, 64, metrics).unwrap();
    let engine_task = tokio::spawn(engine.run());
    Harness {
        journal,
        handle,
        engine_task,
        _dir: dir,
    }
}

async fn wait_for_state(
    rx: &mut watch::Receiver<StateSnapshot>,
    state: SystemState,
) -> StateSnapshot {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.state == state))
        .await
        .expect("timed out waiting for state")
        .expect("snapshot channel closed")
        .clone()
}

async fn read_entries(journal: &JsonlJournal) -> Vec<JournalEntry> {
    let mut cursor = journal.open_cursor(0).await.unwrap();
    let mut entries = Vec::new();
    while let Some(sealed) = cursor.next_entry().await.unwrap() {
        entries.push(sealed.entry);
    }
    entries
}

fn packet(seq: u64, exchange_ts_us: u64, received_ts_us: u64) -> Packet {
    Packet::new(
        seq,
        exchange_ts_us,
        received_ts_us,
        "test",
        "trade.btcusdt",
        serde_json::json!({"px": "50000.0"}),
    )
}

async fn start_session(h: &Harness) {
    let feed = h.handle.feed_handle();
    feed.session_start(uuid::Uuid::new_v4(), 0).await.unwrap();
    let mut rx = h.handle.subscribe();
    wait_for_state(&mut rx, SystemState::Connected).await;
}

#[tokio::test]
async fn in_threshold_drift_stays_connected() {
    let h = start_engine(FusePolicy::default()).await;
    start_session(&h).await;
    let feed = h.handle.feed_handle();

    // 100ms early venue timestamp: well inside the 500ms fuse.
    feed.packet(packet(1, 1_000_000_000_000, 1_000_000_100_000))
        .await
        .unwrap();

    let mut rx = h.handle.subscribe();
    let snapshot = tokio::time::timeout(
        Duration::from_secs(2),
        rx.wait_for(|s| s.packets_processed == 1),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(snapshot.state, SystemState::Connected);
    assert_eq!(snapshot.last_sequence_id, Some(1));

    assert!(h.handle.shutdown(ShutdownMode::Drain).await);
    h.engine_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn unsafe_drift_halts_and_journals_in_order() {
    let h = start_engine(FusePolicy::default()).await;
    start_session(&h).await;
    let feed = h.handle.feed_handle();

    // 600ms over: the fuse must fire.
    feed.packet(packet(1, 1_000_000_600_000, 1_000_000_000_000))
        .await
        .unwrap();

    let mut rx = h.handle.subscribe();
    wait_for_state(&mut rx, SystemState::Halted).await;
    drop(feed);
    drop(h.handle);
    h.engine_task.await.unwrap().unwrap();

    let entries = read_entries(&h.journal).await;
    let kinds: Vec<&str> = entries.iter().map(JournalEntry::kind).collect();
    assert_eq!(kinds, vec!["STATUS_CHANGE", "PACKET", "STATUS_CHANGE"]);

    let JournalEntry::StatusChange {
        from, to, reason, detail, ..
    } = &entries[2]
    else {
        panic!("expected status change");
    };
    assert_eq!(*from, SystemState::Connected);
    assert_eq!(*to, SystemState::Halted);
    assert_eq!(
        *reason,
        TransitionReason::UnsafeDrift { drift_us: 600_000 }
    );
    assert!(detail.starts_with("unsafe_drift"));
}

#[tokio::test]
async fn sequence_loss_gap_halts_with_expected_and_got() {
    let h = start_engine(FusePolicy::default()).await;
    start_session(&h).await;
    let feed = h.handle.feed_handle();

    feed.packet(packet(5, 100, 100)).await.unwrap();
    feed.packet(packet(7, 200, 200)).await.unwrap();

    let mut rx = h.handle.subscribe();
    wait_for_state(&mut rx, SystemState::Halted).await;
    drop(feed);
    drop(h.handle);
    h.engine_task.await.unwrap().unwrap();

    let entries = read_entries(&h.journal).await;
    let halt = entries
        .iter()
        .find_map(|e| match e {
            JournalEntry::StatusChange {
                to: SystemState::Halted,
                reason,
                ..
            } => Some(reason.clone()),
            _ => None,
        })
        .expect("halt entry");
    assert_eq!(
        halt,
        TransitionReason::SequenceGapLoss {
            expected: 6,
            got: 7
        }
    );
}

#[tokio::test]
async fn connectivity_fault_degrades_without_losing_packets() {
    let h = start_engine(FusePolicy::default()).await;
    start_session(&h).await;
    let feed = h.handle.feed_handle();

    feed.packet(packet(1, 100, 100)).await.unwrap();
    feed.fault(FeedError::Connectivity("reset by peer".into()))
        .await
        .unwrap();

    let mut rx = h.handle.subscribe();
    wait_for_state(&mut rx, SystemState::Degraded).await;

    // The stream keeps flowing while degraded; nothing is dropped.
    feed.packet(packet(2, 200, 200)).await.unwrap();
    feed.packet(packet(3, 300, 300)).await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(2),
        rx.wait_for(|s| s.packets_processed == 3),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(h.handle.shutdown(ShutdownMode::Drain).await);
    h.engine_task.await.unwrap().unwrap();

    let entries = read_entries(&h.journal).await;
    let packet_count = entries
        .iter()
        .filter(|e| matches!(e, JournalEntry::Packet { .. }))
        .count();
    assert_eq!(packet_count, 3);
    assert!(entries.iter().any(|e| matches!(
        e,
        JournalEntry::StatusChange {
            reason: TransitionReason::AdapterConnectivity { .. },
            ..
        }
    )));
}

#[tokio::test]
async fn repeated_stale_checks_degrade_then_halt() {
    let policy = FusePolicy::default();
    let timeout = policy.heartbeat_timeout_us;
    let h = start_engine(policy).await;
    start_session(&h).await;

    // Synthetic clock readings far past the last liveness evidence.
    let last_heartbeat = h.handle.snapshot().last_heartbeat_ts_us;
    assert!(h.handle.stale_check(last_heartbeat + timeout + 1).await);
    let mut rx = h.handle.subscribe();
    wait_for_state(&mut rx, SystemState::Degraded).await;

    assert!(h.handle.stale_check(last_heartbeat + timeout + 2).await);
    assert!(h.handle.stale_check(last_heartbeat + timeout + 3).await);
    let snapshot = wait_for_state(&mut rx, SystemState::Halted).await;
    assert_eq!(snapshot.state, SystemState::Halted);

    drop(h.handle);
    h.engine_task.await.unwrap().unwrap();

    let entries = read_entries(&h.journal).await;
    let stale_halts = entries
        .iter()
        .filter(|e| matches!(
            e,
            JournalEntry::StatusChange {
                to: SystemState::Halted,
                reason: TransitionReason::StaleConnection { strikes: 3, .. },
                ..
            }
        ))
        .count();
    assert_eq!(stale_halts, 1);
}

#[tokio::test]
async fn duplicate_degrades_then_recovers_after_clean_streak() {
    let h = start_engine(FusePolicy::default()).await;
    start_session(&h).await;
    let feed = h.handle.feed_handle();

    feed.packet(packet(5, 100, 100)).await.unwrap();
    feed.packet(packet(5, 200, 200)).await.unwrap();

    let mut rx = h.handle.subscribe();
    wait_for_state(&mut rx, SystemState::Degraded).await;

    feed.packet(packet(6, 300, 300)).await.unwrap();
    feed.packet(packet(7, 400, 400)).await.unwrap();
    feed.packet(packet(8, 500, 500)).await.unwrap();
    wait_for_state(&mut rx, SystemState::Connected).await;

    assert!(h.handle.shutdown(ShutdownMode::Drain).await);
    h.engine_task.await.unwrap().unwrap();

    let entries = read_entries(&h.journal).await;
    assert!(entries.iter().any(|e| matches!(
        e,
        JournalEntry::StatusChange {
            reason: TransitionReason::Recovered { clean_packets: 3 },
            ..
        }
    )));
}

#[tokio::test]
async fn halted_session_still_journals_packets_forensically() {
    let h = start_engine(FusePolicy::default()).await;
    start_session(&h).await;
    let feed = h.handle.feed_handle();

    feed.packet(packet(1, 900_000, 0)).await.unwrap();
    let mut rx = h.handle.subscribe();
    wait_for_state(&mut rx, SystemState::Halted).await;

    feed.packet(packet(2, 100, 100)).await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(2),
        rx.wait_for(|s| s.packets_processed == 2),
    )
    .await
    .unwrap()
    .unwrap();

    drop(feed);
    drop(h.handle);
    h.engine_task.await.unwrap().unwrap();

    let entries = read_entries(&h.journal).await;
    let packet_count = entries
        .iter()
        .filter(|e| matches!(e, JournalEntry::Packet { .. }))
        .count();
    assert_eq!(packet_count, 2);
    // But the halt is the final state decision.
    let transitions_after_halt = entries
        .iter()
        .skip_while(|e| !matches!(
            e,
            JournalEntry::StatusChange {
                to: SystemState::Halted,
                ..
            }
        ))
        .filter(|e| matches!(e, JournalEntry::StatusChange { .. }))
        .count();
    assert_eq!(transitions_after_halt, 1);
}

#[tokio::test]
async fn drain_shutdown_processes_queued_packets_first() {
    let h = start_engine(FusePolicy::default()).await;
    start_session(&h).await;
    let feed = h.handle.feed_handle();

    for seq in 1..=5 {
        feed.packet(packet(seq, 100 * seq, 100 * seq)).await.unwrap();
    }
    assert!(h.handle.shutdown(ShutdownMode::Drain).await);
    h.engine_task.await.unwrap().unwrap();

    let entries = read_entries(&h.journal).await;
    let packet_count = entries
        .iter()
        .filter(|e| matches!(e, JournalEntry::Packet { .. }))
        .count();
    assert_eq!(packet_count, 5);

    // The shutdown halt is the very last entry.
    let JournalEntry::StatusChange { to, reason, .. } = entries.last().unwrap() else {
        panic!("expected trailing status change");
    };
    assert_eq!(*to, SystemState::Halted);
    assert_eq!(
        *reason,
        TransitionReason::Shutdown {
            mode: ShutdownMode::Drain
        }
    );
}

mod journal_failure {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;

    mock! {
        pub FailingJournal {}

        #[async_trait]
        impl Journal for FailingJournal {
            async fn append(&self, entry: &JournalEntry) -> Result<u64, JournalError>;
            async fn sync(&self) -> Result<(), JournalError>;
            async fn open_cursor(
                &self,
                offset: u64,
            ) -> Result<Box<dyn JournalCursor>, JournalError>;
            async fn is_healthy(&self) -> bool;
        }
    }

    fn disk_gone() -> JournalError {
        JournalError::Append(std::io::Error::new(
            std::io::ErrorKind::Other,
            "no space left on device",
        ))
    }

    #[tokio::test]
    async fn append_failure_halts_the_session() {
        let mut journal = MockFailingJournal::new();
        let mut seq = mockall::Sequence::new();
        // Session start status succeeds, the first packet append fails,
        // and the best-effort halt entry fails too.
        journal
            .expect_append()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(0));
        journal
            .expect_append()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(disk_gone()));

        let metrics = Arc::new(ObserverMetrics::new().unwrap());
        let clock = Clock::with_calibration(ClockCalibration { epoch_offset_us: 0 });
        let (engine, handle) = ObserverEngine::new(
            Arc::new(journal),
            clock,
            FusePolicy::default(),
            16,
            metrics,
        )
        .unwrap();
        let engine_task = tokio::spawn(engine.run());

        let feed = handle.feed_handle();
        feed.session_start(uuid::Uuid::new_v4(), 0).await.unwrap();
        feed.packet(packet(1, 100, 100)).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), engine_task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_err());
        assert_eq!(handle.snapshot().state, SystemState::Halted);
    }
}
