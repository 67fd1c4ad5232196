//! Integration tests for the coordinator: fan-out, quit fan-out and report
//! aggregation.

mod common;

use common::{PanickingSink, ScriptedSink, text};
use message_dispatcher::config::DispatchConfig;
use message_dispatcher::dispatch::{Coordinator, ReportKind, TerminationReason};
use message_dispatcher::error::Error;
use message_dispatcher::source::Message;
use message_dispatcher::source::memory::{MemorySource, Settlement};
use std::collections::HashSet;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

fn config(concurrency: usize) -> DispatchConfig {
    DispatchConfig {
        concurrency,
        ..Default::default()
    }
}

#[tokio::test]
async fn three_workers_drain_ten_messages_then_stop_on_close() {
    let (source, stream) = MemorySource::new(16);
    let log = source.ack_log();
    let sink = ScriptedSink::succeeding();

    let mut ids = Vec::new();
    for n in 0..10 {
        let message = Message::new(format!("m{n}"), "text/plain");
        ids.push(source.push(message).await.unwrap());
    }
    source.close();

    let summary = Coordinator::new(stream, sink.clone(), config(3))
        .run(pending())
        .await
        .unwrap();

    assert!(summary.is_clean());
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.terminations.len(), 3);
    assert!(
        summary
            .terminations
            .iter()
            .all(|(_, reason)| *reason == TerminationReason::StreamClosed)
    );
    let workers: HashSet<_> = summary.terminations.iter().map(|(id, _)| id.0).collect();
    assert_eq!(workers, HashSet::from([0, 1, 2]));

    for id in ids {
        assert_eq!(log.settlements(id), vec![Settlement::Accepted]);
    }
    assert_eq!(sink.calls().len(), 10);
}

#[tokio::test]
async fn any_forward_failure_makes_the_run_fail() {
    let (source, stream) = MemorySource::new(16);
    let log = source.ack_log();
    let sink = ScriptedSink::failing_on(&["bad"]);

    for body in ["ok", "bad", "ok", "ok", "bad"] {
        source.push(text(body)).await.unwrap();
    }
    source.close();

    let config = DispatchConfig {
        concurrency: 2,
        requeue_failed: true,
        ..Default::default()
    };
    let summary = Coordinator::new(stream, sink, config).run(pending()).await.unwrap();

    assert_eq!(summary.exit_code(), 1);
    assert_eq!(summary.reports.len(), 2);
    assert!(
        summary
            .reports
            .iter()
            .all(|r| r.kind == ReportKind::ForwardFailure && r.body.as_deref() == Some("bad"))
    );
    assert_eq!(log.accepted(), 3);
    assert_eq!(log.rejected(), 2);
    assert_eq!(log.settled_messages(), 5);
    assert_eq!(summary.terminations.len(), 2);
}

#[tokio::test]
async fn quit_reaches_every_worker_exactly_once() {
    let (source, stream) = MemorySource::new(4);
    let (quit_tx, quit_rx) = oneshot::channel::<()>();

    let run = tokio::spawn(
        Coordinator::new(stream, ScriptedSink::succeeding(), config(4)).run(async move {
            quit_rx.await.ok();
        }),
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    quit_tx.send(()).unwrap();
    let summary = run.await.unwrap().unwrap();

    assert_eq!(summary.terminations.len(), 4);
    assert!(
        summary
            .terminations
            .iter()
            .all(|(_, reason)| *reason == TerminationReason::QuitSignal)
    );
    assert_eq!(summary.reports.len(), 4);
    let reported: HashSet<_> = summary.reports.iter().map(|r| r.worker.0).collect();
    assert_eq!(reported, HashSet::from([0, 1, 2, 3]));
    assert!(
        summary
            .reports
            .iter()
            .all(|r| r.kind == ReportKind::SignalTermination)
    );
    assert_eq!(summary.exit_code(), 1);
    drop(source);
}

#[tokio::test(start_paused = true)]
async fn idle_workers_end_a_clean_run() {
    let (source, stream) = MemorySource::new(4);
    source.push(text("only")).await.unwrap();

    let config = DispatchConfig {
        concurrency: 2,
        ..Default::default()
    }
    .with_idle_timeout(Duration::from_secs(10));
    let summary = Coordinator::new(stream, ScriptedSink::succeeding(), config)
        .run(pending())
        .await
        .unwrap();

    assert!(summary.is_clean());
    assert!(
        summary
            .terminations
            .iter()
            .all(|(_, reason)| *reason == TerminationReason::IdleTimeout)
    );
    assert_eq!(source.ack_log().accepted(), 1);
}

#[tokio::test]
async fn panicking_worker_is_reported() {
    let (source, stream) = MemorySource::new(4);
    source.push(text("boom")).await.unwrap();
    source.close();

    let summary = Coordinator::new(stream, Arc::new(PanickingSink), config(1))
        .run(pending())
        .await
        .unwrap();

    assert!(summary.terminations.is_empty());
    assert_eq!(summary.reports.len(), 1);
    assert_eq!(summary.reports[0].kind, ReportKind::WorkerPanic);
    assert_eq!(summary.exit_code(), 1);
}

#[tokio::test]
async fn zero_concurrency_is_a_config_error() {
    let (_source, stream) = MemorySource::new(1);
    let result = Coordinator::new(stream, ScriptedSink::succeeding(), config(0))
        .run(pending())
        .await;
    assert!(matches!(result, Err(Error::Config(_))));
}
