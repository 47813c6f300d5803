// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Engine Integration Tests
//!
//! Pollers, operations and the link manager driven end to end over mock
//! messengers.
//!
//! ## Test Categories
//!
//! - `test_health_*`: failure counting, poll suppression and recovery
//! - `test_modem_*`: shared modem pool deferral
//! - `test_retry_*`: retry budgets and cleanup
//! - `test_queue_*`: deduplication, ordering, aging and cancellation
//! - `test_schedule_*`: periodic polling against a full poller
//! - `test_manager_*`: routing through the link manager

use std::sync::Arc;
use std::time::Duration;

use wayside_comm::ModemMessenger;
use wayside_core::{
    Cadence, CollectorHandler, Controller, ControllerId, ControllerStatus, EnqueueError, EventDispatcher,
    Executable, FairnessPolicy, Job, LinkManager, OperationEvent, Outcome, PollJob, PollSource, Poller,
    Priority, Scheduler,
};

use wayside_tests::common::{
    ControllerFixtures, EchoModemConnector, Fault, FaultCodec, PolicyFixtures, ScriptedProcedure,
    ProcedureLog, ScriptedMessenger, eventually, init_test_logging, modem_pool,
};

const WAIT: Duration = Duration::from_secs(2);

fn collector() -> (Arc<EventDispatcher>, Arc<CollectorHandler>) {
    let events = Arc::new(EventDispatcher::new());
    let collector = Arc::new(CollectorHandler::new(1000));
    events.register(collector.clone());
    (events, collector)
}

/// Completion outcomes and notes, in dispatch order.
fn outcomes(collector: &CollectorHandler) -> Vec<(Outcome, Option<String>)> {
    collector
        .completions()
        .into_iter()
        .filter_map(|event| match event {
            OperationEvent::Completed { outcome, note, .. } => Some((outcome, note)),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Controller health
// =============================================================================

#[tokio::test]
async fn test_health_threshold_suppresses_polls_not_commands() {
    init_test_logging();
    let log = ProcedureLog::new();
    let codec = FaultCodec::new();
    codec.set_fault(Fault::Transport);
    let controller = ControllerFixtures::plain("ctl-a", "line-a");
    let (events, collector) = collector();

    let config = PolicyFixtures::poller("line-a", PolicyFixtures::no_retry(3));
    let (handle, task) = Poller::spawn(config, Box::new(ScriptedMessenger::silent()), events);

    for tag in ["p1", "p2", "p3"] {
        let op = ScriptedProcedure::new(tag, Priority::Poll, log.clone()).into_op(codec.clone(), controller.clone());
        handle.try_enqueue(op).unwrap();
    }
    assert!(eventually(WAIT, || controller.status() == ControllerStatus::Failed).await);
    assert_eq!(controller.consecutive_failures(), 3);
    assert_eq!(codec.exchanges(), 3);

    codec.set_fault(Fault::None);
    let poll = ScriptedProcedure::new("p4", Priority::Poll, log.clone()).into_op(codec.clone(), controller.clone());
    handle.try_enqueue(poll).unwrap();
    assert!(eventually(WAIT, || handle.stats().cancelled == 1).await);
    assert_eq!(codec.exchanges(), 3);

    let command = ScriptedProcedure::new("c1", Priority::Command, log.clone()).into_op(codec.clone(), controller.clone());
    handle.try_enqueue(command).unwrap();
    assert!(eventually(WAIT, || handle.stats().succeeded == 1).await);

    handle.shutdown();
    task.await.unwrap();

    assert_eq!(log.completed(), vec!["c1"]);
    assert_eq!(controller.status(), ControllerStatus::Ok);
    assert_eq!(controller.consecutive_failures(), 0);

    let notes = outcomes(&collector);
    assert!(notes.contains(&(Outcome::Cancelled, Some("suppressed".to_string()))));
    let changes = collector
        .events()
        .into_iter()
        .filter(|e| matches!(e, OperationEvent::StatusChanged { to: ControllerStatus::Failed, .. }))
        .count();
    assert_eq!(changes, 1);
}

#[tokio::test]
async fn test_health_controller_errors_are_not_counted() {
    let log = ProcedureLog::new();
    let codec = FaultCodec::new();
    codec.set_fault(Fault::Controller);
    let controller = ControllerFixtures::plain("ctl-b", "line-b");
    let (events, collector) = collector();

    let config = PolicyFixtures::poller("line-b", PolicyFixtures::fixed_retries(3, 1));
    let (handle, task) = Poller::spawn(config, Box::new(ScriptedMessenger::silent()), events);
    let op = ScriptedProcedure::new("cmd", Priority::Command, log.clone()).into_op(codec.clone(), controller.clone());
    handle.try_enqueue(op).unwrap();

    assert!(eventually(WAIT, || handle.stats().failed == 1).await);
    handle.shutdown();
    task.await.unwrap();

    assert_eq!(codec.exchanges(), 1);
    assert_eq!(controller.status(), ControllerStatus::Ok);
    assert_eq!(controller.consecutive_failures(), 0);
    assert!(controller.snapshot().last_error.is_some_and(|e| e.contains("busy")));
    assert_eq!(outcomes(&collector), vec![(Outcome::Failed, None)]);
}

#[tokio::test]
async fn test_health_failed_controller_recovers_on_interval() {
    let log = ProcedureLog::new();
    let codec = FaultCodec::new();
    codec.set_fault(Fault::Transport);
    let controller = ControllerFixtures::plain("ctl-r", "line-r");
    let (events, collector) = collector();

    let policy = PolicyFixtures::no_retry(2).with_recovery_interval(Some(Duration::from_millis(150)));
    let (handle, task) = Poller::spawn(
        PolicyFixtures::poller("line-r", policy),
        Box::new(ScriptedMessenger::silent()),
        events,
    );
    for tag in ["e1", "e2"] {
        let op = ScriptedProcedure::new(tag, Priority::Poll, log.clone()).into_op(codec.clone(), controller.clone());
        handle.try_enqueue(op).unwrap();
    }
    assert!(eventually(WAIT, || controller.status() == ControllerStatus::Failed).await);

    codec.set_fault(Fault::None);
    let early = ScriptedProcedure::new("early", Priority::Poll, log.clone()).into_op(codec.clone(), controller.clone());
    handle.try_enqueue(early).unwrap();
    assert!(eventually(WAIT, || handle.stats().cancelled == 1).await);
    assert_eq!(codec.exchanges(), 2);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let retry = ScriptedProcedure::new("retry", Priority::Poll, log.clone()).into_op(codec.clone(), controller.clone());
    handle.try_enqueue(retry).unwrap();
    assert!(eventually(WAIT, || controller.status() == ControllerStatus::Ok).await);
    handle.shutdown();
    task.await.unwrap();

    assert_eq!(log.completed(), vec!["retry"]);
    assert_eq!(controller.consecutive_failures(), 0);
    let recovered = collector.events().into_iter().any(|e| {
        matches!(
            e,
            OperationEvent::StatusChanged {
                from: ControllerStatus::Failed,
                to: ControllerStatus::Ok,
                ..
            }
        )
    });
    assert!(recovered);
}

// =============================================================================
// Shared modem pool
// =============================================================================

#[tokio::test]
async fn test_modem_exhausted_pool_defers_second_link() {
    init_test_logging();
    let pool = modem_pool(1);
    let connector = Arc::new(EchoModemConnector::new("CONNECT 9600"));
    let codec = FaultCodec::echo();
    let log = ProcedureLog::new();
    let (events, collector) = collector();

    let mut handles = Vec::new();
    let mut tasks = Vec::new();
    for (link, phone) in [("dial-1", "5550001"), ("dial-2", "5550002")] {
        let messenger = ModemMessenger::new(phone, pool.clone(), connector.clone());
        let config = PolicyFixtures::poller(link, PolicyFixtures::no_retry(3));
        let (handle, task) = Poller::spawn(config, Box::new(messenger), events.clone());
        let controller = ControllerFixtures::plain(&format!("{}-ctl", link), link);
        let op = ScriptedProcedure::new(link, Priority::Poll, log.clone())
            .with_hold(Duration::from_millis(30))
            .into_op(codec.clone(), controller);
        handle.try_enqueue(op).unwrap();
        handles.push(handle);
        tasks.push(task);
    }

    let done = eventually(WAIT, || handles.iter().all(|h| h.stats().succeeded == 1)).await;
    for handle in &handles {
        handle.shutdown();
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert!(done);

    let deferred: u64 = handles.iter().map(|h| h.stats().deferred).sum();
    let failed: u64 = handles.iter().map(|h| h.stats().failed).sum();
    assert!(deferred >= 1);
    assert_eq!(failed, 0);
    assert_eq!(log.completed().len(), 2);
    assert_eq!(pool.available(), 1);
    assert!(connector.connects() >= 2);

    let deferrals = collector
        .events()
        .into_iter()
        .filter(|e| matches!(e, OperationEvent::Deferred { .. }))
        .count();
    assert_eq!(deferrals as u64, deferred);
}

// =============================================================================
// Retry and cleanup
// =============================================================================

#[tokio::test]
async fn test_retry_protocol_errors_exhaust_budget() {
    let log = ProcedureLog::new();
    let codec = FaultCodec::new();
    codec.set_fault(Fault::Protocol);
    let controller = ControllerFixtures::plain("ctl-d", "line-d");
    let (events, collector) = collector();

    let config = PolicyFixtures::poller("line-d", PolicyFixtures::fixed_retries(2, 3));
    let (handle, task) = Poller::spawn(config, Box::new(ScriptedMessenger::silent()), events);
    let op = ScriptedProcedure::new("q", Priority::Diagnostic, log.clone()).into_op(codec.clone(), controller.clone());
    handle.try_enqueue(op).unwrap();

    assert!(eventually(WAIT, || handle.stats().failed == 1).await);
    handle.shutdown();
    task.await.unwrap();

    assert_eq!(codec.exchanges(), 3);
    assert_eq!(log.cleanups(), 1);
    assert_eq!(controller.consecutive_failures(), 1);
    assert_eq!(controller.status(), ControllerStatus::Timeout);

    let completion = collector.completions().into_iter().next().unwrap();
    match completion {
        OperationEvent::Completed {
            outcome,
            retries,
            error,
            consecutive_failures,
            ..
        } => {
            assert_eq!(outcome, Outcome::Failed);
            assert_eq!(retries, 2);
            assert_eq!(consecutive_failures, 1);
            assert!(error.is_some_and(|e| e.contains("CHECKSUM")));
        }
        other => panic!("expected a completion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_retry_step_limit_ends_endless_chain() {
    let log = ProcedureLog::new();
    let codec = FaultCodec::new();
    let controller = ControllerFixtures::plain("ctl-e", "line-e");
    let (events, collector) = collector();

    let policy = PolicyFixtures::no_retry(3).with_max_steps(5);
    let (handle, task) = Poller::spawn(
        PolicyFixtures::poller("line-e", policy),
        Box::new(ScriptedMessenger::silent()),
        events,
    );
    let op = ScriptedProcedure::new("loop", Priority::Poll, log.clone())
        .endless()
        .into_op(codec.clone(), controller.clone());
    handle.try_enqueue(op).unwrap();

    assert!(eventually(WAIT, || handle.stats().failed == 1).await);
    handle.shutdown();
    task.await.unwrap();

    assert_eq!(log.steps().len(), 5);
    assert_eq!(log.cleanups(), 1);
    let error = collector.completions().into_iter().find_map(|e| match e {
        OperationEvent::Completed { error, .. } => error,
        _ => None,
    });
    assert!(error.is_some_and(|e| e.contains("STEP LIMIT")));
}

#[tokio::test]
async fn test_retry_success_publishes_device_state() {
    let log = ProcedureLog::new();
    let codec = FaultCodec::new();
    let (controller, device) = ControllerFixtures::with_device("ctl-f", "line-f", "sign");
    let (events, collector) = collector();

    let (handle, task) = Poller::spawn(
        PolicyFixtures::poller("line-f", PolicyFixtures::no_retry(3)),
        Box::new(ScriptedMessenger::silent()),
        events,
    );
    let op = ScriptedProcedure::new("show", Priority::Command, log.clone())
        .with_phases(3)
        .with_device(device.clone())
        .into_op(codec.clone(), controller.clone());
    handle.try_enqueue(op).unwrap();

    assert!(eventually(WAIT, || handle.stats().succeeded == 1).await);
    handle.shutdown();
    task.await.unwrap();

    assert_eq!(log.steps(), vec!["show:0", "show:1", "show:2"]);
    assert_eq!(device.state().get("tag").and_then(|v| v.as_str()), Some("show"));
    let published = collector.completions().into_iter().find_map(|e| match e {
        OperationEvent::Completed { devices, .. } => Some(devices),
        _ => None,
    });
    assert!(published.is_some_and(|d| d.contains_key("ctl-f-dev")));
}

// =============================================================================
// Queue semantics
// =============================================================================

#[tokio::test]
async fn test_queue_duplicates_merge_and_run_one_at_a_time() {
    let log = ProcedureLog::new();
    let codec = FaultCodec::new();
    let controller = ControllerFixtures::plain("ctl-g", "line-g");
    let (events, collector) = collector();

    let messenger = ScriptedMessenger::silent();
    let record = messenger.record();
    let (poller, handle) = Poller::new(
        PolicyFixtures::poller("line-g", PolicyFixtures::no_retry(3)),
        Box::new(messenger),
        events,
    );
    for tag in ["a", "a", "b"] {
        let op = ScriptedProcedure::new(tag, Priority::Poll, log.clone())
            .with_phases(2)
            .with_hold(Duration::from_millis(5))
            .into_op(codec.clone(), controller.clone());
        handle.try_enqueue(op).unwrap();
    }

    let task = tokio::spawn(poller.run());
    assert!(eventually(WAIT, || handle.stats().succeeded == 2).await);
    handle.shutdown();
    task.await.unwrap();

    assert_eq!(log.steps(), vec!["a:0", "a:1", "b:0", "b:1"]);
    assert_eq!(log.cleanups(), 3);
    assert_eq!(handle.stats().cancelled, 1);
    assert!(outcomes(&collector).contains(&(Outcome::Cancelled, Some("duplicate".to_string()))));
    assert_eq!(record.opens(), 1);
}

#[tokio::test]
async fn test_queue_cancelled_operation_never_runs() {
    let log = ProcedureLog::new();
    let codec = FaultCodec::new();
    let controller = ControllerFixtures::plain("ctl-h", "line-h");
    let (events, collector) = collector();

    let (handle, task) = Poller::spawn(
        PolicyFixtures::poller("line-h", PolicyFixtures::no_retry(3)),
        Box::new(ScriptedMessenger::silent()),
        events,
    );
    let slow = ScriptedProcedure::new("slow", Priority::Command, log.clone())
        .with_hold(Duration::from_millis(50))
        .into_op(codec.clone(), controller.clone());
    let doomed = ScriptedProcedure::new("doomed", Priority::Poll, log.clone()).into_op(codec.clone(), controller.clone());
    let token = doomed.cancel_token();
    handle.try_enqueue(slow).unwrap();
    handle.try_enqueue(doomed).unwrap();
    token.cancel();

    assert!(eventually(WAIT, || handle.stats().cancelled == 1 && handle.stats().succeeded == 1).await);
    handle.shutdown();
    task.await.unwrap();

    assert_eq!(log.completed(), vec!["slow"]);
    assert!(outcomes(&collector).contains(&(Outcome::Cancelled, Some("cancelled".to_string()))));
}

#[tokio::test]
async fn test_queue_shutdown_cancels_pending_work() {
    let log = ProcedureLog::new();
    let codec = FaultCodec::new();
    let controller = ControllerFixtures::plain("ctl-i", "line-i");
    let (events, collector) = collector();

    let (handle, task) = Poller::spawn(
        PolicyFixtures::poller("line-i", PolicyFixtures::no_retry(3)),
        Box::new(ScriptedMessenger::silent()),
        events,
    );
    let op = ScriptedProcedure::new("long", Priority::Poll, log.clone())
        .with_phases(10)
        .with_hold(Duration::from_millis(20))
        .into_op(codec.clone(), controller.clone());
    handle.try_enqueue(op).unwrap();
    for tag in ["q1", "q2"] {
        let op = ScriptedProcedure::new(tag, Priority::Idle, log.clone()).into_op(codec.clone(), controller.clone());
        handle.try_enqueue(op).unwrap();
    }

    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.shutdown();
    task.await.unwrap();

    assert!(log.completed().is_empty());
    assert_eq!(log.cleanups(), 3);
    let stats = handle.stats();
    assert_eq!(stats.cancelled, 3);
    assert!(outcomes(&collector).iter().all(|(o, n)| *o == Outcome::Cancelled && n.as_deref() == Some("shutdown")));

    let late = ScriptedProcedure::new("late", Priority::Poll, log.clone()).into_op(codec.clone(), controller.clone());
    assert!(matches!(handle.try_enqueue(late), Err(EnqueueError::Closed { .. })));
    assert_eq!(log.cleanups(), 4);
}

#[tokio::test]
async fn test_queue_aging_lifts_waiting_poll_past_diagnostic() {
    let log = ProcedureLog::new();
    let codec = FaultCodec::new();
    let controller = ControllerFixtures::plain("ctl-j", "line-j");
    let (events, _collector) = collector();

    let config = PolicyFixtures::poller("line-j", PolicyFixtures::no_retry(3)).with_fairness(FairnessPolicy::Aging {
        interval: Duration::from_millis(40),
    });
    let (handle, task) = Poller::spawn(config, Box::new(ScriptedMessenger::silent()), events);
    let op = |tag: &str, priority: Priority| {
        ScriptedProcedure::new(tag, priority, log.clone()).into_op(codec.clone(), controller.clone())
    };

    let blocker = ScriptedProcedure::new("blocker", Priority::Command, log.clone())
        .with_hold(Duration::from_millis(150))
        .into_op(codec.clone(), controller.clone());
    handle.try_enqueue(blocker).unwrap();
    assert!(eventually(WAIT, || log.steps().contains(&"blocker:0".to_string())).await);

    handle.try_enqueue(op("old-poll", Priority::Poll)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.try_enqueue(op("diag", Priority::Diagnostic)).unwrap();
    handle.try_enqueue(op("cmd", Priority::Command)).unwrap();

    assert!(eventually(WAIT, || handle.stats().succeeded == 4).await);
    handle.shutdown();
    task.await.unwrap();

    assert_eq!(log.completed(), vec!["blocker", "cmd", "old-poll", "diag"]);
}

#[tokio::test]
async fn test_queue_disable_between_phases_stops_io() {
    let log = ProcedureLog::new();
    let codec = FaultCodec::new();
    let (controller, device) = ControllerFixtures::with_device("ctl-k", "line-k", "sign");
    let (events, collector) = collector();

    let (handle, task) = Poller::spawn(
        PolicyFixtures::poller("line-k", PolicyFixtures::no_retry(3)),
        Box::new(ScriptedMessenger::silent()),
        events,
    );
    let op = ScriptedProcedure::new("x", Priority::Command, log.clone())
        .with_phases(3)
        .with_hold(Duration::from_millis(60))
        .with_device(device.clone())
        .into_op(codec.clone(), controller.clone());
    handle.try_enqueue(op).unwrap();
    assert!(eventually(WAIT, || !log.steps().is_empty()).await);

    controller.set_enabled(false);
    assert!(eventually(WAIT, || handle.stats().cancelled == 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.shutdown();
    task.await.unwrap();

    assert_eq!(log.steps(), vec!["x:0"]);
    assert_eq!(codec.exchanges(), 1);
    assert_eq!(log.cleanups(), 1);
    assert!(log.completed().is_empty());
    assert!(device.state().is_empty());
    assert_eq!(controller.status(), ControllerStatus::Disabled);
    assert_eq!(controller.consecutive_failures(), 0);
    assert_eq!(outcomes(&collector), vec![(Outcome::Cancelled, Some("cancelled".to_string()))]);
}

#[tokio::test]
async fn test_queue_cancel_between_phases_stops_io() {
    let log = ProcedureLog::new();
    let codec = FaultCodec::new();
    let controller = ControllerFixtures::plain("ctl-l", "line-l");
    let (events, collector) = collector();

    let (handle, task) = Poller::spawn(
        PolicyFixtures::poller("line-l", PolicyFixtures::no_retry(3)),
        Box::new(ScriptedMessenger::silent()),
        events,
    );
    let op = ScriptedProcedure::new("y", Priority::Diagnostic, log.clone())
        .with_phases(3)
        .with_hold(Duration::from_millis(60))
        .into_op(codec.clone(), controller.clone());
    let token = op.cancel_token();
    handle.try_enqueue(op).unwrap();
    assert!(eventually(WAIT, || !log.steps().is_empty()).await);

    token.cancel();
    assert!(eventually(WAIT, || handle.stats().cancelled == 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let next = ScriptedProcedure::new("z", Priority::Poll, log.clone()).into_op(codec.clone(), controller.clone());
    handle.try_enqueue(next).unwrap();
    assert!(eventually(WAIT, || handle.stats().succeeded == 1).await);
    handle.shutdown();
    task.await.unwrap();

    assert_eq!(log.steps(), vec!["y:0", "z:0"]);
    assert_eq!(codec.exchanges(), 2);
    assert_eq!(log.cleanups(), 2);
    assert_eq!(log.completed(), vec!["z"]);
    assert_eq!(controller.status(), ControllerStatus::Ok);
    assert_eq!(
        outcomes(&collector),
        vec![(Outcome::Cancelled, Some("cancelled".to_string())), (Outcome::Success, None)]
    );
}

// =============================================================================
// Scheduled polling
// =============================================================================

/// Yields `burst` distinct poll operations per controller on every firing.
struct BurstSource {
    codec: Arc<FaultCodec>,
    log: Arc<ProcedureLog>,
    burst: usize,
}

impl PollSource for BurstSource {
    fn poll_operations(&self, controller: &Arc<Controller>) -> Vec<Box<dyn Executable>> {
        (0..self.burst)
            .map(|i| {
                ScriptedProcedure::new(format!("poll-{}", i), Priority::Poll, self.log.clone())
                    .with_hold(Duration::from_millis(20))
                    .into_op(self.codec.clone(), controller.clone())
            })
            .collect()
    }
}

#[tokio::test]
async fn test_schedule_poll_job_against_full_queue() {
    init_test_logging();
    let log = ProcedureLog::new();
    let codec = FaultCodec::new();
    let controller = ControllerFixtures::plain("ctl-m", "line-m");
    let (events, _collector) = collector();

    let config = PolicyFixtures::poller("line-m", PolicyFixtures::no_retry(3)).with_queue_capacity(2);
    let (poller, handle) = Poller::new(config, Box::new(ScriptedMessenger::silent()), events);
    let source = Arc::new(BurstSource {
        codec: codec.clone(),
        log: log.clone(),
        burst: 4,
    });
    let job = Arc::new(PollJob::new(handle.clone(), vec![controller.clone()], source));

    let report = job.perform();
    assert_eq!(report.enqueued, 2);
    assert_eq!(report.rejected, 2);
    assert_eq!(handle.stats().rejected, 2);
    assert_eq!(handle.pending(), 2);
    assert_eq!(log.cleanups(), 2);

    let task = tokio::spawn(poller.run());
    let mut scheduler = Scheduler::new();
    scheduler.add(Cadence::new(Duration::from_millis(20), Duration::ZERO), job);
    let timers = scheduler.start();

    assert!(eventually(WAIT, || timers.firings() >= 3).await);
    let rejected_early = handle.stats().rejected;
    assert!(eventually(WAIT, || timers.firings() >= 8).await);
    assert!(handle.pending() <= 2);
    let rejected_late = handle.stats().rejected;

    timers.shutdown().await;
    handle.shutdown();
    task.await.unwrap();

    assert!(rejected_late > rejected_early);
    let stats = handle.stats();
    assert!(stats.succeeded >= 2);
    assert_eq!(stats.accepted, stats.succeeded + stats.failed + stats.cancelled);
    assert_eq!(u64::from(log.cleanups()), stats.accepted + stats.rejected);
}

// =============================================================================
// Link manager
// =============================================================================

#[tokio::test]
async fn test_manager_routes_and_disables_controllers() {
    let log = ProcedureLog::new();
    let codec = FaultCodec::new();
    let (events, collector) = collector();
    let manager = LinkManager::new(events);

    let north = ControllerFixtures::plain("north", "line-n");
    let south = ControllerFixtures::plain("south", "line-s");
    manager
        .add_link(
            PolicyFixtures::poller("line-n", PolicyFixtures::no_retry(3)),
            Box::new(ScriptedMessenger::silent()),
            vec![north.clone()],
        )
        .unwrap();
    manager
        .add_link(
            PolicyFixtures::poller("line-s", PolicyFixtures::no_retry(3)),
            Box::new(ScriptedMessenger::silent()),
            vec![south.clone()],
        )
        .unwrap();
    assert_eq!(manager.link_count(), 2);

    manager
        .enqueue(ScriptedProcedure::new("n1", Priority::Poll, log.clone()).into_op(codec.clone(), north.clone()))
        .unwrap();
    assert!(manager.set_controller_enabled(&ControllerId::new("south"), false));
    manager
        .enqueue(ScriptedProcedure::new("s1", Priority::Command, log.clone()).into_op(codec.clone(), south.clone()))
        .unwrap();

    let stranger = ControllerFixtures::plain("stranger", "nowhere");
    let err = manager
        .enqueue(ScriptedProcedure::new("x", Priority::Poll, log.clone()).into_op(codec.clone(), stranger))
        .unwrap_err();
    assert!(matches!(err, EnqueueError::UnknownController { .. }));
    assert!(!manager.set_controller_enabled(&ControllerId::new("stranger"), false));

    let settled = eventually(WAIT, || collector.completions().len() == 2).await;
    manager.shutdown().await;
    assert!(settled);

    assert_eq!(log.completed(), vec!["n1"]);
    assert_eq!(log.cleanups(), 3);
    assert_eq!(south.status(), ControllerStatus::Disabled);

    let infos = manager.link_infos();
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].id.as_str(), "line-n");
    assert_eq!(infos[0].stats.succeeded, 1);
    assert_eq!(infos[1].stats.cancelled, 1);
    assert!(infos.iter().all(|i| !i.running));

    let snapshots = manager.controller_snapshots();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].id.as_str(), "north");
}

#[tokio::test]
async fn test_manager_rejects_duplicate_links() {
    let manager = LinkManager::new(Arc::new(EventDispatcher::new()));
    let ctl = ControllerFixtures::plain("only", "line");
    manager
        .add_link(
            PolicyFixtures::poller("line", PolicyFixtures::no_retry(3)),
            Box::new(ScriptedMessenger::silent()),
            vec![ctl.clone()],
        )
        .unwrap();
    assert!(manager
        .add_link(
            PolicyFixtures::poller("line", PolicyFixtures::no_retry(3)),
            Box::new(ScriptedMessenger::silent()),
            Vec::new(),
        )
        .is_err());
    assert!(manager
        .add_link(
            PolicyFixtures::poller("other", PolicyFixtures::no_retry(3)),
            Box::new(ScriptedMessenger::silent()),
            vec![ctl],
        )
        .is_err());
    assert!(manager.remove_link(&"line".into()).await);
    assert_eq!(manager.link_count(), 0);
}
