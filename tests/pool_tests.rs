//! Worker pool lifecycle tests with real threads and short timings.

mod common;

use commonthread::logging::{ChannelSink, Severity};
use commonthread::pool::{Flow, PoolConfig, Role, WorkerPool, WorkerState};
use commonthread::queue::WorkQueue;
use commonthread::scheduler;
use commonthread::constants::MAX_WORKERS_PER_POOL;
use commonthread::CommonThreadError;
use common::{sleep_for, wait_for};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn long_sleep_pool(name: &str, workers: usize) -> WorkerPool {
    WorkerPool::start(
        Role::Task,
        PoolConfig::new(name)
            .with_workers(workers)
            .with_unit_of_work(sleep_for(Duration::from_secs(100))),
    )
    .unwrap()
}

#[test]
fn test_start_spawns_requested_workers() {
    let pool = long_sleep_pool("starter", 4);

    let status = pool.status();
    assert_eq!(status.len(), 4);
    assert!(status.iter().all(|state| state.is_alive()));
    assert_eq!(pool.stats(), 0);
    assert_eq!(pool.target_worker_count(), 4);

    pool.kill();
}

#[test]
fn test_shutdown_leaves_every_slot_dead() {
    let pool = WorkerPool::start(
        Role::Task,
        PoolConfig::new("stopper")
            .with_workers(3)
            .with_unit_of_work(sleep_for(Duration::from_millis(20))),
    )
    .unwrap();

    assert!(wait_for(Duration::from_secs(2), || pool.stats() > 0));
    pool.shutdown();

    assert!(pool.is_shutdown());
    assert_eq!(pool.status(), vec![WorkerState::Dead; 3]);
    assert_eq!(pool.live_workers(), 0);
}

#[test]
fn test_add_then_remove_restores_target() {
    let pool = long_sleep_pool("resizer", 2);

    assert_eq!(pool.add(3), 5);
    assert_eq!(pool.status().len(), 5);
    assert!(wait_for(Duration::from_secs(1), || pool.live_workers() == 5));

    assert_eq!(pool.remove(3), 2);
    assert_eq!(pool.target_worker_count(), 2);

    // Retired slots keep their ids and report dead once their thread leaves
    assert!(wait_for(Duration::from_secs(2), || pool.live_workers() == 2));
    let status = pool.status();
    assert_eq!(status.len(), 5);
    assert!(status[..2].iter().all(|state| state.is_alive()));
    assert!(status[2..].iter().all(|state| *state == WorkerState::Dead));

    // Retired slots above the target are not revived
    assert_eq!(pool.refresh(), 0);

    pool.kill();
}

#[test]
fn test_remove_more_than_target_clamps_to_zero() {
    let pool = long_sleep_pool("drainer", 2);
    assert_eq!(pool.remove(5), 0);
    assert!(wait_for(Duration::from_secs(2), || pool.live_workers() == 0));
    pool.kill();
}

#[test]
fn test_add_beyond_limit_clamps_and_warns() {
    let (sink, entries) = ChannelSink::new(Severity::Warn);
    let pool = WorkerPool::start(
        Role::Task,
        PoolConfig::new("crowded")
            .with_workers(0)
            .with_log(Arc::new(sink))
            .with_unit_of_work(|_ctx| Ok(Flow::Shutdown)),
    )
    .unwrap();

    assert_eq!(pool.add(MAX_WORKERS_PER_POOL), MAX_WORKERS_PER_POOL);
    assert!(entries.try_iter().next().is_none());

    assert_eq!(pool.add(2), MAX_WORKERS_PER_POOL);
    let warning = entries.try_recv().unwrap();
    assert_eq!(warning.level, Severity::Warn);
    assert!(warning.message.contains("Asked to add 2 workers but only 0 fit"));

    pool.kill();
}

#[test]
fn test_ten_consumers_process_ten_items() {
    let queue = Arc::new(WorkQueue::unbounded());
    let pool = WorkerPool::start(
        Role::Consumer,
        PoolConfig::new("sleepy-consumers")
            .with_workers(10)
            .with_queue(Arc::clone(&queue))
            .with_unit_of_work(|ctx| {
                if !ctx.sleep(Duration::from_millis(100)) {
                    return Ok(Flow::Shutdown);
                }
                match ctx.dequeue()? {
                    Some(_) => Ok(Flow::Continue),
                    None => Ok(Flow::Shutdown),
                }
            }),
    )
    .unwrap();

    for n in 0..10 {
        queue.enqueue(json!(n));
    }

    thread::sleep(Duration::from_millis(150));
    assert_eq!(pool.stats(), 10);
    assert!(queue.is_empty());

    // Workers blocked on the empty queue are released without counting
    pool.shutdown();
    assert_eq!(pool.stats(), 10);
    assert_eq!(pool.live_workers(), 0);
}

#[test]
fn test_kill_returns_promptly_and_reports_dead() {
    let pool = WorkerPool::start(
        Role::Task,
        PoolConfig::new("stuck")
            .with_workers(3)
            // Not interruptible, so only kill can stop this quickly
            .with_unit_of_work(|_ctx| {
                thread::sleep(Duration::from_secs(100));
                Ok(Flow::Continue)
            }),
    )
    .unwrap();

    let started = Instant::now();
    pool.kill();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(pool.status(), vec![WorkerState::Dead; 3]);
}

#[test]
fn test_shutdown_timeout_is_not_fatal() {
    let pool = WorkerPool::start(
        Role::Task,
        PoolConfig::new("slowpoke")
            .with_workers(1)
            .with_shutdown_timeout(Duration::from_millis(50))
            .with_unit_of_work(|_ctx| {
                thread::sleep(Duration::from_millis(800));
                Ok(Flow::Continue)
            }),
    )
    .unwrap();

    let started = Instant::now();
    pool.shutdown();
    assert!(started.elapsed() < Duration::from_millis(700));
    assert!(pool.is_shutdown());

    // The worker finishes its iteration and then leaves on its own
    assert!(wait_for(Duration::from_secs(3), || pool.live_workers() == 0));
}

#[test]
fn test_loop_until_stops_pool_by_itself() {
    let pool = WorkerPool::start(
        Role::Producer,
        PoolConfig::new("deadline")
            .with_workers(2)
            .with_loop_until(scheduler::from_now(Duration::from_millis(200)))
            .with_unit_of_work(sleep_for(Duration::from_millis(20))),
    )
    .unwrap();

    assert!(wait_for(Duration::from_secs(3), || pool.live_workers() == 0));
    assert!(pool.is_shutdown());
    assert!(pool.stats() > 0);
}

#[test]
fn test_iteration_failures_are_logged_not_counted() {
    let (sink, entries) = ChannelSink::new(Severity::Error);
    let pool = WorkerPool::start(
        Role::Task,
        PoolConfig::new("failing")
            .with_workers(2)
            .with_application("poller")
            .with_log(Arc::new(sink))
            .with_unit_of_work(|ctx| {
                ctx.sleep(Duration::from_millis(10));
                anyhow::bail!("device unreachable")
            }),
    )
    .unwrap();

    assert!(wait_for(Duration::from_secs(2), || !entries.is_empty()));
    assert_eq!(pool.stats(), 0);
    assert_eq!(pool.live_workers(), 2);

    let entry = entries.recv().unwrap();
    assert_eq!(entry.application, "poller");
    assert_eq!(entry.level, Severity::Error);
    assert!(entry.message.contains("device unreachable"));

    pool.shutdown();
}

#[test]
fn test_dequeue_without_queue_is_an_iteration_failure() {
    let (sink, entries) = ChannelSink::new(Severity::Error);
    let pool = WorkerPool::start(
        Role::Consumer,
        PoolConfig::new("unbound")
            .with_workers(1)
            .with_log(Arc::new(sink))
            .with_unit_of_work(|ctx| {
                ctx.sleep(Duration::from_millis(10));
                ctx.dequeue()?;
                Ok(Flow::Continue)
            }),
    )
    .unwrap();

    assert!(wait_for(Duration::from_secs(2), || !entries.is_empty()));
    assert!(entries
        .recv()
        .unwrap()
        .message
        .contains("No work queue bound to pool unbound"));
    assert_eq!(pool.stats(), 0);

    pool.shutdown();
}

#[test]
fn test_refresh_replaces_panicked_worker() {
    let panicked = Arc::new(AtomicBool::new(false));
    let trigger = Arc::clone(&panicked);
    let pool = WorkerPool::start(
        Role::Task,
        PoolConfig::new("fragile")
            .with_workers(2)
            .with_unit_of_work(move |ctx| {
                if !trigger.swap(true, Ordering::SeqCst) {
                    panic!("worker {} hit a bad record", ctx.worker_id());
                }
                if ctx.sleep(Duration::from_secs(100)) {
                    Ok(Flow::Continue)
                } else {
                    Ok(Flow::Shutdown)
                }
            }),
    )
    .unwrap();

    assert!(wait_for(Duration::from_secs(2), || pool.live_workers() == 1));
    assert!(panicked.load(Ordering::SeqCst));

    assert_eq!(pool.refresh(), 1);
    assert_eq!(pool.status().len(), 2);
    assert!(wait_for(Duration::from_secs(1), || pool.live_workers() == 2));

    pool.shutdown();
    assert_eq!(pool.refresh(), 0);
}

#[test]
fn test_flow_shutdown_exits_only_that_worker() {
    let pool = WorkerPool::start(
        Role::Task,
        PoolConfig::new("quitter")
            .with_workers(3)
            .with_unit_of_work(|ctx| {
                if ctx.worker_id() == 0 {
                    return Ok(Flow::Shutdown);
                }
                if ctx.sleep(Duration::from_secs(100)) {
                    Ok(Flow::Continue)
                } else {
                    Ok(Flow::Shutdown)
                }
            }),
    )
    .unwrap();

    assert!(wait_for(Duration::from_secs(2), || pool.status()[0] == WorkerState::Dead));
    assert_eq!(pool.live_workers(), 2);
    assert!(!pool.is_shutdown());
    assert_eq!(pool.stats(), 0);

    pool.kill();
}

#[test]
fn test_restart_after_shutdown() {
    let pool = long_sleep_pool("phoenix", 2);
    assert_eq!(pool.restart(), 0);

    pool.shutdown();
    assert_eq!(pool.live_workers(), 0);

    assert_eq!(pool.restart(), 2);
    assert!(!pool.is_shutdown());
    assert!(wait_for(Duration::from_secs(1), || pool.live_workers() == 2));

    pool.kill();
}

#[test]
fn test_sleeping_workers_report_sleeping() {
    let pool = long_sleep_pool("dozing", 2);
    assert!(wait_for(Duration::from_secs(1), || {
        pool.status().iter().all(|state| *state == WorkerState::Sleeping)
    }));
    pool.kill();
}

#[test]
fn test_default_producer_and_consumer_share_a_queue() {
    let queue = Arc::new(WorkQueue::unbounded());
    let producer = WorkerPool::producer(
        PoolConfig::new("clock")
            .with_workers(1)
            .with_queue(Arc::clone(&queue))
            .with_producer_interval(Duration::from_millis(50)),
    )
    .unwrap();

    assert!(wait_for(Duration::from_secs(2), || queue.len() >= 2));
    producer.shutdown();
    let produced = queue.len();
    assert_eq!(producer.stats(), produced as u64);

    let consumer = WorkerPool::consumer(
        PoolConfig::new("printer")
            .with_workers(2)
            .with_queue(Arc::clone(&queue)),
    )
    .unwrap();

    assert!(wait_for(Duration::from_secs(2), || queue.is_empty()
        && consumer.stats() == produced as u64));
    consumer.shutdown();
    assert_eq!(consumer.live_workers(), 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let result = WorkerPool::start(
        Role::Task,
        PoolConfig::new("huge").with_workers(MAX_WORKERS_PER_POOL + 1),
    );
    assert!(matches!(result, Err(CommonThreadError::InvalidPool(_))));

    let result = WorkerPool::start(
        Role::Task,
        PoolConfig::new("impatient").with_shutdown_timeout(Duration::ZERO),
    );
    assert!(matches!(result, Err(CommonThreadError::InvalidPool(_))));
}

#[test]
fn test_unnamed_pool_gets_generated_name() {
    let pool = WorkerPool::start(
        Role::Task,
        PoolConfig::default()
            .with_workers(0)
            .with_unit_of_work(sleep_for(Duration::from_secs(1))),
    )
    .unwrap();
    assert!(pool.name().starts_with("task-"));
    assert!(pool.status().is_empty());
}
