//! Controller registry, aggregation and cascade tests.

mod common;

use commonthread::controller::{Controller, ControllerStatus};
use commonthread::pool::{Flow, PoolConfig, Role, WorkerPool, WorkerState};
use commonthread::queue::WorkQueue;
use common::{sleep_for, wait_for};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn alive_or_dead(states: &[WorkerState]) -> Vec<&'static str> {
    states.iter().map(WorkerState::as_str).collect()
}

#[test]
fn test_producer_and_consumer_status_through_shutdown() {
    let controller = Controller::new("test");
    let queue = controller.add_queue("work", Arc::new(WorkQueue::unbounded()));

    let producer = WorkerPool::producer(
        PoolConfig::new("p")
            .with_workers(1)
            .with_queue(Arc::clone(&queue))
            .with_unit_of_work(|ctx| {
                if !ctx.sleep(Duration::from_millis(50)) {
                    return Ok(Flow::Shutdown);
                }
                Ok(if ctx.enqueue(json!("tick"))? {
                    Flow::Continue
                } else {
                    Flow::Shutdown
                })
            }),
    )
    .unwrap();
    let consumer = WorkerPool::consumer(
        PoolConfig::new("c")
            .with_workers(1)
            .with_queue(Arc::clone(&queue))
            .with_unit_of_work(|ctx| {
                if !ctx.sleep(Duration::from_millis(50)) {
                    return Ok(Flow::Shutdown);
                }
                Ok(match ctx.dequeue()? {
                    Some(_) => Flow::Continue,
                    None => Flow::Shutdown,
                })
            }),
    )
    .unwrap();
    controller.add_producer("sample_producer", producer);
    controller.add_consumer("sample_consumer", consumer);

    let status = controller.status();
    assert_eq!(status.producers.len(), 1);
    assert_eq!(status.consumers.len(), 1);
    for states in [&status.producers["sample_producer"], &status.consumers["sample_consumer"]] {
        assert_eq!(states.len(), 1);
        assert!(matches!(states[0], WorkerState::Running | WorkerState::Sleeping));
    }
    assert!(status.tasks.is_empty());

    controller.shutdown();
    let status = controller.status();
    assert_eq!(alive_or_dead(&status.producers["sample_producer"]), vec!["dead"]);
    assert_eq!(alive_or_dead(&status.consumers["sample_consumer"]), vec!["dead"]);
    assert_eq!(status.queues["work"], format!("Waiting: 0  Length: {}", queue.len()));
}

#[test]
fn test_stats_aggregate_by_category() {
    let controller = Controller::new("test");
    let pool = controller.add_task(
        "ticker",
        WorkerPool::task(
            PoolConfig::new("ticker")
                .with_workers(2)
                .with_unit_of_work(sleep_for(Duration::from_millis(10))),
        )
        .unwrap(),
    );

    assert!(wait_for(Duration::from_secs(2), || pool.stats() >= 4));
    controller.shutdown();

    let stats = controller.stats();
    assert_eq!(stats.tasks["ticker"], pool.stats());
    assert!(stats.producers.is_empty());
    assert!(stats.consumers.is_empty());
    assert_eq!(stats.total(), pool.stats());
}

#[test]
fn test_kill_cascades_without_waiting() {
    let controller = Controller::new("test");
    for role in Role::all() {
        let config = PoolConfig::new(format!("{role}-stuck"))
            .with_workers(2)
            .with_unit_of_work(|_ctx| {
                std::thread::sleep(Duration::from_secs(100));
                Ok(Flow::Continue)
            });
        let name = config.name.clone();
        controller.add_pool(role, &name, WorkerPool::start(role, config).unwrap());
    }

    let started = Instant::now();
    controller.kill();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(controller.live_workers(), 0);

    let status = controller.status();
    for role in Role::all() {
        assert_eq!(status.pools(role).len(), 1);
        assert!(status
            .pools(role)
            .values()
            .all(|states| states.iter().all(|state| *state == WorkerState::Dead)));
    }
}

#[test]
fn test_create_pool_binds_default_queue() {
    let controller = Controller::new("test");
    let queue = controller.create_queue("timestamps", Some(100));

    let config = controller
        .pool_config("clock")
        .unwrap()
        .with_workers(1)
        .with_producer_interval(Duration::from_millis(50));
    let producer = controller.create_pool(Role::Producer, "clock", config).unwrap();
    assert!(Arc::ptr_eq(producer.queue().unwrap(), &queue));

    assert!(wait_for(Duration::from_secs(2), || !queue.is_empty()));
    assert!(controller.shutdown_pool(Role::Producer, "clock"));
    assert_eq!(producer.live_workers(), 0);
    assert_eq!(controller.stats().producers["clock"], queue.len() as u64);
}

#[test]
fn test_del_pool_unregisters_without_stopping() {
    let controller = Controller::new("test");
    let pool = controller.add_consumer(
        "orphan",
        WorkerPool::consumer(
            PoolConfig::new("orphan")
                .with_workers(1)
                .with_unit_of_work(sleep_for(Duration::from_secs(100))),
        )
        .unwrap(),
    );

    let removed = controller.del_consumer("orphan").unwrap();
    assert_eq!(removed.id(), pool.id());
    assert!(controller.find_consumer("orphan").is_none());

    // Cascades only reach registered pools
    controller.kill();
    assert_eq!(pool.live_workers(), 1);

    pool.kill();
}

#[test]
fn test_refresh_covers_every_pool() {
    let controller = Controller::new("test");
    let quit_once = Arc::new(AtomicBool::new(false));
    let pool = controller.add_producer(
        "flaky",
        WorkerPool::producer(
            PoolConfig::new("flaky")
                .with_workers(2)
                .with_unit_of_work(move |ctx| {
                    if ctx.worker_id() == 1 && !quit_once.swap(true, Ordering::SeqCst) {
                        return Ok(Flow::Shutdown);
                    }
                    if ctx.sleep(Duration::from_millis(20)) {
                        Ok(Flow::Continue)
                    } else {
                        Ok(Flow::Shutdown)
                    }
                }),
        )
        .unwrap(),
    );

    assert!(wait_for(Duration::from_secs(2), || pool.live_workers() == 1));
    assert!(wait_for(Duration::from_secs(2), || pool.stats() > 0));
    assert_eq!(controller.refresh(), 1);
    assert!(wait_for(Duration::from_secs(1), || pool.live_workers() == 2));

    controller.shutdown();
    assert_eq!(controller.refresh(), 0);
}

#[test]
fn test_status_serializes_with_lowercase_states() {
    let controller = Controller::new("test");
    controller.create_queue("work", None);
    let pool = controller.add_task(
        "nap",
        WorkerPool::task(
            PoolConfig::new("nap")
                .with_workers(1)
                .with_unit_of_work(sleep_for(Duration::from_secs(100))),
        )
        .unwrap(),
    );
    pool.kill();

    let value = serde_json::to_value(controller.status()).unwrap();
    assert_eq!(value["tasks"]["nap"], json!(["dead"]));
    assert_eq!(value["queues"]["work"], json!("Waiting: 0  Length: 0"));

    let round_trip: ControllerStatus = serde_json::from_value(value).unwrap();
    assert_eq!(round_trip.tasks["nap"], vec![WorkerState::Dead]);
}

#[test]
fn test_controller_handles_share_registries() {
    let controller = Controller::new("shared");
    let remote = controller.clone();

    let handle = std::thread::spawn(move || {
        remote.create_queue("from-remote", None);
        remote.queue_names()
    });
    assert_eq!(handle.join().unwrap(), vec!["from-remote"]);
    assert!(controller.find_queue("from-remote").is_some());
    assert_eq!(controller.application(), "shared");
}
