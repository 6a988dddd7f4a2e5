//! Default units of work for each role.

use chrono::{Local, NaiveTime};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::{Flow, PoolConfig, Role, UnitOfWork, WorkerContext};
use crate::logging::Severity;
use crate::scheduler;

pub(crate) fn default_unit_of_work(role: Role, config: &PoolConfig) -> UnitOfWork {
    match role {
        Role::Producer => {
            let interval = config.producer_interval;
            Arc::new(move |ctx: &WorkerContext| produce_timestamp(ctx, interval))
        }
        Role::Consumer => {
            let idle_interval = config.consumer_idle_interval;
            Arc::new(move |ctx: &WorkerContext| consume_one(ctx, idle_interval))
        }
        Role::Task => {
            let daily_at = config.task_daily_at;
            Arc::new(move |ctx: &WorkerContext| report_daily(ctx, daily_at))
        }
    }
}

/// Wait for the next interval boundary, then enqueue a timestamp (or print it)
fn produce_timestamp(ctx: &WorkerContext, interval: Duration) -> anyhow::Result<Flow> {
    if !ctx.every(interval) {
        return Ok(Flow::Shutdown);
    }

    let now = Local::now().to_rfc3339();
    if ctx.queue().is_none() {
        println!("{} => {}", ctx.worker_id(), now);
        return Ok(Flow::Continue);
    }

    ctx.log(Severity::Debug, format!("Producer: Queueing {now}"));
    if ctx.enqueue(json!(now))? {
        Ok(Flow::Continue)
    } else {
        Ok(Flow::Shutdown)
    }
}

/// Block for one item and print it; without a queue, tick at the idle interval
fn consume_one(ctx: &WorkerContext, idle_interval: Duration) -> anyhow::Result<Flow> {
    if ctx.queue().is_none() {
        if !ctx.every(idle_interval) {
            return Ok(Flow::Shutdown);
        }
        println!("{} => {}", ctx.worker_id(), Local::now().to_rfc3339());
        return Ok(Flow::Continue);
    }

    match ctx.dequeue()? {
        Some(item) => {
            ctx.log(Severity::Debug, format!("Consumer: Processing {item}"));
            println!("{item}");
            Ok(Flow::Continue)
        }
        None => Ok(Flow::Shutdown),
    }
}

/// Wait for the daily report time, then log aggregated status and stats
fn report_daily(ctx: &WorkerContext, daily_at: NaiveTime) -> anyhow::Result<Flow> {
    // A time skipped by a DST jump does not exist today; try again in an hour.
    let target = scheduler::today_at(daily_at)
        .unwrap_or_else(|_| scheduler::from_now(scheduler::hours(1)));
    if !ctx.at(target) {
        return Ok(Flow::Shutdown);
    }

    match ctx.diagnostics() {
        Some(diagnostics) => {
            let status = serde_json::to_string_pretty(&diagnostics.status_report())?;
            let stats = serde_json::to_string_pretty(&diagnostics.stats_report())?;
            ctx.log(Severity::Info, format!("Task: Controller Status\n{status}"));
            ctx.log(Severity::Info, format!("Task: Controller Stats\n{stats}"));
        }
        None => {
            ctx.log(
                Severity::Info,
                format!(
                    "Task: Pool {} has processed {} jobs",
                    ctx.pool_name(),
                    ctx.jobs_processed().read()
                ),
            );
        }
    }
    Ok(Flow::Continue)
}
