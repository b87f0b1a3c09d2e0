use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use super::{ExecutorReport, ScenarioEnv, Vu};
use crate::schedule::RampSchedule;
use crate::signal::StopSignal;

const TICK: Duration = Duration::from_millis(10);

/// Hands arrival tickets to idle workers.
///
/// `idle` counts workers parked in `next_ticket`; the scheduler reserves one with
/// `try_reserve_idle` and then adds a permit, so permits never outnumber parked workers.
#[derive(Debug)]
struct TicketDesk {
    idle: AtomicU64,
    tickets: Semaphore,
    closed: StopSignal,
}

impl TicketDesk {
    fn new() -> Self {
        Self {
            idle: AtomicU64::new(0),
            tickets: Semaphore::new(0),
            closed: StopSignal::new(),
        }
    }

    fn try_reserve_idle(&self) -> bool {
        self.idle
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    fn hand_out(&self) {
        self.tickets.add_permits(1);
    }

    /// Parks until a ticket arrives (`true`) or the desk closes (`false`).
    async fn next_ticket(&self) -> bool {
        self.idle.fetch_add(1, Ordering::AcqRel);
        tokio::select! {
            biased;
            permit = self.tickets.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    true
                }
                Err(_) => false,
            },
            _ = self.closed.wait() => false,
        }
    }
}

async fn worker(vu: Vu, desk: Arc<TicketDesk>, stop: Arc<StopSignal>, first_ticket: bool) {
    if first_ticket && !stop.is_fired() {
        vu.invoke_next().await;
    }

    while desk.next_ticket().await {
        // A ticket taken after stop is discarded, not run.
        if stop.is_fired() {
            break;
        }
        vu.invoke_next().await;
    }
}

/// Offers `schedule.arrivals_due(elapsed)` invocations, recomputed every tick.
///
/// Each ticket goes to an idle worker; with none idle a new worker is spawned carrying the
/// ticket, up to `max_vus`. Beyond that the ticket is dropped and counted in
/// `dropped_iterations`. Over a full run `started + dropped` equals the schedule's arrivals.
pub(super) async fn run(
    schedule: RampSchedule,
    time_unit: Duration,
    pre_allocated_vus: u64,
    max_vus: u64,
    env: Arc<ScenarioEnv>,
) -> ExecutorReport {
    let desk = Arc::new(TicketDesk::new());
    let mut workers = JoinSet::new();
    let mut spawned: u64 = 0;

    let spawn = |workers: &mut JoinSet<()>, spawned: &mut u64, first_ticket: bool| {
        *spawned += 1;
        let vu = Vu::new(env.clone(), *spawned);
        workers.spawn(worker(vu, desk.clone(), env.stop.clone(), first_ticket));
    };

    for _ in 0..pre_allocated_vus {
        spawn(&mut workers, &mut spawned, false);
    }

    let total = schedule.total_duration();
    let started = Instant::now();
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut offered: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = env.stop.wait() => break,
            _ = interval.tick() => {}
        }

        let elapsed = started.elapsed().min(total);
        let due = schedule.arrivals_due(elapsed, time_unit);

        let mut dropped: u64 = 0;
        for _ in offered..due {
            if desk.try_reserve_idle() {
                desk.hand_out();
            } else if spawned < max_vus {
                spawn(&mut workers, &mut spawned, true);
            } else {
                dropped += 1;
                env.builtins.dropped_iterations.add(1);
                env.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        if due > offered {
            offered = due;
        }
        if dropped > 0 {
            tracing::debug!(
                scenario = %env.name,
                dropped,
                max_vus,
                "arrival tickets dropped: no worker capacity"
            );
        }

        if elapsed >= total {
            break;
        }
    }

    tracing::debug!(scenario = %env.name, offered, "arrival schedule finished");

    desk.closed.fire();
    while let Some(res) = workers.join_next().await {
        if let Err(err) = res
            && err.is_panic()
        {
            tracing::error!(scenario = %env.name, error = %err, "worker panicked");
        }
    }

    env.stats.report(env.stop.is_fired())
}
