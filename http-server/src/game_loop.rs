use crash_engine::round::{PhaseTimer, TickOutcome};
use crash_engine::types::{GameEvent, HistoryEntry, Phase};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::AppState;

/// Drives the round forever: one interval per phase, rebuilt on every
/// transition so the previous phase's ticking ends with it.
pub async fn run(state: AppState) {
    let (mut timer, events) = state.engine().start();
    publish(&state, events);
    let mut interval = phase_interval(&timer);

    loop {
        interval.tick().await;

        let fired = {
            let mut engine = state.engine();
            let outcome = engine.on_timer(&timer);
            let crashed = outcome
                .crashed_at()
                .and_then(|_| engine.history().latest().copied());
            let overridden = engine.scheduler().is_overridden();
            (outcome, engine.snapshot().round_id, crashed, overridden)
        };
        let (outcome, round_id, crashed, overridden) = fired;

        let next = match outcome {
            TickOutcome::Stale => {
                debug!(epoch = timer.epoch(), "stale phase timer fired");
                continue;
            }
            TickOutcome::Continue(events) => {
                publish(&state, events);
                None
            }
            TickOutcome::Transition { events, timer } => {
                log_transition(round_id, &events, overridden);
                publish(&state, events);
                Some(timer)
            }
        };

        if let Some(entry) = crashed {
            persist_crash(&state, entry);
        }

        if let Some(next) = next {
            timer = next;
            interval = phase_interval(&timer);
        }
    }
}

fn phase_interval(timer: &PhaseTimer) -> Interval {
    let mut interval = time::interval_at(Instant::now() + timer.period(), timer.period());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn publish(state: &AppState, events: Vec<GameEvent>) {
    for event in events {
        state.broadcast(event);
    }
}

fn log_transition(round_id: u64, events: &[GameEvent], overridden: bool) {
    for event in events {
        match event {
            GameEvent::StateChange {
                phase: Phase::Flying,
                ..
            } => {
                if overridden {
                    warn!(round_id, "round launched with admin crash point");
                } else {
                    info!(round_id, "round launched");
                }
            }
            GameEvent::Crash { multiplier } => {
                info!(round_id, multiplier, "round crashed");
            }
            GameEvent::StateChange {
                phase: Phase::Idle,
                countdown,
            } => {
                debug!(round_id, ?countdown, "betting open");
            }
            _ => {}
        }
    }
}

/// Best-effort history write. Runs detached so a slow or failing store never
/// delays the next tick.
fn persist_crash(state: &AppState, entry: HistoryEntry) {
    let db = state.db.clone();
    tokio::spawn(async move {
        if let Err(err) = db.insert_history(entry).await {
            error!(multiplier = entry.multiplier, %err, "failed to persist crash history");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::Database;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_a_full_round() {
        let config = Config {
            countdown_secs: 5,
            cooldown_ms: 3_000,
            rng_seed: Some(11),
            ..Config::default()
        };
        let state = AppState::new(config, Database::open_in_memory().unwrap());
        let mut events = state.events.subscribe();
        state.engine().set_override(1.5).unwrap();

        let handle = tokio::spawn(run(state.clone()));

        let mut received = Vec::new();
        loop {
            let event = time::timeout(Duration::from_secs(60), events.recv())
                .await
                .expect("round stalled")
                .unwrap();
            let reopened = matches!(
                event,
                GameEvent::StateChange {
                    phase: Phase::Idle,
                    ..
                }
            ) && !received.is_empty();
            received.push(event);
            if reopened {
                break;
            }
        }
        handle.abort();

        assert_eq!(
            received[0],
            GameEvent::StateChange {
                phase: Phase::Idle,
                countdown: Some(5)
            }
        );
        let countdown: Vec<u32> = received
            .iter()
            .filter_map(|event| match event {
                GameEvent::TimerUpdate { countdown } => Some(*countdown),
                _ => None,
            })
            .collect();
        assert_eq!(countdown, vec![4, 3, 2, 1, 0]);

        let ticks: Vec<f64> = received
            .iter()
            .filter_map(|event| match event {
                GameEvent::Tick { multiplier } => Some(*multiplier),
                _ => None,
            })
            .collect();
        assert!(!ticks.is_empty());
        assert!(ticks.windows(2).all(|pair| pair[1] > pair[0]));
        assert!(ticks.iter().all(|m| *m < 1.5));

        let crash_at = received
            .iter()
            .position(|event| *event == GameEvent::Crash { multiplier: 1.5 })
            .expect("crash broadcast");
        assert_eq!(
            received[crash_at + 1],
            GameEvent::HistoryUpdate {
                sequence: vec![1.5]
            }
        );
        // nothing but the reopening follows the crash
        assert_eq!(received.len(), crash_at + 3);
    }
}
