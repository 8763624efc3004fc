use rand::Rng;
use std::time::Duration;

use crate::generator::{CrashPoint, CrashPointGenerator};
use crate::types::{GameEvent, Phase, RoundSnapshot, get_current_timestamp};

/// Relative growth applied to the multiplier on every flight tick
pub const FLIGHT_GROWTH_RATE: f64 = 0.006;
/// Constant added to the multiplier on every flight tick
pub const FLIGHT_GROWTH_STEP: f64 = 0.002;
pub const START_MULTIPLIER: f64 = 1.00;

pub const MIN_COUNTDOWN_SECS: u32 = 5;
pub const MAX_COUNTDOWN_SECS: u32 = 10;
pub const MIN_COOLDOWN: Duration = Duration::from_millis(3_000);
pub const MAX_COOLDOWN: Duration = Duration::from_millis(4_000);

const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundConfig {
    /// Seconds the round stays open for bets
    pub countdown_secs: u32,
    /// Period between multiplier updates while flying
    pub tick_interval: Duration,
    /// Pause between the crash and the next countdown
    pub cooldown: Duration,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 8,
            tick_interval: Duration::from_millis(50),
            cooldown: Duration::from_millis(4_000),
        }
    }
}

impl RoundConfig {
    /// Clamps the countdown and cooldown into their supported ranges
    pub fn clamped(self) -> Self {
        Self {
            countdown_secs: self
                .countdown_secs
                .clamp(MIN_COUNTDOWN_SECS, MAX_COUNTDOWN_SECS),
            tick_interval: self.tick_interval.max(Duration::from_millis(1)),
            cooldown: self.cooldown.clamp(MIN_COOLDOWN, MAX_COOLDOWN),
        }
    }
}

/// Handle for the single timer allowed to drive the current phase.
///
/// Each phase entry mints a new handle with a fresh epoch; any handle minted
/// earlier is stale and its firings are ignored.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PhaseTimer {
    epoch: u64,
    phase: Phase,
    period: Duration,
}

impl PhaseTimer {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

/// Result of delivering a timer firing to the scheduler
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The timer belongs to a phase that has already ended
    Stale,
    /// The phase continues under the same timer
    Continue(Vec<GameEvent>),
    /// The round moved to a new phase; the old timer must be dropped and
    /// `timer` installed in its place
    Transition {
        events: Vec<GameEvent>,
        timer: PhaseTimer,
    },
}

impl TickOutcome {
    pub fn events(&self) -> &[GameEvent] {
        match self {
            TickOutcome::Stale => &[],
            TickOutcome::Continue(events) => events,
            TickOutcome::Transition { events, .. } => events,
        }
    }

    pub fn next_timer(&self) -> Option<PhaseTimer> {
        match self {
            TickOutcome::Transition { timer, .. } => Some(*timer),
            _ => None,
        }
    }

    /// Final multiplier if this firing crashed the round
    pub fn crashed_at(&self) -> Option<f64> {
        self.events().iter().find_map(|event| match event {
            GameEvent::Crash { multiplier } => Some(*multiplier),
            _ => None,
        })
    }
}

/// Owns the IDLE -> FLYING -> CRASHED cycle of the one shared round.
///
/// Nothing outside can touch the phase or multiplier directly; the driver
/// calls [`start`](RoundScheduler::start) once and then feeds every timer
/// firing back through [`on_timer`](RoundScheduler::on_timer).
#[derive(Debug, Clone)]
pub struct RoundScheduler {
    config: RoundConfig,
    generator: CrashPointGenerator,

    phase: Phase,
    multiplier: f64,
    /// Hidden from every accessor until the round has crashed
    crash_point: f64,
    overridden: bool,
    countdown: u32,
    started_at: Option<u64>,

    round_id: u64,
    epoch: u64,
}

impl RoundScheduler {
    pub fn new(config: RoundConfig, generator: CrashPointGenerator) -> Self {
        let countdown = config.countdown_secs;
        RoundScheduler {
            config,
            generator,
            phase: Phase::Idle,
            multiplier: START_MULTIPLIER,
            crash_point: START_MULTIPLIER,
            overridden: false,
            countdown,
            started_at: None,
            round_id: 0,
            epoch: 0,
        }
    }

    /// Opens the first round. Calling it again restarts the countdown and
    /// invalidates whatever timer was running.
    pub fn start(&mut self) -> (PhaseTimer, Vec<GameEvent>) {
        self.enter_idle()
    }

    /// Delivers one firing of `timer`.
    pub fn on_timer<R: Rng + ?Sized>(&mut self, timer: &PhaseTimer, rng: &mut R) -> TickOutcome {
        if timer.epoch != self.epoch || timer.phase != self.phase {
            return TickOutcome::Stale;
        }

        match self.phase {
            Phase::Idle => self.countdown_tick(rng),
            Phase::Flying => self.flight_tick(),
            Phase::Crashed => {
                let (timer, events) = self.enter_idle();
                TickOutcome::Transition { events, timer }
            }
        }
    }

    fn countdown_tick<R: Rng + ?Sized>(&mut self, rng: &mut R) -> TickOutcome {
        self.countdown = self.countdown.saturating_sub(1);
        let mut events = vec![GameEvent::TimerUpdate {
            countdown: self.countdown,
        }];

        if self.countdown > 0 {
            return TickOutcome::Continue(events);
        }

        let point = self.generator.next_crash_point(rng);
        let (timer, event) = self.enter_flying(point);
        events.push(event);
        TickOutcome::Transition { events, timer }
    }

    fn flight_tick(&mut self) -> TickOutcome {
        self.multiplier += self.multiplier * FLIGHT_GROWTH_RATE + FLIGHT_GROWTH_STEP;

        if self.multiplier < self.crash_point {
            return TickOutcome::Continue(vec![GameEvent::Tick {
                multiplier: self.multiplier,
            }]);
        }

        let (timer, event) = self.enter_crashed();
        TickOutcome::Transition {
            events: vec![event],
            timer,
        }
    }

    fn enter_idle(&mut self) -> (PhaseTimer, Vec<GameEvent>) {
        self.phase = Phase::Idle;
        self.round_id += 1;
        self.countdown = self.config.countdown_secs;
        self.multiplier = START_MULTIPLIER;
        self.crash_point = START_MULTIPLIER;
        self.overridden = false;
        self.started_at = None;

        let timer = self.install_timer(COUNTDOWN_PERIOD);
        let event = GameEvent::StateChange {
            phase: Phase::Idle,
            countdown: Some(self.countdown),
        };
        (timer, vec![event])
    }

    fn enter_flying(&mut self, point: CrashPoint) -> (PhaseTimer, GameEvent) {
        self.phase = Phase::Flying;
        self.crash_point = point.value;
        self.overridden = point.overridden;
        self.multiplier = START_MULTIPLIER;
        self.started_at = Some(get_current_timestamp());

        let timer = self.install_timer(self.config.tick_interval);
        let event = GameEvent::StateChange {
            phase: Phase::Flying,
            countdown: None,
        };
        (timer, event)
    }

    fn enter_crashed(&mut self) -> (PhaseTimer, GameEvent) {
        self.phase = Phase::Crashed;
        self.multiplier = self.crash_point;

        let timer = self.install_timer(self.config.cooldown);
        let event = GameEvent::Crash {
            multiplier: self.crash_point,
        };
        (timer, event)
    }

    fn install_timer(&mut self, period: Duration) -> PhaseTimer {
        self.epoch += 1;
        PhaseTimer {
            epoch: self.epoch,
            phase: self.phase,
            period,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    pub fn round_id(&self) -> u64 {
        self.round_id
    }

    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// The crash point, only once the round has crashed
    pub fn revealed_crash_point(&self) -> Option<f64> {
        match self.phase {
            Phase::Crashed => Some(self.crash_point),
            _ => None,
        }
    }

    /// Whether the current (or just crashed) round used the admin override
    pub fn is_overridden(&self) -> bool {
        self.overridden && self.phase != Phase::Idle
    }

    pub fn set_override(&mut self, value: f64) -> crate::Result<()> {
        self.generator.set_override(value)
    }

    pub fn pending_override(&self) -> Option<f64> {
        self.generator.pending_override()
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot {
            round_id: self.round_id,
            phase: self.phase,
            multiplier: self.multiplier,
            countdown: self.countdown,
            started_at: self.started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn setup_scheduler() -> (RoundScheduler, StdRng) {
        let config = RoundConfig {
            countdown_secs: 5,
            ..RoundConfig::default()
        };
        (
            RoundScheduler::new(config, CrashPointGenerator::default()),
            StdRng::seed_from_u64(42),
        )
    }

    /// Runs the countdown down to launch and returns the flight timer
    fn launch(scheduler: &mut RoundScheduler, timer: PhaseTimer, rng: &mut StdRng) -> PhaseTimer {
        let mut timer = timer;
        loop {
            match scheduler.on_timer(&timer, rng) {
                TickOutcome::Continue(_) => {}
                TickOutcome::Transition { timer: next, .. } => {
                    timer = next;
                    break;
                }
                TickOutcome::Stale => panic!("countdown timer went stale"),
            }
        }
        assert_eq!(scheduler.phase(), Phase::Flying);
        timer
    }

    /// Flies until the crash, returning every tick multiplier and the cooldown timer
    fn fly(
        scheduler: &mut RoundScheduler,
        timer: PhaseTimer,
        rng: &mut StdRng,
    ) -> (Vec<f64>, f64, PhaseTimer) {
        let mut ticks = Vec::new();
        loop {
            match scheduler.on_timer(&timer, rng) {
                TickOutcome::Continue(events) => {
                    for event in events {
                        if let GameEvent::Tick { multiplier } = event {
                            ticks.push(multiplier);
                        }
                    }
                }
                outcome @ TickOutcome::Transition { .. } => {
                    let crashed = outcome.crashed_at().expect("flight ends with a crash");
                    return (ticks, crashed, outcome.next_timer().unwrap());
                }
                TickOutcome::Stale => panic!("flight timer went stale"),
            }
        }
    }

    #[test]
    fn test_new_scheduler() {
        let (scheduler, _) = setup_scheduler();
        assert_eq!(scheduler.phase(), Phase::Idle);
        assert_eq!(scheduler.multiplier(), 1.0);
        assert_eq!(scheduler.round_id(), 0);
        assert_eq!(scheduler.revealed_crash_point(), None);
    }

    #[test]
    fn test_start_broadcasts_idle_with_countdown() {
        let (mut scheduler, _) = setup_scheduler();
        let (timer, events) = scheduler.start();
        assert_eq!(timer.phase(), Phase::Idle);
        assert_eq!(timer.period(), Duration::from_secs(1));
        assert_eq!(
            events,
            vec![GameEvent::StateChange {
                phase: Phase::Idle,
                countdown: Some(5)
            }]
        );
        assert_eq!(scheduler.round_id(), 1);
    }

    #[test]
    fn test_countdown_ticks_then_launches() {
        let (mut scheduler, mut rng) = setup_scheduler();
        let (timer, _) = scheduler.start();

        for expected in (1..5).rev() {
            let outcome = scheduler.on_timer(&timer, &mut rng);
            assert_eq!(
                outcome,
                TickOutcome::Continue(vec![GameEvent::TimerUpdate {
                    countdown: expected
                }])
            );
        }

        let outcome = scheduler.on_timer(&timer, &mut rng);
        let next = outcome.next_timer().expect("launch installs a flight timer");
        assert_eq!(
            outcome.events(),
            &[
                GameEvent::TimerUpdate { countdown: 0 },
                GameEvent::StateChange {
                    phase: Phase::Flying,
                    countdown: None
                }
            ]
        );
        assert_eq!(next.phase(), Phase::Flying);
        assert_eq!(next.period(), Duration::from_millis(50));
        assert_eq!(scheduler.phase(), Phase::Flying);
        assert_eq!(scheduler.revealed_crash_point(), None);
        assert!(scheduler.snapshot().started_at.is_some());
    }

    #[test]
    fn test_old_timer_is_stale_after_transition() {
        let (mut scheduler, mut rng) = setup_scheduler();
        let (idle_timer, _) = scheduler.start();
        let flight_timer = launch(&mut scheduler, idle_timer, &mut rng);

        assert_eq!(scheduler.on_timer(&idle_timer, &mut rng), TickOutcome::Stale);
        assert_ne!(idle_timer.epoch(), flight_timer.epoch());

        // restarting invalidates the flight timer as well
        let (restarted, _) = scheduler.start();
        assert_eq!(scheduler.on_timer(&flight_timer, &mut rng), TickOutcome::Stale);
        assert_eq!(restarted.phase(), Phase::Idle);
    }

    #[test]
    fn test_flight_strictly_increasing_and_stops_at_crash_point() {
        let (mut scheduler, mut rng) = setup_scheduler();
        scheduler.set_override(3.0).unwrap();
        let (timer, _) = scheduler.start();
        let flight = launch(&mut scheduler, timer, &mut rng);

        let (ticks, crashed, cooldown) = fly(&mut scheduler, flight, &mut rng);
        assert_eq!(crashed, 3.0);
        assert!(!ticks.is_empty());
        assert!(ticks.windows(2).all(|pair| pair[1] > pair[0]));
        assert!(ticks.iter().all(|m| *m < 3.0));
        assert_eq!(scheduler.phase(), Phase::Crashed);
        assert_eq!(scheduler.revealed_crash_point(), Some(3.0));
        assert!(scheduler.is_overridden());

        // the next growth step from the last broadcast value reaches the crash point
        let last = *ticks.last().unwrap();
        assert!(last + last * FLIGHT_GROWTH_RATE + FLIGHT_GROWTH_STEP >= 3.0);

        // the flight timer is dead once crashed
        assert_eq!(scheduler.on_timer(&flight, &mut rng), TickOutcome::Stale);
        assert_eq!(cooldown.phase(), Phase::Crashed);
        assert_eq!(cooldown.period(), Duration::from_millis(4_000));
    }

    #[test]
    fn test_instant_crash_emits_no_ticks() {
        let (mut scheduler, mut rng) = setup_scheduler();
        scheduler.set_override(1.0).unwrap();
        let (timer, _) = scheduler.start();
        let flight = launch(&mut scheduler, timer, &mut rng);

        let (ticks, crashed, _) = fly(&mut scheduler, flight, &mut rng);
        assert!(ticks.is_empty());
        assert_eq!(crashed, 1.0);
    }

    #[test]
    fn test_cooldown_returns_to_idle() {
        let (mut scheduler, mut rng) = setup_scheduler();
        scheduler.set_override(1.2).unwrap();
        let (timer, _) = scheduler.start();
        let flight = launch(&mut scheduler, timer, &mut rng);
        let (_, _, cooldown) = fly(&mut scheduler, flight, &mut rng);

        let outcome = scheduler.on_timer(&cooldown, &mut rng);
        assert_eq!(
            outcome.events(),
            &[GameEvent::StateChange {
                phase: Phase::Idle,
                countdown: Some(5)
            }]
        );
        assert_eq!(scheduler.phase(), Phase::Idle);
        assert_eq!(scheduler.multiplier(), 1.0);
        assert_eq!(scheduler.round_id(), 2);
        assert!(!scheduler.is_overridden());
        assert_eq!(scheduler.revealed_crash_point(), None);
    }

    #[test]
    fn test_override_applies_to_one_round_only() {
        let (mut scheduler, mut rng) = setup_scheduler();
        let (timer, _) = scheduler.start();

        scheduler.set_override(2.5).unwrap();
        let flight = launch(&mut scheduler, timer, &mut rng);
        assert_eq!(scheduler.pending_override(), None);

        // set mid-flight, must not touch the current round
        scheduler.set_override(7.0).unwrap();
        let (_, crashed, cooldown) = fly(&mut scheduler, flight, &mut rng);
        assert_eq!(crashed, 2.5);

        let idle = scheduler.on_timer(&cooldown, &mut rng).next_timer().unwrap();
        let flight = launch(&mut scheduler, idle, &mut rng);
        let (_, crashed, _) = fly(&mut scheduler, flight, &mut rng);
        assert_eq!(crashed, 7.0);
    }

    #[test]
    fn test_config_clamped() {
        let config = RoundConfig {
            countdown_secs: 30,
            tick_interval: Duration::ZERO,
            cooldown: Duration::from_millis(100),
        }
        .clamped();
        assert_eq!(config.countdown_secs, MAX_COUNTDOWN_SECS);
        assert_eq!(config.tick_interval, Duration::from_millis(1));
        assert_eq!(config.cooldown, MIN_COOLDOWN);
    }
}
