//! Unit tests for ps-sched.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ps_core::{Day, GblAddr, InteractantId, Rank, SimRng};

use crate::{Agent, AgentCtx, MainLoop, Yield};

// ── Helpers ───────────────────────────────────────────────────────────────────

type Log = Arc<Mutex<Vec<(String, Day)>>>;

/// Agent that logs every resumption and replays a fixed list of yields.
struct Scripted {
    name:  String,
    steps: VecDeque<Yield>,
    log:   Log,
}

impl Scripted {
    fn new(name: &str, steps: &[Yield], log: &Log) -> Self {
        Self { name: name.to_owned(), steps: steps.iter().copied().collect(), log: Arc::clone(log) }
    }
}

impl Agent for Scripted {
    type Message = ();

    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut AgentCtx<'_, Self>) -> Yield {
        self.log.lock().unwrap().push((self.name.clone(), ctx.now()));
        self.steps.pop_front().unwrap_or(Yield::Done)
    }
}

fn patch() -> GblAddr {
    GblAddr::patch(Rank(0), 0)
}

fn new_loop<A: Agent>() -> MainLoop<A> {
    MainLoop::new(patch(), Day::ZERO, SimRng::new(7), 10_000)
}

fn entries(log: &Log) -> Vec<(String, u64)> {
    log.lock().unwrap().iter().map(|(n, d)| (n.clone(), d.0)).collect()
}

// ── Sequencer ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod sequencer {
    use ps_core::{Day, KernelError};

    use crate::Sequencer;

    #[test]
    fn fifo_within_a_day() {
        let mut s = Sequencer::new(Day::ZERO);
        s.enqueue("a", Day(0)).unwrap();
        s.enqueue("b", Day(0)).unwrap();
        assert_eq!(s.next(), Some(("a", Day(0))));
        assert_eq!(s.now(), Day(0));
        assert_eq!(s.next(), Some(("b", Day(0))));
        assert_eq!(s.now(), Day(0));
        assert!(s.next().is_none());
    }

    #[test]
    fn cursor_jumps_to_next_queued_day() {
        let mut s = Sequencer::new(Day::ZERO);
        s.enqueue('x', Day(3)).unwrap();
        assert_eq!(s.next_ready(), Some(('x', Day(3))));
        assert_eq!(s.now(), Day(3));
    }

    #[test]
    fn enqueue_in_the_past_fails() {
        let mut s = Sequencer::new(Day(5));
        let err = s.enqueue(1, Day(4)).unwrap_err();
        assert!(matches!(err, KernelError::TemporalViolation { when: Day(4), now: Day(5) }));
        assert!(s.enqueue(1, Day(5)).is_ok());
        assert!(s.enqueue(2, Day(9)).is_ok());
        assert_eq!(s.len(), 2);
        assert_eq!(s.day_count(), 2);
    }

    #[test]
    fn time_range_ignores_timeless_entries() {
        let mut s = Sequencer::new(Day::ZERO);
        s.enqueue(("clock", true), Day(0)).unwrap();
        s.enqueue(("patient", false), Day(4)).unwrap();
        s.enqueue(("gate", true), Day(9)).unwrap();

        let r = s.time_range(|&(_, timeless)| !timeless, false);
        assert_eq!(r.earliest_relevant, Some(Day(4)));
        assert_eq!(r.latest, Some(Day(9)));

        // A timeless holder with real waiters pins the range to today.
        let r = s.time_range(|&(_, timeless)| !timeless, true);
        assert_eq!(r.earliest_relevant, Some(Day(0)));
    }

    #[test]
    fn bump_moves_today_to_front_of_tomorrow() {
        let mut s = Sequencer::new(Day::ZERO);
        s.enqueue(("gate", true), Day(0)).unwrap();
        s.enqueue(("patient", false), Day(1)).unwrap();

        assert!(s.bump_if_all_timeless(|&(_, t)| t, false));
        assert_eq!(s.now(), Day(1));
        let order: Vec<_> = s.queued_on(Day(1)).map(|&(n, _)| n).collect();
        assert_eq!(order, vec!["gate", "patient"]);
    }

    #[test]
    fn no_bump_when_contended_or_busy() {
        let mut s = Sequencer::new(Day::ZERO);
        s.enqueue(("gate", true), Day(0)).unwrap();
        assert!(!s.bump_if_all_timeless(|&(_, t)| t, true));

        s.enqueue(("patient", false), Day(0)).unwrap();
        assert!(!s.bump_if_all_timeless(|&(_, t)| t, false));
        assert_eq!(s.now(), Day(0));
    }
}

// ── Interactant ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod interactant {
    use std::collections::VecDeque;

    use proptest::prelude::*;
    use ps_core::{AgentKey, GateId, KernelError};

    use crate::{Holder, InteractantTable, LockOutcome, UnlockOutcome};

    #[test]
    fn fast_lock_and_relock() {
        let mut t = InteractantTable::new();
        let bed = t.add("bed");
        assert_eq!(t.lock(bed, AgentKey(1), false).unwrap(), LockOutcome::Granted);
        assert_eq!(t.lock(bed, AgentKey(1), false).unwrap(), LockOutcome::Granted);
        assert_eq!(t.get(bed).unwrap().queue_len(), 0);
        assert_eq!(t.unlock(bed, AgentKey(1)).unwrap(), UnlockOutcome::Released);
        assert!(t.get(bed).unwrap().is_free());
    }

    #[test]
    fn contended_lock_queues_and_hands_off() {
        let mut t = InteractantTable::new();
        let bed = t.add("bed");
        t.lock(bed, AgentKey(1), false).unwrap();
        assert_eq!(t.lock(bed, AgentKey(2), false).unwrap(), LockOutcome::Queued);
        assert_eq!(t.lock(bed, AgentKey(3), true).unwrap(), LockOutcome::Queued);
        assert_eq!(t.n_waiting(bed).unwrap(), 1);
        assert!(t.any_contention());

        assert_eq!(t.unlock(bed, AgentKey(1)).unwrap(), UnlockOutcome::HandedOff(AgentKey(2)));
        assert_eq!(t.n_waiting(bed).unwrap(), 0);
        assert_eq!(t.get(bed).unwrap().holder(), Some(Holder::Agent { key: AgentKey(2), timeless: false }));
    }

    #[test]
    fn unlock_by_non_holder_is_fatal() {
        let mut t = InteractantTable::new();
        let bed = t.add("bed");
        let err = t.unlock(bed, AgentKey(4)).unwrap_err();
        assert!(matches!(err, KernelError::LockOwnershipViolation { .. }));

        t.lock(bed, AgentKey(1), false).unwrap();
        assert!(t.unlock(bed, AgentKey(2)).is_err());
    }

    #[test]
    fn unknown_interactant() {
        let mut t = InteractantTable::new();
        assert!(matches!(
            t.lock(ps_core::InteractantId(3), AgentKey(0), false),
            Err(KernelError::UnknownInteractant(_))
        ));
    }

    #[test]
    fn gate_entrance_is_timeless_contention() {
        let mut t = InteractantTable::new();
        let door = t.add_gate_entrance("door", GateId(0));
        assert_eq!(t.lock(door, AgentKey(5), false).unwrap(), LockOutcome::Queued);
        assert!(t.timeless_contention());
        assert_eq!(t.drain_waiters(door).unwrap(), vec![AgentKey(5)]);
        assert!(!t.timeless_contention());
        assert_eq!(t.get(door).unwrap().holder(), Some(Holder::Gate(GateId(0))));
    }

    #[test]
    fn first_free_skips_held_and_queued() {
        let mut t = InteractantTable::new();
        let a = t.add("a");
        let b = t.add("b");
        let c = t.add("c");
        t.lock(a, AgentKey(0), false).unwrap();
        assert_eq!(t.first_free(&[a, b, c]), Ok(b));
        t.lock(b, AgentKey(1), false).unwrap();
        t.lock(c, AgentKey(2), false).unwrap();
        assert_eq!(t.first_free(&[a, b, c]).unwrap_err().searched, 3);
    }

    #[test]
    fn payload_roundtrip_and_census() {
        let mut t = InteractantTable::new();
        let ward = t.add_with_payload("ward", vec![true, false, true]);
        t.get_mut(ward).unwrap().payload_mut::<Vec<bool>>().unwrap()[1] = true;
        assert_eq!(t.get(ward).unwrap().payload::<Vec<bool>>(), Some(&vec![true, true, true]));
        assert!(t.get(ward).unwrap().payload::<u32>().is_none());

        t.lock(ward, AgentKey(9), false).unwrap();
        let census = t.census();
        assert_eq!(census.len(), 1);
        assert_eq!(census[0].name, "ward");
        assert_eq!(census[0].holder.and_then(Holder::agent), Some(AgentKey(9)));
    }

    proptest! {
        /// Model check: at most one holder, and grants follow lock order.
        #[test]
        fn mutual_exclusion_and_fifo(ops in prop::collection::vec((0u64..5, any::<bool>()), 1..200)) {
            let mut t = InteractantTable::new();
            let id = t.add("r");
            let mut holder: Option<u64> = None;
            let mut queue: VecDeque<u64> = VecDeque::new();
            let mut requested = 0usize;
            let mut granted = 0usize;

            for (agent, want_lock) in ops {
                // A suspended waiter cannot act until it is granted.
                if queue.contains(&agent) {
                    continue;
                }
                if want_lock {
                    if holder == Some(agent) {
                        continue;
                    }
                    requested += 1;
                    match t.lock(id, AgentKey(agent), false).unwrap() {
                        LockOutcome::Granted => {
                            prop_assert!(holder.is_none());
                            holder = Some(agent);
                            granted += 1;
                        }
                        LockOutcome::Queued => queue.push_back(agent),
                    }
                } else if holder == Some(agent) {
                    match t.unlock(id, AgentKey(agent)).unwrap() {
                        UnlockOutcome::Released => {
                            prop_assert!(queue.is_empty());
                            holder = None;
                        }
                        UnlockOutcome::HandedOff(next) => {
                            prop_assert_eq!(Some(next.0), queue.pop_front());
                            holder = Some(next.0);
                            granted += 1;
                        }
                    }
                }
                let item = t.get(id).unwrap();
                prop_assert_eq!(item.holder().and_then(Holder::agent).map(|k| k.0), holder);
                prop_assert!(item.holder().is_some() || item.queue_len() == 0);
                prop_assert_eq!(item.queue_len(), queue.len());
            }

            // Release everything: every outstanding request is served.
            while let Some(h) = holder {
                match t.unlock(id, AgentKey(h)).unwrap() {
                    UnlockOutcome::Released => holder = None,
                    UnlockOutcome::HandedOff(next) => {
                        prop_assert_eq!(Some(next.0), queue.pop_front());
                        holder = Some(next.0);
                        granted += 1;
                    }
                }
            }
            prop_assert_eq!(requested, granted);
        }
    }
}

// ── MainLoop ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod main_loop {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ps_core::KernelError;

    use super::*;
    use crate::{Runnable, Slice, TickInfo};

    #[test]
    fn agents_run_in_enqueue_order() {
        let log = Log::default();
        let mut ml = new_loop::<Scripted>();
        ml.spawn(Scripted::new("a", &[Yield::Sleep(2)], &log), Day(0)).unwrap();
        ml.spawn(Scripted::new("b", &[Yield::Sleep(1)], &log), Day(0)).unwrap();

        assert_eq!(ml.run_slice(Day(5)).unwrap(), Slice::Horizon);
        assert_eq!(
            entries(&log),
            vec![("a".into(), 0), ("b".into(), 0), ("b".into(), 1), ("a".into(), 2)]
        );
        assert_eq!(ml.agent_count(), 0);
    }

    #[test]
    fn handoff_resumes_waiter_and_releaser_same_day() {
        let log = Log::default();
        let mut ml = new_loop::<Scripted>();
        let bed = ml.interactants_mut().add("bed");
        ml.spawn(Scripted::new("a", &[Yield::Lock(bed), Yield::Sleep(2), Yield::Unlock(bed)], &log), Day(0)).unwrap();
        ml.spawn(Scripted::new("b", &[Yield::Lock(bed), Yield::Unlock(bed)], &log), Day(0)).unwrap();

        ml.run_slice(Day(5)).unwrap();
        // a re-enters after its fast lock; b queues.  a wakes on day 2 and
        // hands off, then b (first) and a each get a fresh turn on day 2.
        // b's own unlock is uncontended, so it re-enters at once.
        assert_eq!(
            entries(&log),
            vec![
                ("a".into(), 0),
                ("a".into(), 0),
                ("b".into(), 0),
                ("a".into(), 2),
                ("b".into(), 2),
                ("b".into(), 2),
                ("a".into(), 2),
            ]
        );
        assert!(ml.interactants().get(bed).unwrap().is_free());
    }

    #[test]
    fn unlock_without_holding_is_fatal() {
        let log = Log::default();
        let mut ml = new_loop::<Scripted>();
        let bed = ml.interactants_mut().add("bed");
        ml.spawn(Scripted::new("rogue", &[Yield::Unlock(bed)], &log), Day(0)).unwrap();
        assert!(matches!(ml.run_slice(Day(1)), Err(KernelError::LockOwnershipViolation { .. })));
    }

    #[test]
    fn finishing_holder_hands_lock_to_waiter() {
        let log = Log::default();
        let mut ml = new_loop::<Scripted>();
        let bed = ml.interactants_mut().add("bed");
        ml.spawn(Scripted::new("a", &[Yield::Lock(bed), Yield::Sleep(2), Yield::Done], &log), Day(0)).unwrap();
        ml.spawn(Scripted::new("b", &[Yield::Lock(bed), Yield::Unlock(bed)], &log), Day(0)).unwrap();

        ml.run_slice(Day(20)).unwrap();
        // a finishes on day 2 without unlocking; b is served that same day.
        assert_eq!(
            entries(&log),
            vec![
                ("a".into(), 0),
                ("a".into(), 0),
                ("b".into(), 0),
                ("a".into(), 2),
                ("b".into(), 2),
                ("b".into(), 2),
            ]
        );
        assert_eq!(ml.agent_count(), 0);
        assert!(ml.interactants().get(bed).unwrap().is_free());
    }

    #[test]
    fn release_locks_frees_everything_held() {
        let log = Log::default();
        let mut ml = new_loop::<Scripted>();
        let bed = ml.interactants_mut().add("bed");
        let chair = ml.interactants_mut().add("chair");
        let a = ml.spawn(Scripted::new("a", &[Yield::Lock(bed), Yield::Lock(chair), Yield::Sleep(50)], &log), Day(0)).unwrap();
        ml.run_slice(Day(5)).unwrap();
        assert_eq!(ml.interactants().held_by(a), vec![bed, chair]);

        assert_eq!(ml.release_locks(a).unwrap(), vec![bed, chair]);
        assert!(ml.interactants().held_by(a).is_empty());
        assert!(ml.interactants().get(chair).unwrap().is_free());
    }

    #[test]
    fn sleeping_forever_parks_at_never() {
        let log = Log::default();
        let mut ml = new_loop::<Scripted>();
        let a = ml.spawn(Scripted::new("a", &[Yield::Sleep(u64::MAX)], &log), Day(1)).unwrap();

        assert_eq!(ml.run_slice(Day(20)).unwrap(), Slice::Horizon);
        assert_eq!(entries(&log), vec![("a".into(), 1)]);
        let parked: Vec<_> = ml.sequencer().queued_on(Day::NEVER).collect();
        assert_eq!(parked, vec![&Runnable::Agent(a)]);
    }

    #[test]
    fn endless_agent_hits_safety_limit() {
        let log = Log::default();
        let mut ml = MainLoop::new(patch(), Day::ZERO, SimRng::new(1), 50);
        ml.spawn(Scripted::new("spin", &[Yield::Sleep(0); 100], &log), Day(0)).unwrap();
        assert!(matches!(ml.run_slice(Day(1)), Err(KernelError::SafetyLimit(_))));
    }

    #[test]
    fn tick_callbacks_see_before_and_after() {
        let log = Log::default();
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let mut ml = new_loop::<Scripted>();
        let sink = Arc::clone(&ticks);
        ml.add_tick_callback(Box::new(move |t: &TickInfo| sink.lock().unwrap().push((t.before.0, t.after.0))));
        ml.spawn(Scripted::new("a", &[Yield::Sleep(1); 5], &log), Day(0)).unwrap();

        ml.run_slice(Day(3)).unwrap();
        assert_eq!(*ticks.lock().unwrap(), vec![(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn idle_days_bumped_unless_frozen() {
        let mut ml = new_loop::<Scripted>();
        ml.schedule_gates(Day(0)).unwrap();
        assert_eq!(ml.run_slice(Day(10)).unwrap(), Slice::GateTurn(Day(1)));

        let mut frozen = new_loop::<Scripted>();
        frozen.freeze_time();
        frozen.schedule_gates(Day(0)).unwrap();
        assert_eq!(frozen.run_slice(Day(10)).unwrap(), Slice::GateTurn(Day(0)));
        assert!(frozen.is_frozen());
    }

    #[test]
    fn spawned_helper_runs_later() {
        struct Spawner {
            log:     Log,
            spawned: bool,
        }
        impl Agent for Spawner {
            type Message = ();
            fn name(&self) -> &str {
                if self.spawned { "helper" } else { "parent" }
            }
            fn run(&mut self, ctx: &mut AgentCtx<'_, Self>) -> Yield {
                self.log.lock().unwrap().push((self.name().to_owned(), ctx.now()));
                if !self.spawned {
                    let at = ctx.now() + 3;
                    ctx.spawn(Spawner { log: Arc::clone(&self.log), spawned: true }, at);
                }
                Yield::Done
            }
        }

        let log = Log::default();
        let mut ml = new_loop::<Spawner>();
        ml.spawn(Spawner { log: Arc::clone(&log), spawned: false }, Day(1)).unwrap();
        ml.run_slice(Day(6)).unwrap();
        assert_eq!(entries(&log), vec![("parent".into(), 1), ("helper".into(), 4)]);
    }

    #[test]
    fn done_today_tracks_real_agents() {
        let log = Log::default();
        let mut ml = new_loop::<Scripted>();
        assert!(ml.done_today());
        ml.spawn(Scripted::new("a", &[], &log), Day(0)).unwrap();
        assert!(!ml.done_today());
        assert_eq!(ml.time_range().earliest_relevant, Some(Day(0)));
    }

    // ── Ward contention scenario ──────────────────────────────────────────

    #[derive(Default)]
    struct Tally {
        requests: AtomicUsize,
        grants:   AtomicUsize,
    }

    enum Step {
        Pick,
        Holding(InteractantId),
        Release(InteractantId),
    }

    struct Contender {
        name:  String,
        rooms: Vec<InteractantId>,
        step:  Step,
        tally: Arc<Tally>,
        until: Day,
    }

    impl Agent for Contender {
        type Message = ();

        fn name(&self) -> &str {
            &self.name
        }

        fn run(&mut self, ctx: &mut AgentCtx<'_, Self>) -> Yield {
            match self.step {
                Step::Pick => {
                    if ctx.now() >= self.until {
                        return Yield::Done;
                    }
                    let Some(&room) = ctx.rng().choose(&self.rooms) else {
                        return Yield::Done;
                    };
                    self.tally.requests.fetch_add(1, Ordering::SeqCst);
                    self.step = Step::Holding(room);
                    Yield::Lock(room)
                }
                Step::Holding(room) => {
                    assert!(ctx.holds(room));
                    let occupants = ctx.payload_mut::<u32>(room).unwrap();
                    assert_eq!(*occupants, 0, "two agents inside one room");
                    *occupants += 1;
                    self.tally.grants.fetch_add(1, Ordering::SeqCst);
                    self.step = Step::Release(room);
                    Yield::Sleep(1)
                }
                Step::Release(room) => {
                    *ctx.payload_mut::<u32>(room).unwrap() -= 1;
                    self.step = Step::Pick;
                    Yield::Unlock(room)
                }
            }
        }
    }

    #[test]
    fn three_rooms_five_agents_fifty_days() {
        let tally = Arc::new(Tally::default());
        let mut ml = new_loop::<Contender>();
        let rooms: Vec<_> = (0..3).map(|i| ml.interactants_mut().add_with_payload(format!("room{i}"), 0u32)).collect();
        for i in 0..5 {
            let agent = Contender {
                name:  format!("p{i}"),
                rooms: rooms.clone(),
                step:  Step::Pick,
                tally: Arc::clone(&tally),
                until: Day(50),
            };
            ml.spawn(agent, Day(0)).unwrap();
        }

        ml.run_slice(Day(200)).unwrap();

        let requests = tally.requests.load(Ordering::SeqCst);
        assert!(requests >= 50);
        assert_eq!(requests, tally.grants.load(Ordering::SeqCst));
        assert_eq!(ml.agent_count(), 0);
        for entry in ml.census() {
            assert!(entry.holder.is_none(), "{} still held", entry.name);
            assert_eq!(entry.queued, 0);
        }
    }
}
