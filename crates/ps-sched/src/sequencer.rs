//! `Sequencer` — per-patch logical-time ready queue.
//!
//! Maps each day to a FIFO list of ready entries and keeps a `now` cursor
//! that only moves forward.  Iterating drains today's list in arrival order;
//! when today is empty the cursor advances one day and iteration continues,
//! until nothing is left.
//!
//! `BTreeMap` gives O(log D) insert and pop where D is the number of distinct
//! future days with something queued.  Agents mostly sleep a few days at a
//! time, so D stays small.

use std::collections::{BTreeMap, VecDeque};

use ps_core::{Day, KernelError, KernelResult};

/// Result of [`Sequencer::time_range`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TimeRange {
    /// Earliest day holding an entry that counts as real work, or `now` when
    /// real agents are stuck behind a timeless lock holder.  `None` if only
    /// infrastructure is queued.
    pub earliest_relevant: Option<Day>,
    /// Latest day with anything queued.
    pub latest: Option<Day>,
}

/// A day-indexed FIFO ready queue with a monotone `now` cursor.
pub struct Sequencer<T> {
    days:  BTreeMap<Day, VecDeque<T>>,
    now:   Day,
    /// Cached total entry count for O(1) `len()`.
    total: usize,
}

impl<T> Default for Sequencer<T> {
    fn default() -> Self {
        Self::new(Day::ZERO)
    }
}

impl<T> Sequencer<T> {
    pub fn new(start: Day) -> Self {
        Self { days: BTreeMap::new(), now: start, total: 0 }
    }

    /// The current day.  Never decreases.
    #[inline]
    pub fn now(&self) -> Day {
        self.now
    }

    /// Queue `item` to run on day `when`, after everything already queued
    /// for that day.
    ///
    /// Fails with `TemporalViolation` if `when` is before `now`.
    pub fn enqueue(&mut self, item: T, when: Day) -> KernelResult<()> {
        if when < self.now {
            return Err(KernelError::TemporalViolation { when, now: self.now });
        }
        self.days.entry(when).or_default().push_back(item);
        self.total += 1;
        Ok(())
    }

    /// The day the next entry will be handed out on, or `None` if empty.
    pub fn peek_day(&self) -> Option<Day> {
        self.days.keys().next().copied()
    }

    /// Pop the next `(entry, day)` pair, advancing `now` over empty days.
    pub fn next_ready(&mut self) -> Option<(T, Day)> {
        loop {
            let day = self.peek_day()?;
            if day > self.now {
                // Nothing is queued in between.
                self.now = day;
                continue;
            }
            let list = self.days.get_mut(&day)?;
            let item = list.pop_front();
            if list.is_empty() {
                self.days.remove(&day);
            }
            if let Some(item) = item {
                self.total -= 1;
                return Some((item, day));
            }
        }
    }

    /// Earliest relevant and latest scheduled day.
    ///
    /// `is_relevant` says which entries are real work (non-timeless agents).
    /// `timeless_contention` is true when some interactant held by a timeless
    /// owner still has non-timeless waiters; those waiters are pending now,
    /// so the earliest relevant day is `now`.
    pub fn time_range(&self, is_relevant: impl Fn(&T) -> bool, timeless_contention: bool) -> TimeRange {
        let latest = self.days.keys().next_back().copied();
        let earliest_relevant = if timeless_contention {
            Some(self.now)
        } else {
            self.days
                .iter()
                .find(|(_, list)| list.iter().any(&is_relevant))
                .map(|(&day, _)| day)
        };
        TimeRange { earliest_relevant, latest }
    }

    /// If everything queued for today is timeless and nothing is truly
    /// contended, move today's list to the front of tomorrow's and advance
    /// `now`.  Returns whether the bump happened.
    pub fn bump_if_all_timeless(&mut self, is_timeless: impl Fn(&T) -> bool, contended: bool) -> bool {
        if contended {
            return false;
        }
        match self.days.get(&self.now) {
            Some(today) if today.iter().all(&is_timeless) => {}
            _ => return false,
        }
        let Some(today) = self.days.remove(&self.now) else {
            return false;
        };
        self.now = self.now.next();
        let tomorrow = self.days.entry(self.now).or_default();
        for item in today.into_iter().rev() {
            tomorrow.push_front(item);
        }
        true
    }

    /// Total number of queued entries across all days.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Number of distinct days with at least one entry.
    pub fn day_count(&self) -> usize {
        self.days.len()
    }

    /// Entries queued for `day`, in dispatch order.
    pub fn queued_on(&self, day: Day) -> impl Iterator<Item = &T> + '_ {
        self.days.get(&day).into_iter().flatten()
    }
}

impl<T> Iterator for Sequencer<T> {
    type Item = (T, Day);

    fn next(&mut self) -> Option<(T, Day)> {
        self.next_ready()
    }
}
