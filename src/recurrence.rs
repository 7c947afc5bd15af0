use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc, Weekday};

use crate::limits::{MAX_EMPTY_WINDOWS, MAX_OCCURRENCES_PER_SERIES};
use crate::model::*;

/// Everything the generator needs to expand a series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub seed: Span,
    pub frequency: Frequency,
    pub interval: u32,
    pub termination: Termination,
    /// Weekly only. Empty means the seed's own weekday.
    pub weekdays: WeekdaySet,
}

impl From<&SeriesRecord> for RecurrenceRule {
    fn from(series: &SeriesRecord) -> Self {
        Self {
            seed: series.seed,
            frequency: series.frequency,
            interval: series.interval,
            termination: series.termination,
            weekdays: series.weekdays,
        }
    }
}

/// Expand `rule` into a lazy, bounded sequence of spans.
///
/// The sequence is a pure function of the rule: cloning it, or calling this
/// again, restarts from the seed.
pub fn occurrences(rule: &RecurrenceRule) -> Occurrences {
    let seed_dt = to_datetime(rule.seed.start);
    let weekdays = match (rule.weekdays.is_empty(), seed_dt) {
        (true, Some(dt)) => WeekdaySet::single(dt.weekday()),
        _ => rule.weekdays,
    };
    let week_start = seed_dt.and_then(|dt| {
        dt.date_naive()
            .checked_sub_days(Days::new(dt.weekday().num_days_from_monday() as u64))
    });
    Occurrences {
        rule: rule.clone(),
        weekdays,
        cursor: seed_dt,
        week_start,
        window: 0,
        day_idx: 0,
        window_hit: false,
        empty_windows: 0,
        emitted: 0,
        limit: MAX_OCCURRENCES_PER_SERIES,
        done: seed_dt.is_none(),
    }
}

/// Collect the full occurrence list.
pub fn generate(rule: &RecurrenceRule) -> Vec<Span> {
    occurrences(rule).collect()
}

#[derive(Debug, Clone)]
pub struct Occurrences {
    rule: RecurrenceRule,
    weekdays: WeekdaySet,
    /// Next candidate start for Daily/Monthly.
    cursor: Option<DateTime<Utc>>,
    /// Monday of the seed's week.
    week_start: Option<NaiveDate>,
    window: u64,
    day_idx: u8,
    window_hit: bool,
    empty_windows: u32,
    emitted: usize,
    limit: usize,
    done: bool,
}

impl Occurrences {
    /// Cap the number of emitted spans (defaults to `MAX_OCCURRENCES_PER_SERIES`).
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn interval(&self) -> u32 {
        self.rule.interval.max(1)
    }

    fn next_stepped(&mut self) -> Option<Ms> {
        let current = self.cursor?;
        let interval = self.interval();
        self.cursor = match self.rule.frequency {
            Frequency::Daily => current.checked_add_days(Days::new(interval as u64)),
            Frequency::Monthly => current.checked_add_months(Months::new(interval)),
            Frequency::None | Frequency::Weekly => None,
        };
        Some(current.timestamp_millis())
    }

    fn next_weekly(&mut self) -> Option<Ms> {
        let week_start = self.week_start?;
        let time = to_datetime(self.rule.seed.start)?.time();
        loop {
            if self.day_idx == 7 {
                if self.window_hit {
                    self.empty_windows = 0;
                } else {
                    self.empty_windows += 1;
                    if self.empty_windows >= MAX_EMPTY_WINDOWS {
                        return None;
                    }
                }
                self.window += 1;
                self.day_idx = 0;
                self.window_hit = false;
            }
            let idx = self.day_idx;
            self.day_idx += 1;

            let day = Weekday::try_from(idx).ok()?;
            if !self.weekdays.contains(day) {
                continue;
            }
            let offset = self
                .window
                .checked_mul(self.interval() as u64 * 7)?
                .checked_add(idx as u64)?;
            let start = candidate_start(week_start.checked_add_days(Days::new(offset))?, time);
            if start < self.rule.seed.start {
                continue;
            }
            self.window_hit = true;
            return Some(start);
        }
    }
}

fn candidate_start(date: NaiveDate, time: NaiveTime) -> Ms {
    date.and_time(time).and_utc().timestamp_millis()
}

impl Iterator for Occurrences {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        if self.done || self.emitted >= self.limit {
            return None;
        }
        let duration = self.rule.seed.duration_ms();

        if self.rule.frequency == Frequency::None {
            self.done = true;
            self.emitted += 1;
            return Some(self.rule.seed);
        }

        if let Termination::Count(n) = self.rule.termination
            && self.emitted >= n as usize
        {
            self.done = true;
            return None;
        }

        let candidate = match self.rule.frequency {
            Frequency::Weekly => self.next_weekly(),
            _ => self.next_stepped(),
        };
        let Some(start) = candidate else {
            self.done = true;
            return None;
        };
        if let Termination::Until(until) = self.rule.termination
            && start > until
        {
            self.done = true;
            return None;
        }
        let Some(end) = start.checked_add(duration) else {
            self.done = true;
            return None;
        };

        self.emitted += 1;
        Some(Span::new(start, end))
    }
}
