//! Property-based tests for occurrence generation and the no-overlap invariant.

use chrono::{DateTime, Datelike, NaiveDate, Weekday};
use proptest::prelude::*;

use boardroom::auth::{Principal, require_admin};
use boardroom::engine::Engine;
use boardroom::model::*;
use boardroom::recurrence::{RecurrenceRule, generate, occurrences};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn arb_frequency() -> impl Strategy<Value = Frequency> {
    prop_oneof![
        Just(Frequency::Daily),
        Just(Frequency::Weekly),
        Just(Frequency::Monthly),
    ]
}

fn arb_weekday() -> impl Strategy<Value = Weekday> {
    (0u8..7).prop_map(|i| Weekday::try_from(i).unwrap())
}

fn arb_weekdays() -> impl Strategy<Value = WeekdaySet> {
    prop::collection::vec(arb_weekday(), 0..4).prop_map(|days| days.into_iter().collect())
}

/// Seed start in 2025-2027, day capped at 28.
fn arb_seed_start() -> impl Strategy<Value = Ms> {
    (2025i32..=2027, 1u32..=12, 1u32..=28, 0u32..=23, 0u32..=59).prop_map(|(y, m, d, h, min)| {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    })
}

/// Duration in the 15-120 minute range.
fn arb_duration() -> impl Strategy<Value = Ms> {
    (15i64..=120).prop_map(|m| m * MINUTE_MS)
}

fn rule(seed_start: Ms, duration: Ms, frequency: Frequency, interval: u32, termination: Termination, weekdays: WeekdaySet) -> RecurrenceRule {
    RecurrenceRule {
        seed: Span::new(seed_start, seed_start + duration),
        frequency,
        interval,
        termination,
        weekdays,
    }
}

fn weekday_of(t: Ms) -> Weekday {
    DateTime::from_timestamp_millis(t).unwrap().weekday()
}

// ---------------------------------------------------------------------------
// Generator properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn count_yields_exactly_count(
        start in arb_seed_start(),
        duration in arb_duration(),
        frequency in arb_frequency(),
        interval in 1u32..=12,
        count in 1u32..=50,
        weekdays in arb_weekdays(),
    ) {
        let r = rule(start, duration, frequency, interval, Termination::Count(count), weekdays);
        prop_assert_eq!(generate(&r).len(), count as usize);
    }

    #[test]
    fn generation_is_deterministic(
        start in arb_seed_start(),
        duration in arb_duration(),
        frequency in arb_frequency(),
        interval in 1u32..=12,
        count in 1u32..=50,
        weekdays in arb_weekdays(),
    ) {
        let r = rule(start, duration, frequency, interval, Termination::Count(count), weekdays);
        let iter = occurrences(&r);
        let replay: Vec<Span> = iter.clone().collect();
        prop_assert_eq!(generate(&r), replay.clone());
        prop_assert_eq!(iter.collect::<Vec<_>>(), replay);
    }

    #[test]
    fn spans_are_chronological_equal_length_and_disjoint(
        start in arb_seed_start(),
        duration in arb_duration(),
        frequency in arb_frequency(),
        interval in 1u32..=12,
        count in 1u32..=50,
        weekdays in arb_weekdays(),
    ) {
        let r = rule(start, duration, frequency, interval, Termination::Count(count), weekdays);
        let spans = generate(&r);
        prop_assert!(spans[0].start >= start);
        for s in &spans {
            prop_assert_eq!(s.duration_ms(), duration);
        }
        for w in spans.windows(2) {
            prop_assert!(w[0].start < w[1].start);
            prop_assert!(!w[0].overlaps(&w[1]));
        }
    }

    #[test]
    fn until_bounds_the_last_start(
        start in arb_seed_start(),
        duration in arb_duration(),
        frequency in arb_frequency(),
        interval in 1u32..=6,
        days_ahead in 0i64..=400,
        weekdays in arb_weekdays(),
    ) {
        let until = start + days_ahead * DAY_MS;
        let bounded = generate(&rule(start, duration, frequency, interval, Termination::Until(until), weekdays));
        prop_assert!(bounded.iter().all(|s| s.start <= until));

        // The next occurrence of the same rule lies past the bound. An empty
        // result means even the first selectable day falls after it.
        let longer = generate(&rule(
            start,
            duration,
            frequency,
            interval,
            Termination::Count(bounded.len() as u32 + 1),
            weekdays,
        ));
        prop_assert_eq!(&longer[..bounded.len()], &bounded[..]);
        prop_assert!(longer[bounded.len()].start > until);
    }

    #[test]
    fn weekly_only_lands_on_selected_days(
        start in arb_seed_start(),
        interval in 1u32..=4,
        count in 1u32..=30,
        weekdays in arb_weekdays(),
    ) {
        let r = rule(start, 30 * MINUTE_MS, Frequency::Weekly, interval, Termination::Count(count), weekdays);
        let allowed = if weekdays.is_empty() { WeekdaySet::single(weekday_of(start)) } else { weekdays };
        for s in generate(&r) {
            prop_assert!(allowed.contains(weekday_of(s.start)));
        }
    }

    #[test]
    fn limit_bounds_every_rule(
        start in arb_seed_start(),
        frequency in arb_frequency(),
        limit in 0usize..20,
    ) {
        let far = start + 3650 * DAY_MS;
        let r = rule(start, MINUTE_MS * 30, frequency, 1, Termination::Until(far), WeekdaySet::new());
        prop_assert!(occurrences(&r).with_limit(limit).count() <= limit);
    }
}

// ---------------------------------------------------------------------------
// Store invariant: whatever gets accepted never overlaps
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn accepted_bookings_never_overlap(
        attempts in prop::collection::vec((0i64..2000, 1i64..240), 1..40),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let stored = rt.block_on(async {
            let dir = std::env::temp_dir().join("boardroom_prop");
            std::fs::create_dir_all(&dir).unwrap();
            let path = dir.join(format!("overlap_{}.wal", ulid::Ulid::new()));
            let engine = Engine::new(path).unwrap();
            let admin = require_admin(&Principal::admin("prop")).unwrap();
            let venue_id = engine
                .create_venue(&admin, NewVenue { name: "Prop".into(), capacity: 2, location: "Lab".into() })
                .await
                .unwrap();
            for (offset, len) in &attempts {
                let start = offset * MINUTE_MS;
                let _ = engine
                    .create_booking(&admin, NewBooking {
                        venue_id,
                        title: "p".into(),
                        description: None,
                        start,
                        end: start + len * MINUTE_MS,
                    })
                    .await;
            }
            engine.list_bookings(Some(venue_id), None).await
        });

        prop_assert!(!stored.is_empty());
        for (i, a) in stored.iter().enumerate() {
            for b in &stored[i + 1..] {
                prop_assert!(a.end <= b.start || b.end <= a.start);
            }
        }
    }
}
