use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio_test::{assert_err, assert_ok};

use boardroom::auth::{Admin, Principal, Role, require_admin};
use boardroom::engine::{Engine, ErrorKind, SchedulingError};
use boardroom::model::*;

// ── Test infrastructure ──────────────────────────────────────

fn wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("boardroom_int_test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn ms(y: i32, m: u32, d: u32, h: u32, min: u32) -> Ms {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, 0)
        .unwrap()
        .and_utc()
        .timestamp_millis()
}

struct Office {
    engine: Arc<Engine>,
    admin: Admin,
    boardroom: VenueId,
    huddle: VenueId,
}

async fn office(name: &str) -> Office {
    let engine = Arc::new(Engine::new(wal_path(name)).unwrap());
    let admin = assert_ok!(require_admin(&Principal::admin("facilities")));
    let boardroom = assert_ok!(
        engine
            .create_venue(
                &admin,
                NewVenue {
                    name: "Boardroom".into(),
                    capacity: 16,
                    location: "Level 12".into(),
                },
            )
            .await
    );
    let huddle = assert_ok!(
        engine
            .create_venue(
                &admin,
                NewVenue {
                    name: "Huddle".into(),
                    capacity: 4,
                    location: "Level 3".into(),
                },
            )
            .await
    );
    Office {
        engine,
        admin,
        boardroom,
        huddle,
    }
}

fn weekly(venue_id: VenueId, start: Ms, end: Ms, days: &str, until: Ms) -> NewSeries {
    NewSeries {
        frequency: Frequency::Weekly,
        until: Some(until),
        weekdays: days.parse().unwrap(),
        description: Some("Leadership sync".into()),
        ..NewSeries::once(venue_id, "Exec sync", start, end)
    }
}

// ── Scenarios ────────────────────────────────────────────────

#[tokio::test]
async fn a_week_of_bookings() {
    let o = office("week.wal").await;

    // Tue/Thu exec sync for four weeks
    let outcome = assert_ok!(
        o.engine
            .create_series(
                &o.admin,
                weekly(
                    o.boardroom,
                    ms(2025, 9, 2, 8, 0),
                    ms(2025, 9, 2, 9, 0),
                    "tue, THU",
                    ms(2025, 9, 28, 0, 0),
                ),
            )
            .await
    );
    let SeriesOutcome::Series { id, occurrences } = outcome else {
        panic!("expected a series");
    };
    assert_eq!(occurrences.len(), 8);

    // A one-off that clashes with the Thursday slot
    let clash = NewBooking {
        venue_id: o.boardroom,
        title: "Investor call".into(),
        description: None,
        start: ms(2025, 9, 4, 8, 30),
        end: ms(2025, 9, 4, 9, 30),
    };
    let err = assert_err!(o.engine.create_booking(&o.admin, clash.clone()).await);
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Same slot in the huddle room is free
    let moved = NewBooking {
        venue_id: o.huddle,
        ..clash
    };
    let call = assert_ok!(o.engine.create_booking(&o.admin, moved).await);

    let thursday = o
        .engine
        .list_bookings(None, NaiveDate::from_ymd_opt(2025, 9, 4))
        .await;
    let summary: Vec<(&str, Option<SeriesId>)> = thursday
        .iter()
        .map(|b| (b.venue_name.as_str(), b.series_id))
        .collect();
    assert_eq!(summary, vec![("Boardroom", Some(id)), ("Huddle", None)]);
    assert_eq!(thursday[1].id, call);
    assert_eq!(thursday[0].description.as_deref(), Some("Leadership sync"));
}

#[tokio::test]
async fn rejected_series_leaves_no_trace() {
    let o = office("rejected_series.wal").await;
    assert_ok!(
        o.engine
            .create_booking(
                &o.admin,
                NewBooking {
                    venue_id: o.boardroom,
                    title: "Audit".into(),
                    description: None,
                    start: ms(2025, 10, 15, 8, 30),
                    end: ms(2025, 10, 15, 8, 45),
                },
            )
            .await
    );

    // Monthly on the 15th, 08:00-09:00: the October occurrence hits the audit
    let req = NewSeries {
        frequency: Frequency::Monthly,
        count: Some(6),
        ..NewSeries::once(o.boardroom, "Board meeting", ms(2025, 9, 15, 8, 0), ms(2025, 9, 15, 9, 0))
    };
    let err = assert_err!(o.engine.create_series(&o.admin, req).await);
    assert!(matches!(err, SchedulingError::SeriesConflict { occurrence: 1, with: Some(_) }));
    assert_eq!(o.engine.list_bookings(Some(o.boardroom), None).await.len(), 1);
    assert_eq!(o.engine.store().series_count(), 0);
}

#[tokio::test]
async fn stale_edit_loses() {
    let o = office("stale_edit.wal").await;
    let id = assert_ok!(
        o.engine
            .create_booking(
                &o.admin,
                NewBooking {
                    venue_id: o.huddle,
                    title: "1:1".into(),
                    description: None,
                    start: ms(2025, 9, 1, 14, 0),
                    end: ms(2025, 9, 1, 14, 30),
                },
            )
            .await
    );
    let seen = o.engine.get_booking(id).await.unwrap();
    let edit = |title: &str| BookingUpdate {
        venue_id: seen.venue_id,
        title: title.into(),
        description: None,
        start: seen.start,
        end: seen.end,
        expected_version: Some(seen.version),
    };

    // Two editors loaded the same version; the first write wins
    assert_ok!(o.engine.update_booking(&o.admin, id, edit("1:1 (moved agenda)")).await);
    let err = assert_err!(o.engine.update_booking(&o.admin, id, edit("1:1 renamed")).await);
    assert_eq!(err.kind(), ErrorKind::ConcurrentModification);
    assert_eq!(o.engine.get_booking(id).await.unwrap().title, "1:1 (moved agenda)");
}

#[tokio::test]
async fn member_cannot_write() {
    let member = Principal::new("intern", vec![Role::Member]);
    let err = assert_err!(require_admin(&member));
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn parallel_bookings_one_slot() {
    let o = office("parallel.wal").await;
    let admin = Arc::new(o.admin);
    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = o.engine.clone();
        let admin = admin.clone();
        let venue_id = o.boardroom;
        handles.push(tokio::spawn(async move {
            engine
                .create_booking(
                    &admin,
                    NewBooking {
                        venue_id,
                        title: "Grab the room".into(),
                        description: None,
                        start: ms(2025, 9, 5, 12, 0),
                        end: ms(2025, 9, 5, 13, 0),
                    },
                )
                .await
        }));
    }
    let mut ok = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            ok += 1;
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(o.engine.list_bookings(Some(o.boardroom), None).await.len(), 1);
}
