//! Schedule evaluation and exception resolution
//!
//! These tests pin the wall-clock semantics of off-hour windows: day filters,
//! windows spanning midnight, timezones and daylight saving changes.

mod common;

use common::fixtures::*;
use hibernator::errors::ConfigurationError;
use hibernator::schedule::{
    evaluate, exceptions, CompiledSchedule, ExceptionType, OffHourWindow, Schedule,
    ScheduleException, ScheduleState, TriggerKind,
};
use rstest::rstest;

fn schedule(timezone: &str, windows: Vec<OffHourWindow>) -> Schedule {
    Schedule {
        timezone: timezone.to_string(),
        off_hours: windows,
    }
}

fn weeknights() -> Schedule {
    schedule(
        "UTC",
        vec![OffHourWindow::new("20:00", "06:00", &["Mon", "Tue", "Wed", "Thu", "Fri"])],
    )
}

#[test]
fn test_monday_evening_window_wakes_tuesday_morning() {
    let only_monday = schedule("UTC", vec![OffHourWindow::new("18:00", "08:00", &["Mon"])]);

    let result = evaluate(&only_monday, utc("2024-01-08T20:00:00Z")).unwrap();

    assert_eq!(result.current_state, ScheduleState::Hibernating);
    assert_eq!(result.next_wake_up_time, Some(utc("2024-01-09T08:00:00Z")));
    assert_eq!(result.next_hibernate_time, Some(utc("2024-01-15T18:00:00Z")));
}

#[rstest]
#[case::monday_before_window("2024-01-08T19:59:59Z", ScheduleState::Active)]
#[case::window_opens("2024-01-08T20:00:00Z", ScheduleState::Hibernating)]
#[case::past_midnight("2024-01-09T03:00:00Z", ScheduleState::Hibernating)]
#[case::window_closes("2024-01-09T06:00:00Z", ScheduleState::Active)]
#[case::friday_night_into_saturday("2024-01-13T05:59:00Z", ScheduleState::Hibernating)]
#[case::saturday_evening("2024-01-13T21:00:00Z", ScheduleState::Active)]
#[case::sunday_night("2024-01-14T23:00:00Z", ScheduleState::Active)]
fn test_weeknight_windows(#[case] now: &str, #[case] expected: ScheduleState) {
    let result = evaluate(&weeknights(), utc(now)).unwrap();
    assert_eq!(result.current_state, expected, "at {}", now);
}

#[rstest]
#[case::winter("2024-01-15T19:00:00Z", "2024-01-15T18:59:00Z")]
#[case::summer("2024-07-15T18:00:00Z", "2024-07-15T17:59:00Z")]
fn test_berlin_window_follows_local_clock(#[case] opens_at: &str, #[case] just_before: &str) {
    let berlin = schedule("Europe/Berlin", vec![OffHourWindow::new("20:00", "06:00", &["Mon"])]);

    assert_eq!(
        evaluate(&berlin, utc(just_before)).unwrap().next_hibernate_time,
        Some(utc(opens_at))
    );
    assert_eq!(
        evaluate(&berlin, utc(opens_at)).unwrap().current_state,
        ScheduleState::Hibernating
    );
}

#[test]
fn test_next_times_are_strictly_after_now() {
    let result = evaluate(&weeknights(), utc("2024-01-08T20:00:00Z")).unwrap();
    assert_eq!(result.next_hibernate_time, Some(utc("2024-01-09T20:00:00Z")));
    assert_eq!(result.next_wake_up_time, Some(utc("2024-01-09T06:00:00Z")));
}

#[test]
fn test_empty_schedule_never_fires() {
    let result = evaluate(&schedule("UTC", Vec::new()), utc("2024-01-08T20:00:00Z")).unwrap();
    assert_eq!(result.current_state, ScheduleState::Active);
    assert_eq!(result.next_hibernate_time, None);
    assert_eq!(result.next_wake_up_time, None);
}

#[rstest]
#[case::at_the_shared_instant("2024-01-08T08:00:00Z", "2024-01-15T08:00:00Z")]
#[case::before_it("2024-01-08T07:00:00Z", "2024-01-08T08:00:00Z")]
#[case::later_in_the_week("2024-01-10T12:00:00Z", "2024-01-15T08:00:00Z")]
fn test_zero_length_window_never_hibernates(#[case] now: &str, #[case] next: &str) {
    let zero_length = schedule("UTC", vec![OffHourWindow::new("08:00", "08:00", &["Mon"])]);

    let result = evaluate(&zero_length, utc(now)).unwrap();

    assert_eq!(result.current_state, ScheduleState::Active);
    assert_eq!(result.next_hibernate_time, Some(utc(next)));
    assert_eq!(result.next_wake_up_time, Some(utc(next)));
}

#[test]
fn test_window_without_days_is_ignored_next_to_valid_ones() {
    let mut mixed = weeknights();
    mixed.off_hours.push(OffHourWindow::new("09:00", "17:00", &[]));

    let result = evaluate(&mixed, utc(instants::TUESDAY_MORNING)).unwrap();
    assert_eq!(result.current_state, ScheduleState::Active);
    assert_eq!(result.next_hibernate_time, Some(utc("2024-01-09T20:00:00Z")));
    assert_eq!(result.next_wake_up_time, Some(utc("2024-01-10T06:00:00Z")));

    let midday = evaluate(&mixed, utc("2024-01-09T12:00:00Z")).unwrap();
    assert_eq!(midday.current_state, ScheduleState::Active);
}

#[rstest]
#[case::overlap_inside_first("2024-01-08T22:30:00Z", ScheduleState::Hibernating)]
#[case::first_closes_second_open("2024-01-08T23:00:00Z", ScheduleState::Hibernating)]
#[case::second_past_midnight("2024-01-09T01:59:00Z", ScheduleState::Hibernating)]
#[case::second_closes("2024-01-09T02:00:00Z", ScheduleState::Active)]
fn test_overlapping_windows_are_unioned(#[case] now: &str, #[case] expected: ScheduleState) {
    let overlapping = schedule(
        "UTC",
        vec![
            OffHourWindow::new("20:00", "23:00", &["Mon"]),
            OffHourWindow::new("22:00", "02:00", &["Mon"]),
        ],
    );
    assert_eq!(evaluate(&overlapping, utc(now)).unwrap().current_state, expected, "at {}", now);
}

#[rstest]
#[case::first_window("2024-01-08T19:59:59Z", ScheduleState::Hibernating)]
#[case::boundary("2024-01-08T20:00:00Z", ScheduleState::Hibernating)]
#[case::second_window("2024-01-08T21:59:59Z", ScheduleState::Hibernating)]
#[case::after_both("2024-01-08T22:00:00Z", ScheduleState::Active)]
fn test_adjacent_windows_leave_no_gap(#[case] now: &str, #[case] expected: ScheduleState) {
    let adjacent = schedule(
        "UTC",
        vec![
            OffHourWindow::new("18:00", "20:00", &["Mon"]),
            OffHourWindow::new("20:00", "22:00", &["Mon"]),
        ],
    );
    assert_eq!(evaluate(&adjacent, utc(now)).unwrap().current_state, expected, "at {}", now);
}

#[rstest]
#[case::timezone(schedule("Mars/Olympus", vec![OffHourWindow::new("20:00", "06:00", &["Mon"])]))]
#[case::weekday(schedule("UTC", vec![OffHourWindow::new("20:00", "06:00", &["Funday"])]))]
#[case::time(schedule("UTC", vec![OffHourWindow::new("25:00", "06:00", &["Mon"])]))]
fn test_invalid_schedules_are_configuration_errors(#[case] invalid: Schedule) {
    let err = evaluate(&invalid, utc("2024-01-08T20:00:00Z")).unwrap_err();
    assert!(matches!(
        err,
        ConfigurationError::InvalidTimezone { .. }
            | ConfigurationError::InvalidDayOfWeek { .. }
            | ConfigurationError::InvalidTimeOfDay { .. }
    ));
}

#[test]
fn test_preview_alternates_transitions() {
    let compiled = CompiledSchedule::compile(&weeknights()).unwrap();
    let events = compiled.upcoming(utc("2024-01-12T12:00:00Z"), 3);

    let kinds: Vec<TriggerKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![TriggerKind::Hibernate, TriggerKind::WakeUp, TriggerKind::Hibernate]
    );
    // Friday night wakes on Saturday, next window opens Monday
    assert_eq!(events[1].at, utc("2024-01-13T06:00:00Z"));
    assert_eq!(events[2].at, utc("2024-01-15T20:00:00Z"));
}

fn exception(name: &str, kind: ExceptionType, windows: Vec<OffHourWindow>) -> ScheduleException {
    ScheduleException {
        name: name.to_string(),
        exception_type: kind,
        valid_from: utc("2024-01-01T00:00:00Z"),
        valid_until: utc("2024-02-01T00:00:00Z"),
        windows,
    }
}

#[test]
fn test_suspend_exception_keeps_plan_awake() {
    let suspend = exception("release-week", ExceptionType::Suspend, Vec::new());

    let resolution =
        exceptions::resolve(&weeknights(), &[suspend], utc(instants::MONDAY_NIGHT)).unwrap();

    assert_eq!(resolution.evaluation.current_state, ScheduleState::Hibernating);
    assert_eq!(resolution.desired_state, ScheduleState::Active);
    assert_eq!(resolution.suspended_by.as_deref(), Some("release-week"));
    assert_eq!(resolution.active.len(), 1);
}

#[test]
fn test_extend_exception_adds_weekend_window() {
    let weekend = exception(
        "weekend-too",
        ExceptionType::Extend,
        vec![OffHourWindow::new("00:00", "23:59", &["Sat", "Sun"])],
    );

    let resolution =
        exceptions::resolve(&weeknights(), &[weekend], utc("2024-01-13T12:00:00Z")).unwrap();
    assert_eq!(resolution.desired_state, ScheduleState::Hibernating);
}

#[test]
fn test_replace_exception_overrides_base_windows() {
    let daytime = exception(
        "daytime-only",
        ExceptionType::Replace,
        vec![OffHourWindow::new("09:00", "17:00", &["Mon"])],
    );

    let night =
        exceptions::resolve(&weeknights(), &[daytime.clone()], utc(instants::MONDAY_NIGHT))
            .unwrap();
    assert_eq!(night.desired_state, ScheduleState::Active);

    let noon = exceptions::resolve(&weeknights(), &[daytime], utc(instants::MONDAY_NOON)).unwrap();
    assert_eq!(noon.desired_state, ScheduleState::Hibernating);
}

#[test]
fn test_expired_exception_is_ignored() {
    let mut old = exception("old-freeze", ExceptionType::Suspend, Vec::new());
    old.valid_from = utc("2023-01-01T00:00:00Z");
    old.valid_until = utc("2023-02-01T00:00:00Z");

    let resolution =
        exceptions::resolve(&weeknights(), &[old], utc(instants::MONDAY_NIGHT)).unwrap();
    assert_eq!(resolution.desired_state, ScheduleState::Hibernating);
    assert!(resolution.active.is_empty());
}

#[test]
fn test_exception_with_inverted_validity_is_rejected() {
    let mut broken = exception("broken", ExceptionType::Extend, Vec::new());
    broken.valid_until = broken.valid_from;

    let err =
        exceptions::resolve(&weeknights(), &[broken], utc(instants::MONDAY_NIGHT)).unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
}
