use super::{OBJECT_PATH, notifications};
use crate::aggregator::{FixAggregator, FixSink};
use common::fix::{
    AccuracyFields, CourseFields, FixType, MAX_SATELLITES, Notification, PositionFields,
    SatelliteInfo,
};
use module_core::Event;
use tokio::sync::broadcast::{self, Receiver};

fn create_aggregator() -> (FixAggregator, Receiver<Event>) {
    let (sender, receiver) = broadcast::channel(256);
    (FixAggregator::new(OBJECT_PATH, sender), receiver)
}

fn satellite(satellite_id: u32, snr: u32) -> SatelliteInfo {
    SatelliteInfo {
        satellite_id,
        in_use: true,
        elevation: 45,
        azimuth: 180,
        snr,
    }
}

#[test]
fn position_notified_once_per_change() {
    let (mut aggregator, mut rx) = create_aggregator();
    let fields = PositionFields::LATITUDE | PositionFields::LONGITUDE;

    aggregator.set_position(fields, 52.0, 11.0, 0.0);
    aggregator.set_position(fields, 52.0, 11.0, 0.0);

    let notifications = notifications(&mut rx);
    assert_eq!(notifications.len(), 1);
    let Notification::PositionChanged(position) = notifications[0] else {
        panic!("Unexpected notification {:?}", notifications[0]);
    };
    assert_eq!(position.fields, fields);
    assert_eq!(position.latitude, 52.0);
    assert_eq!(position.longitude, 11.0);
}

#[test]
fn first_report_of_default_value_is_a_change() {
    let (mut aggregator, mut rx) = create_aggregator();

    aggregator.set_course(CourseFields::SPEED, 0.0, 0.0, 0.0);

    let notifications = notifications(&mut rx);
    assert_eq!(notifications.len(), 1);
    assert!(matches!(
        notifications[0],
        Notification::CourseChanged(course) if course.fields == CourseFields::SPEED
    ));
}

#[test]
fn field_bits_are_never_cleared() {
    let (mut aggregator, mut rx) = create_aggregator();

    aggregator.set_accuracy(AccuracyFields::all(), 2.5, 1.3, 2.1);
    aggregator.set_accuracy(AccuracyFields::HORIZONTAL, 0.0, 0.9, 0.0);

    let accuracy = aggregator.accuracy();
    assert_eq!(accuracy.fields, AccuracyFields::all());
    assert_eq!(accuracy.pdop, 2.5);
    assert_eq!(accuracy.hdop, 0.9);
    assert_eq!(accuracy.vdop, 2.1);
    assert_eq!(notifications(&mut rx).len(), 2);
}

#[test]
fn time_notified_only_on_change() {
    let (mut aggregator, mut rx) = create_aggregator();

    aggregator.set_timestamp(100);
    aggregator.set_timestamp(100);
    aggregator.set_timestamp(101);

    assert_eq!(
        notifications(&mut rx),
        vec![Notification::TimeChanged(100), Notification::TimeChanged(101)]
    );
    assert_eq!(aggregator.timestamp(), 101);
}

#[test]
fn altitude_change_derives_climb() {
    let (mut aggregator, mut rx) = create_aggregator();

    aggregator.set_timestamp(100);
    aggregator.set_position(PositionFields::ALTITUDE, 0.0, 0.0, 10.0);
    aggregator.set_timestamp(110);
    aggregator.set_position(PositionFields::ALTITUDE, 0.0, 0.0, 30.0);

    let notifications = notifications(&mut rx);
    assert_eq!(notifications.len(), 5);
    assert_eq!(notifications[2], Notification::TimeChanged(110));
    let Notification::CourseChanged(course) = notifications[3] else {
        panic!("Expected the climb before the position, got {:?}", notifications[3]);
    };
    assert_eq!(course.fields, CourseFields::CLIMB);
    assert_eq!(course.climb, 2.0);
    assert_eq!(course.timestamp, 110);
    let Notification::PositionChanged(position) = notifications[4] else {
        panic!("Unexpected notification {:?}", notifications[4]);
    };
    assert_eq!(position.altitude, 30.0);
    assert_eq!(position.timestamp, 110);
}

#[test]
fn climb_skipped_without_elapsed_time() {
    let (mut aggregator, mut rx) = create_aggregator();

    aggregator.set_timestamp(100);
    aggregator.set_position(PositionFields::ALTITUDE, 0.0, 0.0, 10.0);
    aggregator.set_position(PositionFields::ALTITUDE, 0.0, 0.0, 20.0);

    assert!(
        !notifications(&mut rx)
            .iter()
            .any(|n| matches!(n, Notification::CourseChanged(_)))
    );
    assert!(!aggregator.course().fields.contains(CourseFields::CLIMB));
    assert_eq!(aggregator.position().altitude, 20.0);
}

#[test]
fn climb_skipped_without_previous_altitude_time() {
    let (mut aggregator, mut rx) = create_aggregator();

    aggregator.set_position(PositionFields::ALTITUDE, 0.0, 0.0, 10.0);
    aggregator.set_timestamp(100);
    aggregator.set_position(PositionFields::ALTITUDE, 0.0, 0.0, 20.0);

    assert!(
        !notifications(&mut rx)
            .iter()
            .any(|n| matches!(n, Notification::CourseChanged(_)))
    );
}

#[test]
fn weak_report_does_not_demote_3d_fix() {
    let (mut aggregator, mut rx) = create_aggregator();

    aggregator.set_fix_type(FixType::Fix3d, false);
    aggregator.set_fix_type(FixType::Fix2d, true);

    assert_eq!(aggregator.fix_type(), FixType::Fix3d);
    assert_eq!(
        notifications(&mut rx),
        vec![Notification::FixStatusChanged(FixType::Fix3d)]
    );
}

#[test]
fn weak_loss_of_fix_overrides_3d_fix() {
    let (mut aggregator, mut rx) = create_aggregator();

    aggregator.set_fix_type(FixType::Fix3d, false);
    aggregator.set_fix_type(FixType::None, true);
    aggregator.set_fix_type(FixType::Fix2d, true);

    assert_eq!(aggregator.fix_type(), FixType::Fix2d);
    assert_eq!(
        notifications(&mut rx),
        vec![
            Notification::FixStatusChanged(FixType::Fix3d),
            Notification::FixStatusChanged(FixType::None),
            Notification::FixStatusChanged(FixType::Fix2d),
        ]
    );
}

#[test]
fn strong_report_demotes_3d_fix() {
    let (mut aggregator, mut rx) = create_aggregator();

    aggregator.set_fix_type(FixType::Fix3d, false);
    aggregator.set_fix_type(FixType::Fix2d, false);

    assert_eq!(aggregator.fix_type(), FixType::Fix2d);
    assert_eq!(notifications(&mut rx).len(), 2);
}

#[test]
fn commit_publishes_changed_satellites() {
    let (mut aggregator, mut rx) = create_aggregator();

    aggregator.add_satellite(satellite(4, 30));
    aggregator.add_satellite(satellite(5, 44));
    aggregator.commit_satellites();

    assert_eq!(aggregator.satellites(), &[satellite(4, 30), satellite(5, 44)]);
    assert_eq!(
        notifications(&mut rx),
        vec![Notification::SatellitesChanged(vec![
            satellite(4, 30),
            satellite(5, 44)
        ])]
    );
}

#[test]
fn commit_of_identical_satellites_is_silent() {
    let (mut aggregator, mut rx) = create_aggregator();
    for _ in 0..2 {
        aggregator.add_satellite(satellite(4, 30));
        aggregator.commit_satellites();
    }
    assert_eq!(notifications(&mut rx).len(), 1);

    aggregator.add_satellite(satellite(4, 31));
    aggregator.commit_satellites();
    assert_eq!(
        notifications(&mut rx),
        vec![Notification::SatellitesChanged(vec![satellite(4, 31)])]
    );
}

#[test]
fn shorter_report_replaces_satellites() {
    let (mut aggregator, mut rx) = create_aggregator();
    aggregator.add_satellite(satellite(4, 30));
    aggregator.add_satellite(satellite(5, 44));
    aggregator.commit_satellites();

    aggregator.add_satellite(satellite(4, 30));
    aggregator.commit_satellites();

    assert_eq!(aggregator.satellites(), &[satellite(4, 30)]);
    assert_eq!(notifications(&mut rx).len(), 2);
}

#[test]
fn clear_keeps_committed_satellites() {
    let (mut aggregator, mut rx) = create_aggregator();
    aggregator.add_satellite(satellite(4, 30));
    aggregator.commit_satellites();

    aggregator.add_satellite(satellite(9, 12));
    aggregator.clear_satellites();

    assert_eq!(aggregator.satellites(), &[satellite(4, 30)]);
    assert_eq!(notifications(&mut rx).len(), 1);
}

#[test]
fn staging_is_capped() {
    let (mut aggregator, _rx) = create_aggregator();

    for id in 0..(MAX_SATELLITES as u32 + 4) {
        aggregator.add_satellite(satellite(id, 20));
    }
    aggregator.commit_satellites();

    assert_eq!(aggregator.satellites().len(), MAX_SATELLITES);
    assert_eq!(
        aggregator.satellites().last().map(|s| s.satellite_id),
        Some(MAX_SATELLITES as u32 - 1)
    );
}

#[test]
fn connection_state_is_published() {
    let (aggregator, mut rx) = create_aggregator();

    aggregator.set_connected(true);

    assert_eq!(
        notifications(&mut rx),
        vec![Notification::ConnectionChanged(true)]
    );
}
