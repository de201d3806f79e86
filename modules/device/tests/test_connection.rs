// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use common::{
    error::GypsyError,
    fix::{FixType, Notification, PositionFields},
};
use device::{
    aggregator::FixAggregator,
    capture::{CaptureReader, capture_path},
    connection::{DeviceConnection, pump},
    nmea::NmeaDecoder,
};
use module_core::{
    DeviceMethod, DeviceReply, Event, EventBus, EventKind, EventKindType, payload_ref,
    test_helper::wait_for_event,
};
use nix::{
    fcntl::OFlag,
    pty::{PtyMaster, grantpt, posix_openpt, ptsname_r, unlockpt},
};
use std::{io::Write, sync::Mutex, time::Duration};
use tokio::{
    sync::broadcast::{Receiver, error::TryRecvError},
    time::timeout,
};

const TIMEOUT_MS: u64 = 1000;
const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";
const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";

fn get_path(folder_name: &str) -> String {
    format!("/tmp/gypsy-rs/{folder_name}")
}

fn setup_empty_test_folder(folder_name: &str) -> String {
    let path = get_path(folder_name);
    if let Ok(true) = std::fs::exists(&path) {
        std::fs::remove_dir_all(&path)
            .unwrap_or_else(|_| panic!("Failed to cleanup test dir {path}"));
    }
    std::fs::create_dir_all(&path)
        .unwrap_or_else(|err| panic!("Failed to create test dir for {path}. Reason: {err}"));
    path
}

async fn next_notification(rx: &mut Receiver<Event>) -> Notification {
    let event = wait_for_event(
        rx,
        Duration::from_millis(TIMEOUT_MS),
        EventKindType::DeviceSignalEvent,
    )
    .await;
    payload_ref!(event.kind, EventKind::DeviceSignalEvent)
        .unwrap()
        .notification
        .clone()
}

/// Collects notifications up to and including the loss of connection.
async fn notifications_until_closed(rx: &mut Receiver<Event>) -> Vec<Notification> {
    let mut notifications = Vec::new();
    loop {
        let notification = next_notification(rx).await;
        let closed = notification == Notification::ConnectionChanged(false);
        notifications.push(notification);
        if closed {
            return notifications;
        }
    }
}

fn open_pty() -> (PtyMaster, String) {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).unwrap();
    grantpt(&master).unwrap();
    unlockpt(&master).unwrap();
    let slave = ptsname_r(&master).unwrap();
    (master, slave)
}

#[tokio::test]
async fn pump_feeds_sentences_in_order() {
    let event_bus = EventBus::default();
    let mut rx = event_bus.subscribe();
    let aggregator = Mutex::new(FixAggregator::new(
        "/org/freedesktop/Gypsy/ttyUSB0",
        event_bus.context().sender,
    ));
    let input = format!("{RMC}garbage\r\n{GGA}");

    pump(input.as_bytes(), &mut NmeaDecoder::default(), &aggregator)
        .await
        .unwrap();

    let mut notifications = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let EventKind::DeviceSignalEvent(signal) = event.kind {
            notifications.push(signal.notification.clone());
        }
    }
    assert_eq!(notifications.len(), 6);
    assert_eq!(notifications[0], Notification::TimeChanged(764426119));
    assert!(matches!(notifications[1], Notification::PositionChanged(_)));
    assert!(matches!(notifications[2], Notification::CourseChanged(_)));
    assert_eq!(
        notifications[3],
        Notification::FixStatusChanged(FixType::Fix2d)
    );
    assert!(matches!(
        notifications[4],
        Notification::PositionChanged(position) if position.fields == PositionFields::all()
    ));
    assert!(matches!(notifications[5], Notification::AccuracyChanged(_)));

    let aggregator = aggregator.lock().unwrap();
    assert_eq!(aggregator.position().altitude, 545.4);
    assert_eq!(aggregator.course().speed, 22.4);
    assert_eq!(aggregator.timestamp(), 764426119);
}

#[tokio::test]
async fn capture_mirrors_raw_bytes() {
    let folder = setup_empty_test_folder("capture_reader");
    let prefix = std::path::PathBuf::from(format!("{folder}/nmea"));
    let capture_file = capture_path(&prefix, "/dev/ttyUSB0");
    assert_eq!(
        capture_file,
        std::path::PathBuf::from(format!("{folder}/nmea.ttyUSB0"))
    );
    let input = format!("{RMC}\x00broken\n");
    let reader = CaptureReader::new(
        input.as_bytes(),
        Some(std::fs::File::create(&capture_file).unwrap()),
    );
    let event_bus = EventBus::default();
    let aggregator = Mutex::new(FixAggregator::new(
        "/org/freedesktop/Gypsy/ttyUSB0",
        event_bus.context().sender,
    ));

    pump(reader, &mut NmeaDecoder::default(), &aggregator)
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&capture_file).unwrap(), input);
}

#[tokio::test]
#[test_log::test]
async fn replay_file_until_end() {
    let folder = setup_empty_test_folder("replay_file");
    let device_path = format!("{folder}/replay.nmea");
    std::fs::write(&device_path, format!("{RMC}{GGA}")).unwrap();
    let event_bus = EventBus::default();
    let mut rx = event_bus.subscribe();
    let connection = DeviceConnection::new(
        &device_path,
        event_bus.context().sender,
        Some(format!("{folder}/log").into()),
    );
    assert_eq!(connection.object_path(), "/org/freedesktop/Gypsy/replay.nmea");

    connection.start().unwrap();

    let notifications = notifications_until_closed(&mut rx).await;
    assert_eq!(notifications[0], Notification::ConnectionChanged(true));
    assert_eq!(notifications.len(), 8);
    assert_eq!(
        notifications
            .iter()
            .filter(|n| matches!(n, Notification::ConnectionChanged(_)))
            .count(),
        2
    );
    assert_eq!(
        connection.call(DeviceMethod::GetConnectionStatus),
        Ok(DeviceReply::ConnectionStatus(false))
    );
    assert_eq!(
        connection.call(DeviceMethod::GetFixStatus),
        Ok(DeviceReply::FixStatus(FixType::Fix2d))
    );
    assert_eq!(
        connection.call(DeviceMethod::GetTime),
        Ok(DeviceReply::Time(764426119))
    );
    let Ok(DeviceReply::Course(course)) = connection.call(DeviceMethod::GetCourse) else {
        panic!("Course expected");
    };
    assert_eq!(course.direction, 84.4);
    assert_eq!(
        std::fs::read_to_string(format!("{folder}/log.replay.nmea")).unwrap(),
        format!("{RMC}{GGA}")
    );
}

/// GGA sentence one second and one meter further than the previous one.
fn gga_at(second: usize) -> String {
    let body = format!(
        "GPGGA,{:02}{:02}{:02},4807.038,N,01131.000,E,1,08,0.9,{}.0,M,46.9,M,,",
        12 + second / 3600,
        second / 60 % 60,
        second % 60,
        100 + second
    );
    let checksum = body.bytes().fold(0u8, |sum, byte| sum ^ byte);
    format!("${body}*{checksum:02X}\r\n")
}

#[tokio::test]
async fn replay_keeps_pace_with_subscribers() {
    let folder = setup_empty_test_folder("replay_pace");
    let device_path = format!("{folder}/long.nmea");
    std::fs::write(&device_path, (0..400).map(gga_at).collect::<String>()).unwrap();
    let event_bus = EventBus::default();
    let mut rx = event_bus.subscribe();
    let connection = DeviceConnection::new(&device_path, event_bus.context().sender, None);

    connection.start().unwrap();

    let mut timestamps = 0;
    loop {
        let event = timeout(Duration::from_millis(TIMEOUT_MS), rx.recv())
            .await
            .expect("Replay stalled");
        let event = match event {
            Ok(event) => event,
            Err(e) => panic!("Subscriber fell behind the replay: {e}"),
        };
        match payload_ref!(event.kind, EventKind::DeviceSignalEvent).map(|s| &s.notification) {
            Some(Notification::TimeChanged(_)) => timestamps += 1,
            Some(Notification::ConnectionChanged(false)) => break,
            _ => (),
        }
    }
    assert_eq!(timestamps, 400);
}

#[tokio::test]
async fn report_transport_error_for_missing_device() {
    let event_bus = EventBus::default();
    let mut rx = event_bus.subscribe();
    let connection = DeviceConnection::new("/dev/does-not-exist", event_bus.context().sender, None);

    let result = connection.call(DeviceMethod::Start);

    let Err(GypsyError::Transport { device, errno, .. }) = &result else {
        panic!("Transport error expected, got {result:?}");
    };
    assert_eq!(device, "/dev/does-not-exist");
    assert_eq!(*errno, libc::ENOENT);
    assert!(!connection.is_open());
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn report_transport_error_for_malformed_bluetooth_address() {
    let event_bus = EventBus::default();
    let connection = DeviceConnection::new("not-an-address", event_bus.context().sender, None);

    assert!(matches!(
        connection.start(),
        Err(GypsyError::Transport { .. })
    ));
}

#[tokio::test]
async fn stop_of_closed_connection_is_silent() {
    let event_bus = EventBus::default();
    let mut rx = event_bus.subscribe();
    let connection = DeviceConnection::new("/dev/ttyUSB0", event_bus.context().sender, None);

    assert_eq!(connection.call(DeviceMethod::Stop), Ok(DeviceReply::Done));
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(
        connection.call(DeviceMethod::GetSatellites),
        Ok(DeviceReply::Satellites(Vec::new()))
    );
}

#[tokio::test]
#[test_log::test]
async fn serial_line_start_stop() {
    let (mut master, slave) = open_pty();
    let event_bus = EventBus::default();
    let mut rx = event_bus.subscribe();
    let connection = DeviceConnection::new(&slave, event_bus.context().sender, None);

    connection.start().unwrap();
    assert_eq!(
        next_notification(&mut rx).await,
        Notification::ConnectionChanged(true)
    );
    connection.start().unwrap();
    assert!(connection.is_open());

    master.write_all(GGA.as_bytes()).unwrap();
    let mut position = None;
    while position.is_none() {
        match next_notification(&mut rx).await {
            Notification::PositionChanged(p) => position = Some(p),
            Notification::ConnectionChanged(_) => panic!("Connection changed unexpectedly"),
            _ => (),
        }
    }
    assert_eq!(position.map(|p| p.altitude), Some(545.4));

    connection.stop();
    assert_eq!(
        notifications_until_closed(&mut rx).await.last(),
        Some(&Notification::ConnectionChanged(false))
    );
    assert!(!connection.is_open());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
#[test_log::test]
async fn hang_up_closes_connection_once() {
    let (master, slave) = open_pty();
    let event_bus = EventBus::default();
    let mut rx = event_bus.subscribe();
    let connection = DeviceConnection::new(&slave, event_bus.context().sender, None);
    connection.start().unwrap();
    assert_eq!(
        next_notification(&mut rx).await,
        Notification::ConnectionChanged(true)
    );

    drop(master);

    assert_eq!(
        next_notification(&mut rx).await,
        Notification::ConnectionChanged(false)
    );
    assert!(!connection.is_open());
    connection.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}
