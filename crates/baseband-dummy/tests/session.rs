//! Session behaviour against the emulated board

use baseband_core::flash::{PAGE_SIZE, UPGRADE_START};
use baseband_core::protocol::{CMD_STORE_PRESET, CMD_UPDATE_SETTINGS};
use baseband_core::{
    Error, NoProgress, Session, SessionConfig, SessionState, Settings, TransportError,
    UpgradeFailure, Value,
};
use baseband_dummy::{DummyBaseband, DummyConfig};

fn fast_config() -> SessionConfig {
    SessionConfig {
        poll_interval_ms: 0,
        command_timeout_ms: 200,
        ..Default::default()
    }
}

fn connect() -> Session<DummyBaseband> {
    Session::connect(DummyBaseband::new_default(), fast_config()).unwrap()
}

fn transactions(session: &Session<DummyBaseband>) -> usize {
    session.transport().stats().transactions
}

fn firmware(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 256) as u8).collect()
}

#[test]
fn connect_reads_identity() {
    let session = connect();
    let info = session.info().unwrap();
    assert_eq!(info.hw_version, 2);
    assert_eq!(info.sw_version(), "1.3");
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn absent_board_is_not_found() {
    let dummy = DummyBaseband::new(DummyConfig {
        present: false,
        ..Default::default()
    });
    assert!(matches!(
        Session::connect(dummy, fast_config()),
        Err(Error::DeviceNotFound(_))
    ));
}

#[test]
fn floating_bus_is_not_found() {
    let dummy = DummyBaseband::new(DummyConfig {
        info: [0xFF; 4],
        ..Default::default()
    });
    assert!(matches!(
        Session::connect(dummy, fast_config()),
        Err(Error::DeviceNotFound(_))
    ));
}

#[test]
fn operations_need_a_connection() {
    let mut session = Session::new(DummyBaseband::new_default(), fast_config());
    assert!(matches!(session.read_settings::<&str>(&[]), Err(Error::NotConnected)));
    assert_eq!(transactions(&session), 0);
}

#[test]
fn read_all_settings() {
    let mut session = connect();
    let s = session.read_settings::<&str>(&[]).unwrap();
    assert_eq!(s.len(), 66);
    assert_eq!(s.get("name"), Some(&Value::from("Default")));
    assert_eq!(s.get("fm.1.rf_frequency_khz"), Some(&Value::Integer(7020)));
    assert_eq!(s.get("video.video_mode"), Some(&Value::from("PAL")));
}

#[test]
fn set_frequency_reads_back() {
    let mut session = connect();
    let (path, value) = Settings::parse_assignment("fm.0.rf_frequency_khz=7020").unwrap();
    let mut patch = Settings::new();
    patch.insert(path, value);
    session.write_settings(&patch).unwrap();

    let back = session.read_settings(&["fm.0.rf_frequency_khz"]).unwrap();
    assert_eq!(back, patch);
    assert_eq!(&session.transport().settings()[12..14], &[0x6C, 0x1B]);
    assert_eq!(
        session.transport().stats().commands.last(),
        Some(&(CMD_UPDATE_SETTINGS, 1))
    );
}

#[test]
fn partial_write_changes_only_named_field() {
    let mut session = connect();
    let before = session.read_settings::<&str>(&[]).unwrap();
    let bytes_before = session.transport().settings().to_vec();

    // video_level shares its container with five other fields
    let mut patch = Settings::new();
    patch.insert("video.video_level", 17);
    session.write_settings(&patch).unwrap();

    let after = session.read_settings::<&str>(&[]).unwrap();
    assert_eq!(before.diff(&after), vec!["video.video_level".to_string()]);

    let bytes_after = session.transport().settings();
    let changed: Vec<usize> = (0..bytes_after.len())
        .filter(|&i| bytes_before[i] != bytes_after[i])
        .collect();
    assert_eq!(changed, vec![43]);
}

#[test]
fn invalid_document_fails_before_io() {
    let mut session = connect();
    let start = transactions(&session);

    let mut patch = Settings::new();
    patch.insert("video.video_level", 17);
    patch.insert("video.video_mode", "XYZ");
    assert!(matches!(
        session.write_settings(&patch),
        Err(Error::Validation { .. })
    ));

    assert!(matches!(
        session.read_settings(&["video.colour"]),
        Err(Error::UnknownField(_))
    ));
    assert_eq!(transactions(&session), start);
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn prefix_reads_are_coalesced() {
    let mut session = connect();
    let start = transactions(&session);
    let s = session.read_settings(&["fm.0", "fm.1", "video.video_mode"]).unwrap();
    assert_eq!(s.len(), 19);
    assert!(s.iter().all(|(p, _)| p.starts_with("fm.0.")
        || p.starts_with("fm.1.")
        || p == "video.video_mode"));
    // fm.0 and fm.1 are adjacent, video is 19 bytes past them
    assert_eq!(transactions(&session) - start, 2);
}

#[test]
fn preset_index_checked_before_io() {
    let mut session = connect();
    let start = transactions(&session);
    assert!(matches!(session.store_preset(0), Err(Error::Validation { .. })));
    assert!(matches!(session.store_preset(32), Err(Error::Validation { .. })));
    assert!(matches!(session.load_preset(0), Err(Error::Validation { .. })));
    assert!(matches!(session.view_preset(32), Err(Error::Validation { .. })));
    assert_eq!(transactions(&session), start);
}

#[test]
fn store_view_and_load_preset() {
    let mut session = connect();
    let mut patch = Settings::new();
    patch.insert("name", "Studio A");
    session.write_settings(&patch).unwrap();
    session.store_preset(3).unwrap();

    let flags = session.preset_status().unwrap();
    assert_eq!(flags.used().collect::<Vec<_>>(), vec![0, 3]);

    patch.insert("name", "Studio B");
    session.write_settings(&patch).unwrap();

    let viewed = session.view_preset(3).unwrap();
    assert_eq!(viewed.get("name"), Some(&Value::from("Studio A")));
    let live = session.read_settings(&["name"]).unwrap();
    assert_eq!(live.get("name"), Some(&Value::from("Studio B")));

    session.load_preset(3).unwrap();
    let live = session.read_settings(&["name"]).unwrap();
    assert_eq!(live.get("name"), Some(&Value::from("Studio A")));
}

#[test]
fn hung_command_times_out() {
    let mut session = Session::connect(
        DummyBaseband::new_default(),
        SessionConfig {
            command_timeout_ms: 20,
            ..fast_config()
        },
    )
    .unwrap();
    session.transport_mut().hang_commands(true);
    assert!(matches!(
        session.store_preset(4),
        Err(Error::CommandTimeout {
            command: CMD_STORE_PRESET
        })
    ));
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn transient_failure_is_retried_once() {
    let mut session = connect();
    session.transport_mut().fail_next(1);
    let s = session.read_settings(&["name"]).unwrap();
    assert_eq!(s.len(), 1);
    assert_eq!(session.transport().stats().recoveries, 1);
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn write_is_retried_after_bus_reset() {
    let mut session = connect();
    // let the base read through, fail the register write
    session.transport_mut().fail_after(1, 1);
    let mut patch = Settings::new();
    patch.insert("fm.0.rf_frequency_khz", 7020);
    session.write_settings(&patch).unwrap();

    let stats = session.transport().stats();
    assert_eq!(stats.recoveries, 1);
    let updates = stats
        .commands
        .iter()
        .filter(|(c, _)| *c == CMD_UPDATE_SETTINGS)
        .count();
    assert_eq!(updates, 1);
    assert_eq!(&session.transport().settings()[12..14], &[0x6C, 0x1B]);
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn failed_identity_read_faults() {
    let mut session = Session::new(DummyBaseband::new_default(), fast_config());
    session.transport_mut().fail_next(2);
    assert!(matches!(
        session.open(),
        Err(Error::Transport(TransportError::Timeout))
    ));
    assert_eq!(session.state(), SessionState::Faulted);

    session.open().unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.transport().stats().recoveries, 2);
}

#[test]
fn spare_enum_code_survives_write_back() {
    let mut session = connect();
    // video.osd_mode = 3, which has no name
    session.transport_mut().settings_mut()[44] |= 0x18;
    let before = session.transport().settings().to_vec();

    let all = session.read_settings::<&str>(&[]).unwrap();
    assert_eq!(all.get("video.osd_mode"), Some(&Value::Integer(3)));
    let doc = all.to_document();
    session
        .write_settings(&Settings::from_document(&doc).unwrap())
        .unwrap();
    assert_eq!(session.transport().settings(), &before[..]);
}

#[test]
fn persistent_failure_faults_then_recovers() {
    let mut session = connect();
    session.transport_mut().fail_next(2);
    assert!(matches!(
        session.read_settings(&["name"]),
        Err(Error::Transport(_))
    ));
    assert_eq!(session.state(), SessionState::Faulted);

    // the next operation recovers the bus first
    let s = session.read_settings(&["name"]).unwrap();
    assert_eq!(s.len(), 1);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.transport().stats().recoveries, 2);
}

#[test]
fn retry_can_be_disabled() {
    let mut session = Session::connect(
        DummyBaseband::new_default(),
        SessionConfig {
            retry_transient: false,
            ..fast_config()
        },
    )
    .unwrap();
    session.transport_mut().fail_next(1);
    assert!(session.read_actuals().is_err());
    assert_eq!(session.transport().stats().recoveries, 0);
    assert_eq!(session.state(), SessionState::Faulted);
}

#[test]
fn actuals_and_osd() {
    let mut session = connect();
    session.transport_mut().osd_mut()[..5].copy_from_slice(b"HELLO");
    let actuals = session.read_actuals().unwrap();
    assert_eq!(actuals.get("fm1_audio_peak"), Some(&Value::Integer(0x1234)));
    assert_eq!(actuals.get("baseband_pll_locked"), Some(&Value::Integer(1)));
    let osd = session.read_osd().unwrap();
    assert_eq!(osd.len(), 640);
    assert_eq!(&osd[..5], b"HELLO");
}

#[test]
fn upgrade_and_download_firmware() {
    let mut session = connect();
    let image = firmware(400_128);
    session.upgrade_firmware(&image, &mut NoProgress).unwrap();

    let stats = session.transport().stats();
    assert_eq!(stats.sector_erases, 8);
    assert_eq!(stats.page_programs, image.len() / PAGE_SIZE);

    let flash = session.transport().flash();
    let start = UPGRADE_START as usize;
    assert_eq!(&flash[start..start + image.len()], &image[..]);
    // golden image untouched
    assert!(flash[..start].iter().all(|&b| b == 0xFF));

    let downloaded = session.download_firmware(&mut NoProgress).unwrap();
    assert_eq!(downloaded.len(), 0x8_0000);
    assert_eq!(&downloaded[..image.len()], &image[..]);
    assert!(downloaded[image.len()..].iter().all(|&b| b == 0xFF));
}

#[test]
fn unacknowledged_chunk_aborts_upgrade() {
    let mut session = connect();
    session.transport_mut().corrupt_ack_after(3);
    let err = session
        .upgrade_firmware(&firmware(400_128), &mut NoProgress)
        .unwrap_err();
    match err {
        Error::FirmwareUpgrade { address, failure } => {
            assert_eq!(address, UPGRADE_START + 3 * PAGE_SIZE as u32);
            assert_eq!(failure, UpgradeFailure::NotAcknowledged);
        }
        other => panic!("expected upgrade failure, got {:?}", other),
    }
    // nothing sent after the failing chunk
    assert_eq!(session.transport().stats().page_programs, 4);
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn upgrade_step_is_retried_after_bus_reset() {
    let mut session = connect();
    let image = firmware(400_128);
    // past the erase, into page programming
    session.transport_mut().fail_after(100, 1);
    session.upgrade_firmware(&image, &mut NoProgress).unwrap();

    let stats = session.transport().stats();
    assert_eq!(stats.recoveries, 1);
    assert_eq!(stats.sector_erases, 8);
    let pages = image.len() / PAGE_SIZE;
    assert!(stats.page_programs == pages || stats.page_programs == pages + 1);

    let start = UPGRADE_START as usize;
    assert_eq!(
        &session.transport().flash()[start..start + image.len()],
        &image[..]
    );
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn failed_upgrade_retry_leaves_session_faulted() {
    let mut session = connect();
    let image = firmware(400_128);
    session.transport_mut().fail_after(100, 2);
    assert!(matches!(
        session.upgrade_firmware(&image, &mut NoProgress),
        Err(Error::Transport(_))
    ));
    assert_eq!(session.state(), SessionState::Faulted);

    session.reset().unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    session.upgrade_firmware(&image, &mut NoProgress).unwrap();
    let start = UPGRADE_START as usize;
    assert_eq!(
        &session.transport().flash()[start..start + image.len()],
        &image[..]
    );
}

#[test]
fn undersized_image_rejected_before_io() {
    let mut session = connect();
    let start = transactions(&session);
    assert!(matches!(
        session.upgrade_firmware(&firmware(1000), &mut NoProgress),
        Err(Error::Validation { .. })
    ));
    assert_eq!(transactions(&session), start);
}

#[test]
fn gpio_pulse_works_without_device() {
    let dummy = DummyBaseband::new(DummyConfig {
        present: false,
        ..Default::default()
    });
    let mut session = Session::new(
        dummy,
        SessionConfig {
            gpio_pulse_ms: 100,
            ..fast_config()
        },
    );
    session.pulse_gpio(4, true).unwrap();
    let pulses = &session.transport().stats().gpio_pulses;
    assert_eq!(pulses.len(), 1);
    assert_eq!(pulses[0].0, 4);
    assert!(pulses[0].1);
}

#[test]
fn reboot_disconnects() {
    let mut session = connect();
    session.reboot().unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.info().is_none());
    assert!(matches!(session.read_actuals(), Err(Error::NotConnected)));
}

#[test]
fn settings_document_round_trip_through_device() {
    let mut session = connect();
    let doc = session.read_settings::<&str>(&[]).unwrap().to_document();
    assert!(doc["fm"].is_array());
    assert_eq!(doc["fm"][1]["rf_frequency_khz"], serde_json::json!(7020));

    let patch = Settings::from_document(&serde_json::json!({
        "video": { "video_mode": "NTSC", "enable": null }
    }))
    .unwrap();
    assert_eq!(patch.len(), 1);
    session.write_settings(&patch).unwrap();

    let after = session.read_settings::<&str>(&[]).unwrap();
    let before = Settings::from_document(&doc).unwrap();
    assert_eq!(before.diff(&after), vec!["video.video_mode".to_string()]);
    assert_eq!(after.get("video.video_mode"), Some(&Value::from("NTSC")));
}
