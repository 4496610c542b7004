//! Command line behaviour against the emulated board

#![cfg(feature = "dummy")]

use std::path::PathBuf;
use std::process::{Command, Output};

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_baseband-config"))
        .args(args)
        // Keep a user configuration file out of the way
        .env("XDG_CONFIG_HOME", std::env::temp_dir().join("baseband-config-tests"))
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn temp_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("baseband-config-{}-{}", std::process::id(), name))
}

#[test]
fn list_transports_names_the_emulator() {
    let output = run(&["list-transports"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("dummy"));
}

#[test]
fn get_prints_requested_field() {
    let output = run(&["-t", "dummy", "get", "video.video_mode"]);
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("Baseband connected: hw 2"));
    assert!(out.contains("video.video_mode = PAL"));
    assert!(!out.contains("fm.0"));
}

#[test]
fn set_reports_the_written_value() {
    let output = run(&["-t", "dummy", "set", "fm.0.rf_frequency_khz=7020"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("fm.0.rf_frequency_khz = 7020"));
}

#[test]
fn invalid_values_fail_with_status_1() {
    let output = run(&["-t", "dummy", "set", "video.video_mode=HDMI"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));

    let output = run(&["-t", "dummy", "store-preset", "0"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn missing_board_fails() {
    let output = run(&["-t", "dummy:present=off", "info"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}

#[test]
fn pulse_gpio_does_not_need_a_board() {
    let output = run(&[
        "-t",
        "dummy:present=off",
        "pulse-gpio",
        "6",
        "--duration-ms",
        "1",
    ]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Pulse GPIO pin 6"));
}

#[test]
fn settings_document_round_trip() {
    let path = temp_file("settings.json");
    let path_str = path.to_str().unwrap();

    let output = run(&["-t", "dummy", "settings-to-file", path_str]);
    assert!(output.status.success());
    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(doc["video"]["video_mode"], "PAL");
    assert_eq!(doc["fm"].as_array().unwrap().len(), 4);

    let output = run(&["-t", "dummy", "settings-from-file", path_str]);
    assert!(output.status.success());

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn unknown_transport_lists_alternatives() {
    let output = run(&["-t", "bitbang", "info"]);
    assert_eq!(output.status.code(), Some(1));
    let err = String::from_utf8_lossy(&output.stderr);
    assert!(err.contains("Unknown transport: bitbang"));
    assert!(err.contains("Available transports"));
}
