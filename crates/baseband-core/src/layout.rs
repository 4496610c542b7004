//! Register layouts of the baseband board
//!
//! The tables here mirror the packed structures in the board firmware.
//! They are built and validated the first time they are used.

use crate::protocol::{REG_ACTUALS, REG_PREVIEW, REG_SETTINGS};
use crate::register::{Field, FieldKind, RegisterMap, Width};
use once_cell::sync::Lazy;

/// Size of the SETTINGS block
pub const SETTINGS_SIZE: usize = 67;
/// Size of the ACTUALS block
pub const ACTUALS_SIZE: usize = 36;
/// Size of the INFO block (hw, fpga, sw minor, sw major)
pub const INFO_SIZE: usize = 4;
/// Number of FM carriers
pub const FM_CHANNELS: usize = 4;

/// Audio sources for FM carriers and NICAM channels
pub const AUDIO_INPUT: &[&str] = &[
    "ADC1L", "ADC1R", "ADC2L", "ADC2R", "I2S1L", "I2S1R", "I2S2L", "I2S2R", "ADC1LR", "ADC2LR",
    "I2S1LR", "I2S2LR", "MUTE",
];
/// FM pre-emphasis curves
pub const PREEMPHASIS: &[&str] = &["AUDIO_50US", "AUDIO_75US", "AUDIO_J17", "AUDIO_FLAT"];
/// FM deviation bandwidth
pub const FM_BANDWIDTH: &[&str] = &["BW_130", "BW_180", "BW_230", "BW_280"];
/// NICAM filter bandwidth
pub const NICAM_BANDWIDTH: &[&str] = &["BW_700", "BW_500"];
/// Video standard
pub const VIDEO_MODE: &[&str] = &["FLAT", "PAL", "NTSC", "SECAM"];
/// On-screen display mode
pub const OSD_MODE: &[&str] = &["OSD_OFF", "OSD_ON", "OSD_AUTO"];
/// Video source
pub const VIDEO_IN: &[&str] = &["VIDEO_IN", "VIDEO_GENERATOR", "VIDEO_IN_AUTO"];
/// Test pattern
pub const PATTERN: &[&str] = &[
    "NONE",
    "COLOR_BARS",
    "CROSSHATCH",
    "CHECKERBOARD",
    "COLOR_RAMP",
    "COLOR_BARS_75",
];
/// Audio oscillator waveform
pub const NCO_WAVEFORM: &[&str] = &["SINE", "SQUARE", "NOISE"];
/// Audio oscillator mode
pub const NCO_MODE: &[&str] = &["NCO_CW", "NCO_MORSE"];
/// Morse keying speed
pub const MORSE_SPEED: &[&str] = &["SPEED_7_5", "SPEED_15", "SPEED_30", "SPEED_60"];

const fn range(min: u32, max: u32) -> FieldKind {
    FieldKind::Unsigned { min, max }
}

const fn khz() -> FieldKind {
    FieldKind::Scaled {
        step: 1.0,
        min: 0.0,
        max: 65535.0,
    }
}

fn settings_fields() -> Vec<Field> {
    use FieldKind::{Enum, Flag, Text};
    use Width::{Bytes, U16, U8};

    let mut fields = vec![Field::new("name", 0, Bytes(12), Text)];

    for ch in 0..FM_CHANNELS {
        let base = 12 + ch * 6;
        let p = |leaf: &str| format!("fm.{}.{}", ch, leaf);
        fields.extend([
            Field::new(p("rf_frequency_khz"), base, U16, khz()),
            Field::new(p("rf_level"), base + 2, U16, range(0, 1023)),
            Field::new(p("input"), base + 4, U16, Enum(AUDIO_INPUT)).bits(0, 4),
            Field::new(p("preemphasis"), base + 4, U16, Enum(PREEMPHASIS)).bits(4, 2),
            Field::new(p("fm_bandwidth"), base + 4, U16, Enum(FM_BANDWIDTH)).bits(6, 2),
            Field::new(p("generator_level"), base + 4, U16, range(0, 15)).bits(8, 4),
            Field::new(p("am"), base + 4, U16, Flag).bits(12, 1),
            Field::new(p("enable"), base + 4, U16, Flag).bits(13, 1),
            Field::new(p("generator_ena"), base + 4, U16, Flag).bits(14, 1),
        ]);
    }

    fields.extend([
        Field::new("nicam.rf_frequency_khz", 36, U16, khz()),
        Field::new("nicam.rf_level", 38, U16, range(0, 1023)),
        Field::new("nicam.input_ch1", 40, U16, Enum(AUDIO_INPUT)).bits(0, 4),
        Field::new("nicam.input_ch2", 40, U16, Enum(AUDIO_INPUT)).bits(4, 4),
        Field::new("nicam.generator_level_ch1", 40, U16, range(0, 15)).bits(8, 4),
        Field::new("nicam.generator_level_ch2", 40, U16, range(0, 15)).bits(12, 4),
        Field::new("nicam.nicam_bandwidth", 42, U8, Enum(NICAM_BANDWIDTH)).bits(0, 1),
        Field::new("nicam.generator_ena_ch1", 42, U8, Flag).bits(1, 1),
        Field::new("nicam.generator_ena_ch2", 42, U8, Flag).bits(2, 1),
        Field::new("nicam.invert_spectrum", 42, U8, Flag).bits(3, 1),
        Field::new("nicam.enable", 42, U8, Flag).bits(4, 1),
    ]);

    fields.extend([
        Field::new("video.video_level", 43, U16, range(0, 255)).bits(0, 8),
        Field::new("video.video_mode", 43, U16, Enum(VIDEO_MODE)).bits(8, 2),
        Field::new("video.invert_video", 43, U16, Flag).bits(10, 1),
        Field::new("video.osd_mode", 43, U16, Enum(OSD_MODE)).bits(11, 2),
        Field::new("video.video_in", 43, U16, Enum(VIDEO_IN)).bits(13, 2),
        Field::new("video.filter_bypass", 43, U16, Flag).bits(15, 1),
        Field::new("video.show_menu", 45, U8, Flag).bits(0, 1),
        Field::new("video.enable", 45, U8, Flag).bits(1, 1),
        Field::new("video.pattern_enable", 45, U8, Flag).bits(2, 1),
        Field::new("video.pattern", 45, U8, Enum(PATTERN)).bits(3, 3),
    ]);

    fields.extend([
        Field::new("general.audio_nco_frequency", 46, U16, FieldKind::Scaled {
            step: 1.0,
            min: 0.0,
            max: 15000.0,
        })
        .bits(0, 14),
        Field::new("general.audio_nco_waveform", 46, U16, Enum(NCO_WAVEFORM)).bits(14, 2),
        Field::new("general.audio_nco_mode", 48, U8, Enum(NCO_MODE)).bits(0, 1),
        Field::new("general.morse_speed", 48, U8, Enum(MORSE_SPEED)).bits(1, 2),
        Field::new("general.audio1_extern_ena", 48, U8, Flag).bits(3, 1),
        Field::new("general.audio2_extern_ena", 48, U8, Flag).bits(4, 1),
        Field::new("general.morse_message_repeat_time", 49, U16, range(0, 1023)),
        Field::new("general.morse_message", 51, Bytes(16), Text),
    ]);

    fields
}

fn actuals_fields() -> Vec<Field> {
    use FieldKind::Flag;
    use Width::{U16, U32};

    let peak = |name: &str, offset| Field::new(name, offset, U16, range(0, 0xFFFF)).volatile();
    let flag = |name: &str, offset, bit| Field::new(name, offset, U32, Flag).bits(bit, 1).volatile();

    vec![
        peak("adc1_left_audio_peak", 0),
        peak("adc1_right_audio_peak", 2),
        peak("adc2_left_audio_peak", 4),
        peak("adc2_right_audio_peak", 6),
        peak("fm1_audio_peak", 8),
        peak("fm2_audio_peak", 10),
        peak("fm3_audio_peak", 12),
        peak("fm4_audio_peak", 14),
        flag("vid_adc_clip", 16, 0),
        flag("vid_low_pass_clip", 16, 1),
        flag("vid_preemp_clip", 16, 2),
        flag("nicam_upsampling_clip", 16, 3),
        flag("baseband_clip", 16, 4),
        peak("adc_in_min", 20),
        peak("adc_in_max", 22),
        peak("dac_out_min", 24),
        peak("dac_out_max", 26),
        flag("nicam_reset", 28, 0),
        flag("baseband_pll_locked", 28, 1),
        peak("nicam_left_peak", 32),
        peak("nicam_right_peak", 34),
    ]
}

fn build(name: &'static str, base: u16, size: usize, fields: Vec<Field>) -> RegisterMap {
    RegisterMap::new(name, base, size, fields)
        .unwrap_or_else(|e| panic!("built-in {} register map is invalid: {}", name, e))
}

/// Live settings at 0x1000
pub static SETTINGS: Lazy<RegisterMap> =
    Lazy::new(|| build("settings", REG_SETTINGS, SETTINGS_SIZE, settings_fields()));

/// Preset preview at 0x4000, same layout as [`SETTINGS`]
pub static PREVIEW: Lazy<RegisterMap> =
    Lazy::new(|| build("preview", REG_PREVIEW, SETTINGS_SIZE, settings_fields()));

/// Hardware meters at 0x2000
pub static ACTUALS: Lazy<RegisterMap> =
    Lazy::new(|| build("actuals", REG_ACTUALS, ACTUALS_SIZE, actuals_fields()));
