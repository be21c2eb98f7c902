//! Validation tests for the locker config schema.

use locker_config::{Generation, load};
use rstest::rstest;

fn base_doc() -> String {
    r#"
        [locker]
        name = "xpp"
        generation = "gen1"
        timeout_ms = 1000
        trig_in_ticks = true
        deg_conversion_freq_ghz = 2.856

        [features]
        use_drift_correction = true
        use_dither = false

        [loop]
        poll_ms = 200
        not_ok_backoff_ms = 500

        [channels]
        device_base = "LAS:FS11:"
        phase_motor = "LAS:FS11:MMS:PH"
        laser_trigger = "LAS:FS11:EVR:TRIG0:TDES"
        counter = "LAS:FS11:CNT:TI:"

        [channels.drift]
        signal = "LAS:FS11:VIT:matlab:29"
        value = "LAS:FS11:VIT:matlab:04"
        offset = "LAS:FS11:VIT:matlab:05"
        gain = "LAS:FS11:VIT:matlab:06"
        smoothing = "LAS:FS11:VIT:matlab:07"
        accum = "LAS:FS11:VIT:matlab:09"
    "#
    .to_string()
}

#[test]
fn full_document_round_trips() {
    let cfg = load(&base_doc()).unwrap();
    assert_eq!(cfg.locker.name, "xpp");
    assert_eq!(cfg.locker.generation, Generation::Gen1);
    assert!(cfg.locker.trig_in_ticks);
    assert!(cfg.features.use_drift_correction);
    assert!(!cfg.features.use_secondary_calibration);
    assert_eq!(cfg.channels.device_base, "LAS:FS11:");
}

#[rstest]
#[case("name = \"xpp\"", "name = \"\"", "locker.name")]
#[case("timeout_ms = 1000", "timeout_ms = 0", "timeout_ms")]
#[case(
    "deg_conversion_freq_ghz = 2.856",
    "deg_conversion_freq_ghz = -1.0",
    "deg_conversion_freq_ghz"
)]
#[case("poll_ms = 200", "poll_ms = 0", "poll_ms")]
#[case(
    "counter = \"LAS:FS11:CNT:TI:\"",
    "counter = \"\"",
    "channels.counter"
)]
fn rejects_invalid_fields(#[case] from: &str, #[case] to: &str, #[case] needle: &str) {
    let doc = base_doc().replace(from, to);
    let err = load(&doc).unwrap_err();
    assert!(
        err.to_string().contains(needle),
        "error {err} should mention {needle}"
    );
}

#[test]
fn unknown_generation_is_a_parse_error() {
    let doc = base_doc().replace("generation = \"gen1\"", "generation = \"gen3\"");
    assert!(load(&doc).is_err());
}
