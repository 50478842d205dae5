//! Codec: envelope format, determinism, and the legacy input shapes.

use base64::{engine::general_purpose::STANDARD, Engine};
use dimsave_core::{
    codec::{self, FORMAT_HEADER, FORMAT_TRAILER},
    error::DecodeError,
    player::PlayerState,
    root::{SaveRoot, StoredRoot},
    validator,
    value::SaveValue,
};

fn sample() -> PlayerState {
    let mut p = PlayerState::default_start();
    p.set("antimatter", 1.5e12);
    p.set("options.saveFileName", "main run");
    p.set("dimensions.antimatter", SaveValue::List(vec![1i64.into(), 2i64.into()]));
    p
}

#[test]
fn encoded_text_is_enveloped_and_decodes_back() {
    let save = sample();
    let text = codec::encode(&save).expect("encode");
    assert!(text.starts_with(FORMAT_HEADER));
    assert!(text.ends_with(FORMAT_TRAILER));

    let back: PlayerState = codec::decode(&text).expect("decode");
    assert_eq!(back, save);
}

#[test]
fn encoding_is_deterministic() {
    let a = codec::encode(&sample()).expect("encode a");
    let b = codec::encode(&sample()).expect("encode b");
    assert_eq!(a, b);
    assert_eq!(
        codec::fingerprint(&sample()).expect("fp a"),
        codec::fingerprint(&sample()).expect("fp b"),
    );
}

#[test]
fn fingerprint_changes_with_content() {
    let mut changed = sample();
    changed.set("antimatter", 1.6e12);
    assert_ne!(
        codec::fingerprint(&sample()).expect("fp"),
        codec::fingerprint(&changed).expect("fp changed"),
    );
}

#[test]
fn nan_survives_as_text_and_is_caught() {
    let mut save = sample();
    save.set("records.bestReality", f64::NAN);
    let text = codec::encode(&save).expect("encode");
    let back: PlayerState = codec::decode(&text).expect("decode");

    assert_eq!(
        back.get("records.bestReality"),
        Some(&SaveValue::Text("NaN".into()))
    );
    assert_eq!(
        validator::check(Some(&back)),
        "1 NaN player property found: player.records.bestReality"
    );
}

#[test]
fn garbage_is_a_decode_error_not_a_panic() {
    for text in ["", "   ", "not a save", "DimSaveFormatAAB!!!EndOfSavefile"] {
        assert!(codec::decode::<PlayerState>(text).is_err(), "accepted {text:?}");
    }
    assert!(matches!(
        codec::decode::<PlayerState>(""),
        Err(DecodeError::Empty)
    ));
}

#[test]
fn bare_base64_json_is_read_as_pre_header_format() {
    let json = r#"{"version":9,"money":"1e30","options":{}}"#;
    let text = STANDARD.encode(json);
    let save: PlayerState = codec::decode(&text).expect("decode legacy text");
    assert_eq!(save.version(), 9);
    assert!(save.has_progress_field());
}

#[test]
fn decode_root_recognizes_both_layouts() {
    let mut root = SaveRoot::default();
    root.current = 2;
    root.set_slot(2, Some(sample()));
    let slotted = codec::encode(&root).expect("encode root");
    match codec::decode_root(&slotted).expect("decode root") {
        StoredRoot::Slotted(decoded) => {
            assert_eq!(decoded.current, 2);
            assert_eq!(decoded.slot(2), Some(&sample()));
            assert!(decoded.slot(0).is_none());
        }
        other => panic!("expected slotted root, got {other:?}"),
    }

    let single = codec::encode(&sample()).expect("encode single");
    assert!(matches!(
        codec::decode_root(&single).expect("decode single"),
        StoredRoot::Legacy(_)
    ));
}

#[test]
fn decode_root_resets_only_a_slot_that_is_not_a_record() {
    let text = STANDARD.encode(r#"{"current":1,"saves":{"0":null,"1":"corrupt","2":{"antimatter":5}}}"#);
    match codec::decode_root(&text).expect("decode root") {
        StoredRoot::Slotted(decoded) => {
            assert_eq!(decoded.current, 1);
            assert!(decoded.slot(0).is_none());
            let reset = decoded.slot(1).expect("damaged slot is kept as an empty save");
            assert_eq!(validator::check(Some(reset)), validator::MISSING_PROGRESS);
            assert_eq!(
                decoded.slot(2).and_then(|p| p.get("antimatter")),
                Some(&SaveValue::Number(5.0))
            );
        }
        other => panic!("expected slotted root, got {other:?}"),
    }
}

#[test]
fn decode_root_rejects_roots_of_the_wrong_shape() {
    for json in [r#"[1,2]"#, r#"{"current":0,"saves":[]}"#] {
        assert!(matches!(
            codec::decode_root(&STANDARD.encode(json)),
            Err(DecodeError::Shape(_))
        ));
    }
}

#[test]
fn export_marks_speedrun_segmented_without_touching_state() {
    let save = sample();
    assert!(!save.speedrun_segmented());
    let text = codec::encode_for_export(&save).expect("export");
    let exported: PlayerState = codec::decode(&text).expect("decode export");
    assert!(exported.speedrun_segmented());
    assert!(!save.speedrun_segmented());
}

#[test]
fn legacy_bundle_wraps_encoded_text() {
    let text = codec::encode(&sample()).expect("encode");
    let bundle = codec::encode_bundle(&text).expect("bundle");
    assert_eq!(codec::decode_bundle(&bundle).expect("unbundle"), text);
    assert!(codec::decode_bundle("").is_err());
}
