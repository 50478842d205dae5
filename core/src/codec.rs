//! Save codec: PlayerState / SaveRoot to and from compact encoded text.
//!
//! Format: `FORMAT_HEADER + base64url(zlib(json)) + FORMAT_TRAILER`.
//!
//! RULE: encoding is deterministic. Records are ordered maps and the
//! compression level is fixed, so identical saves always produce identical
//! text. The cloud fingerprint depends on this.
//!
//! Text without the header is read as the pre-header format: bare base64 of
//! the JSON document.

use crate::{
    error::{DecodeError, SaveResult},
    player::PlayerState,
    root::{SaveRoot, StoredRoot},
    value::SaveValue,
};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use flate2::{
    read::{GzDecoder, ZlibDecoder},
    write::{GzEncoder, ZlibEncoder},
    Compression,
};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha512_256};
use std::io::{Read, Write};

pub const FORMAT_HEADER: &str = "DimSaveFormatAAB";
pub const FORMAT_TRAILER: &str = "EndOfSavefile";

const COMPRESSION_LEVEL: u32 = 9;

/// Encode any serializable save structure.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> SaveResult<String> {
    let json = serde_json::to_vec(value)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(COMPRESSION_LEVEL));
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    Ok(format!(
        "{FORMAT_HEADER}{}{FORMAT_TRAILER}",
        URL_SAFE_NO_PAD.encode(compressed)
    ))
}

/// Decode encoded text into `T`. Never panics on foreign input.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, DecodeError> {
    let json = unwrap_text(text)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Decode the durable-storage value, recognizing the pre-slot format.
/// Slots are read loosely so a single damaged slot does not fail the root.
pub fn decode_root(text: &str) -> Result<StoredRoot, DecodeError> {
    let json = unwrap_text(text)?;
    let SaveValue::Record(mut record) = serde_json::from_slice::<SaveValue>(&json)? else {
        return Err(DecodeError::Shape("save root is not a record"));
    };
    match record.remove("saves") {
        Some(SaveValue::Record(saves)) => Ok(StoredRoot::Slotted(SaveRoot::from_values(
            record.get("current"),
            saves,
        ))),
        None | Some(SaveValue::Null) => Ok(StoredRoot::Legacy(PlayerState::from_record(record))),
        Some(_) => Err(DecodeError::Shape("save root slots are not a record")),
    }
}

/// Hex SHA-512/256 digest of the encoded form.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> SaveResult<String> {
    let encoded = encode(value)?;
    Ok(hex::encode(Sha512_256::digest(encoded.as_bytes())))
}

/// Encode a save for export. The segmented-speedrun flag is always exported
/// as set; the caller's in-memory value is left untouched.
pub fn encode_for_export(player: &PlayerState) -> SaveResult<String> {
    let mut exported = player.clone();
    exported.set_speedrun_segmented(true);
    encode(&exported)
}

/// Wrap already-encoded text the way the legacy remote path stores it:
/// base64url(gzip(text)).
pub fn encode_bundle(text: &str) -> SaveResult<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(COMPRESSION_LEVEL));
    encoder.write_all(text.as_bytes())?;
    Ok(URL_SAFE_NO_PAD.encode(encoder.finish()?))
}

/// Undo `encode_bundle`, yielding text ready for `decode`.
pub fn decode_bundle(blob: &str) -> Result<String, DecodeError> {
    let normalized: String = blob
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    if normalized.is_empty() {
        return Err(DecodeError::Empty);
    }
    let bytes = URL_SAFE_NO_PAD.decode(normalized)?;
    let mut text = Vec::new();
    GzDecoder::new(bytes.as_slice())
        .read_to_end(&mut text)
        .map_err(DecodeError::Decompress)?;
    Ok(String::from_utf8(text)?)
}

/// Strip the envelope and return the JSON document bytes.
fn unwrap_text(text: &str) -> Result<Vec<u8>, DecodeError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }

    match text.strip_prefix(FORMAT_HEADER) {
        Some(body) => {
            let body = body
                .strip_suffix(FORMAT_TRAILER)
                .ok_or(DecodeError::MissingTrailer)?;
            let compressed = URL_SAFE_NO_PAD.decode(body.trim_end_matches('='))?;
            let mut json = Vec::new();
            ZlibDecoder::new(compressed.as_slice())
                .read_to_end(&mut json)
                .map_err(DecodeError::Decompress)?;
            Ok(json)
        }
        None => Ok(STANDARD.decode(text)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_without_trailer_is_rejected() {
        let good = encode(&PlayerState::default_start()).unwrap();
        let cut = good.strip_suffix(FORMAT_TRAILER).unwrap();
        assert!(matches!(
            decode::<PlayerState>(cut),
            Err(DecodeError::MissingTrailer)
        ));
    }

    #[test]
    fn bundle_accepts_standard_alphabet() {
        let text = encode(&PlayerState::default_start()).unwrap();
        let bundle = encode_bundle(&text).unwrap();
        let standard: String = bundle
            .chars()
            .map(|c| match c {
                '-' => '+',
                '_' => '/',
                other => other,
            })
            .collect();
        assert_eq!(decode_bundle(&standard).unwrap(), text);
    }
}
