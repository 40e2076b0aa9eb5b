// crates/core/src/card_png.rs
//! Character-card PNG export.
//!
//! Produces a 600x900 opaque PNG whose `tEXt` chunk named `chara` carries the
//! base64-encoded `chara_card_v2` JSON. The image itself is a flat card
//! backdrop; the payload chunk is what downstream applications read.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Serialize;
use serde_json::json;
use std::io::Write;

pub const CARD_WIDTH: u32 = 600;
pub const CARD_HEIGHT: u32 = 900;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
const BACKDROP_RGB: [u8; 3] = [0x2b, 0x2d, 0x31];

/// The exportable fields of a character card.
#[derive(Debug, Clone, Serialize)]
pub struct CardExport {
    pub name: String,
    pub description: String,
    pub personality: String,
    pub scenario: String,
    pub first_mes: String,
    pub mes_example: String,
}

/// Render the card as a `chara_card_v2` PNG.
pub fn export_card_png(card: &CardExport) -> Vec<u8> {
    let payload = json!({
        "spec": "chara_card_v2",
        "spec_version": "2.0",
        "data": card,
    });
    let encoded = BASE64.encode(payload.to_string());

    let mut out = Vec::with_capacity(8 * 1024);
    out.extend_from_slice(&PNG_SIGNATURE);

    // IHDR: 8-bit truecolor, no interlace.
    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&CARD_WIDTH.to_be_bytes());
    ihdr.extend_from_slice(&CARD_HEIGHT.to_be_bytes());
    ihdr.extend_from_slice(&[8, 2, 0, 0, 0]);
    write_chunk(&mut out, b"IHDR", &ihdr);

    let mut text = Vec::with_capacity(6 + encoded.len());
    text.extend_from_slice(b"chara");
    text.push(0);
    text.extend_from_slice(encoded.as_bytes());
    write_chunk(&mut out, b"tEXt", &text);

    write_chunk(&mut out, b"IDAT", &backdrop_idat());
    write_chunk(&mut out, b"IEND", &[]);
    out
}

/// Read back the base64-decoded content of a named `tEXt` chunk.
pub fn extract_text_chunk(png: &[u8], keyword: &str) -> Option<String> {
    if png.len() < 8 || png[..8] != PNG_SIGNATURE {
        return None;
    }

    let mut offset = 8usize;
    while offset + 8 <= png.len() {
        let length = u32::from_be_bytes(png[offset..offset + 4].try_into().ok()?) as usize;
        let kind = &png[offset + 4..offset + 8];
        let data_start = offset + 8;
        let data_end = data_start.checked_add(length)?;
        if data_end + 4 > png.len() {
            return None;
        }
        let data = &png[data_start..data_end];

        if kind == b"tEXt" {
            if let Some(null_at) = data.iter().position(|&b| b == 0) {
                if &data[..null_at] == keyword.as_bytes() {
                    let decoded = BASE64.decode(&data[null_at + 1..]).ok()?;
                    return String::from_utf8(decoded).ok();
                }
            }
        }
        if kind == b"IEND" {
            break;
        }
        offset = data_end + 4;
    }
    None
}

fn backdrop_idat() -> Vec<u8> {
    // Each scanline: filter byte 0 then flat RGB pixels.
    let mut raw = Vec::with_capacity((CARD_HEIGHT as usize) * (1 + 3 * CARD_WIDTH as usize));
    for _ in 0..CARD_HEIGHT {
        raw.push(0);
        for _ in 0..CARD_WIDTH {
            raw.extend_from_slice(&BACKDROP_RGB);
        }
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(&raw).expect("in-memory write");
    encoder.finish().expect("in-memory zlib finish")
}

fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind);
    hasher.update(data);
    out.extend_from_slice(&hasher.finalize().to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample_card() -> CardExport {
        CardExport {
            name: "Lydia".into(),
            description: "Housecarl of Whiterun.".into(),
            personality: "Dutiful, dry wit.".into(),
            scenario: "Sworn to carry your burdens.".into(),
            first_mes: "I am sworn to your service.".into(),
            mes_example: "{{user}}: Follow me.\n{{char}}: As you wish.".into(),
        }
    }

    #[test]
    fn export_has_signature_and_dimensions() {
        let png = export_card_png(&sample_card());
        assert_eq!(&png[..8], &PNG_SIGNATURE);
        // IHDR follows immediately: 4-byte length, "IHDR", width, height.
        assert_eq!(&png[12..16], b"IHDR");
        assert_eq!(u32::from_be_bytes(png[16..20].try_into().unwrap()), 600);
        assert_eq!(u32::from_be_bytes(png[20..24].try_into().unwrap()), 900);
    }

    #[test]
    fn chara_chunk_round_trips() {
        let png = export_card_png(&sample_card());
        let payload = extract_text_chunk(&png, "chara").expect("chara chunk present");
        let value: Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(value["spec"], "chara_card_v2");
        assert_eq!(value["spec_version"], "2.0");
        assert_eq!(value["data"]["name"], "Lydia");
        assert_eq!(value["data"]["first_mes"], "I am sworn to your service.");
    }

    #[test]
    fn missing_chunk_is_none() {
        let png = export_card_png(&sample_card());
        assert!(extract_text_chunk(&png, "json").is_none());
        assert!(extract_text_chunk(b"not a png", "chara").is_none());
    }
}
