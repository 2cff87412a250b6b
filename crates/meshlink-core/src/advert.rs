//! Advert payload decoding
//!
//! Adverts are broadcast announcements carrying a node's public key, an
//! optional location, and an optional display name. The device logs the raw
//! payload as hex; this module pulls the fields out of the fixed layout:
//!
//! | Offset     | Field                                   |
//! |------------|-----------------------------------------|
//! | `0..32`    | public key                              |
//! | `32..36`   | timestamp (LE u32)                      |
//! | `36..100`  | signature                               |
//! | `100`      | app flags (bit 4: location, bit 7: name)|
//! | `101..109` | lat/lon as LE `f32` pair, if location   |
//! | rest       | UTF-8 name, if name                     |
//!
//! Radio payloads are frequently truncated, so decoding never fails loudly:
//! anything shorter than the fixed header yields `None`.

use serde::{Deserialize, Serialize};

/// Public key length
pub const PUBLIC_KEY_LEN: usize = 32;

/// Signature length
pub const SIGNATURE_LEN: usize = 64;

/// Offset of the app flags byte
pub const FLAGS_OFFSET: usize = PUBLIC_KEY_LEN + 4 + SIGNATURE_LEN;

/// Smallest payload that carries every fixed field
pub const MIN_ADVERT_LEN: usize = FLAGS_OFFSET + 1;

/// Flag bit: location follows the flags byte
pub const FLAG_HAS_LOCATION: u8 = 0x10;

/// Flag bit: name follows the flags (and location, if any)
pub const FLAG_HAS_NAME: u8 = 0x80;

/// Decoded advert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertInfo {
    /// Public key, lowercase hex
    pub public_key: String,
    /// Advert timestamp (sender clock)
    pub timestamp: u32,
    /// Signature bytes, hex
    pub signature: String,
    /// Raw app flags
    pub flags: u8,
    /// Latitude, if the location bit is set and present
    pub lat: Option<f32>,
    /// Longitude, if the location bit is set and present
    pub lon: Option<f32>,
    /// Node name, if the name bit is set and non-empty
    pub name: Option<String>,
}

impl AdvertInfo {
    /// Whether the advert carried a location
    pub fn has_location(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }
}

/// Decode a raw advert payload
pub fn decode_advert(raw: &[u8]) -> Option<AdvertInfo> {
    if raw.len() < MIN_ADVERT_LEN {
        return None;
    }

    let public_key = hex::encode(&raw[..PUBLIC_KEY_LEN]);
    let ts_bytes: [u8; 4] = raw[PUBLIC_KEY_LEN..PUBLIC_KEY_LEN + 4].try_into().ok()?;
    let timestamp = u32::from_le_bytes(ts_bytes);
    let signature = hex::encode(&raw[PUBLIC_KEY_LEN + 4..FLAGS_OFFSET]);
    let flags = raw[FLAGS_OFFSET];

    let mut offset = MIN_ADVERT_LEN;
    let (mut lat, mut lon) = (None, None);

    if flags & FLAG_HAS_LOCATION != 0 {
        if let Some(loc) = raw.get(offset..offset + 8) {
            lat = Some(f32::from_le_bytes([loc[0], loc[1], loc[2], loc[3]]));
            lon = Some(f32::from_le_bytes([loc[4], loc[5], loc[6], loc[7]]));
        }
        offset += 8;
    }

    let name = if flags & FLAG_HAS_NAME != 0 && offset < raw.len() {
        let decoded = String::from_utf8_lossy(&raw[offset..]);
        let trimmed = decoded.trim_end_matches('\0');
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    } else {
        None
    };

    Some(AdvertInfo {
        public_key,
        timestamp,
        signature,
        flags,
        lat,
        lon,
        name,
    })
}

/// Decode a hex-encoded advert payload, `None` on bad hex or short input
pub fn decode_advert_hex(pkt_payload: &str) -> Option<AdvertInfo> {
    let raw = hex::decode(pkt_payload.trim()).ok()?;
    decode_advert(&raw)
}
