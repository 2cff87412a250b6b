//! Group-text payload reconstruction
//!
//! MeshCore channel messages carry no message identifier. To recognize an
//! overheard packet as a repeat of something we sent, we rebuild the exact
//! encrypted payload the radio would have put on air and compare bytes.
//!
//! On-air layout of a `GRP_TXT` payload:
//!
//! ```text
//! ┌──────────────┬──────────┬──────────────────────────────────────┐
//! │ channel hash │ MAC (2B) │ AES-128-ECB(plaintext)               │
//! │ SHA256(k)[0] │ HMAC-256 │ ts(4, LE) | flags | text | 0x00 | pad│
//! └──────────────┴──────────┴──────────────────────────────────────┘
//! ```
//!
//! `flags` holds the text type in its upper six bits and the retransmission
//! attempt counter in the lower two.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

type HmacSha256 = Hmac<Sha256>;

/// AES block size in bytes
pub const CIPHER_BLOCK_LEN: usize = 16;

/// Minimum channel secret length (AES-128 key)
pub const MIN_SECRET_LEN: usize = 16;

/// Truncated MAC length carried on air
pub const MAC_LEN: usize = 2;

/// Number of retransmission attempts representable in the flags byte
pub const MAX_ATTEMPTS: u8 = 4;

/// Payload type byte for group text, used when hashing for the analyzer
pub const GRP_TXT_TYPE_BYTE: u8 = 0x05;

/// Base URL of the public packet analyzer
pub const ANALYZER_BASE_URL: &str = "https://analyzer.letsmesh.net/packets?packet_hash=";

/// Symmetric key material shared by members of a channel
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelSecret(Vec<u8>);

impl ChannelSecret {
    /// Wrap raw secret bytes, rejecting secrets too short for AES-128
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() < MIN_SECRET_LEN {
            return Err(CoreError::SecretTooShort {
                len: bytes.len(),
                min: MIN_SECRET_LEN,
            });
        }
        Ok(Self(bytes))
    }

    /// Parse a hex-encoded secret as printed by the device's channel list
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        Self::new(hex::decode(hex_str.trim())?)
    }

    /// Raw secret bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// One-byte channel identity: first byte of SHA-256 over the secret
    pub fn channel_hash(&self) -> u8 {
        Sha256::digest(&self.0)[0]
    }
}

impl std::fmt::Debug for ChannelSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSecret")
            .field("len", &self.0.len())
            .field("channel_hash", &format_args!("{:02x}", self.channel_hash()))
            .finish()
    }
}

/// Pack the flags byte from text type and attempt counter
pub fn flags_byte(txt_type: u8, attempt: u8) -> u8 {
    ((txt_type & 0x3F) << 2) | (attempt & 0x03)
}

/// Build the zero-padded plaintext block sequence
fn build_plaintext(sender_timestamp: u32, flags: u8, text: &str) -> Vec<u8> {
    let mut plaintext = Vec::with_capacity(5 + text.len() + 1 + CIPHER_BLOCK_LEN);
    plaintext.extend_from_slice(&sender_timestamp.to_le_bytes());
    plaintext.push(flags);
    plaintext.extend_from_slice(text.as_bytes());
    plaintext.push(0);

    let pad = (CIPHER_BLOCK_LEN - plaintext.len() % CIPHER_BLOCK_LEN) % CIPHER_BLOCK_LEN;
    plaintext.resize(plaintext.len() + pad, 0);
    plaintext
}

/// Recompute the on-air identity of an outgoing channel message.
///
/// Deterministic: identical inputs always yield identical bytes. The result
/// is `channel_hash ‖ mac ‖ ciphertext` and is meant to be compared against
/// the `pkt_payload` of overheard repeat events.
pub fn reconstruct_ciphertext(
    secret: &ChannelSecret,
    sender_timestamp: u32,
    txt_type: u8,
    text: &str,
    attempt: u8,
) -> Result<Vec<u8>> {
    if attempt >= MAX_ATTEMPTS {
        return Err(CoreError::AttemptOutOfRange(attempt));
    }

    let plaintext = build_plaintext(sender_timestamp, flags_byte(txt_type, attempt), text);

    // ECB: every block encrypted independently with the same key
    let key = &secret.as_bytes()[..MIN_SECRET_LEN];
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut ciphertext = Vec::with_capacity(plaintext.len());
    for chunk in plaintext.chunks(CIPHER_BLOCK_LEN) {
        let mut block = GenericArray::clone_from_slice(chunk);
        cipher.encrypt_block(&mut block);
        ciphertext.extend_from_slice(&block);
    }

    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| CoreError::InvalidKey(e.to_string()))?;
    mac.update(&ciphertext);
    let tag = mac.finalize().into_bytes();

    let mut payload = Vec::with_capacity(1 + MAC_LEN + ciphertext.len());
    payload.push(secret.channel_hash());
    payload.extend_from_slice(&tag[..MAC_LEN]);
    payload.extend_from_slice(&ciphertext);
    Ok(payload)
}

/// Hex form of [`reconstruct_ciphertext`], matching the device's JSON log
pub fn reconstruct_hex(
    secret: &ChannelSecret,
    sender_timestamp: u32,
    txt_type: u8,
    text: &str,
    attempt: u8,
) -> Result<String> {
    reconstruct_ciphertext(secret, sender_timestamp, txt_type, text, attempt).map(hex::encode)
}

/// Probe attempt counters 0..=3 in order and return the first that
/// reproduces `observed` byte for byte.
pub fn match_attempt(
    secret: &ChannelSecret,
    sender_timestamp: u32,
    txt_type: u8,
    text: &str,
    observed: &[u8],
) -> Option<u8> {
    (0..MAX_ATTEMPTS).find(|&attempt| {
        reconstruct_ciphertext(secret, sender_timestamp, txt_type, text, attempt)
            .map(|candidate| candidate == observed)
            .unwrap_or(false)
    })
}

/// Analyzer packet hash: SHA-256 over the type byte and payload, first 8
/// bytes as uppercase hex
pub fn packet_hash(pkt_payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update([GRP_TXT_TYPE_BYTE]);
    hasher.update(pkt_payload);
    hex::encode_upper(&hasher.finalize()[..8])
}

/// Analyzer URL for a hex payload, `None` if the hex is malformed
pub fn analyzer_url(pkt_payload_hex: &str) -> Option<String> {
    let raw = hex::decode(pkt_payload_hex).ok()?;
    Some(format!("{}{}", ANALYZER_BASE_URL, packet_hash(&raw)))
}
