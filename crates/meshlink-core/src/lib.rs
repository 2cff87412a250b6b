//! meshlink core - pure packet helpers for MeshCore LoRa traffic
//!
//! This crate holds the synchronous, side-effect free pieces of the bridge:
//!
//! - [`payload`] - Reconstruct the encrypted on-air form of a channel message
//! - [`advert`] - Decode raw advert payloads (key, location, name)
//! - [`clock`] - Timestamp and retention helpers for persisted records
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```rust
//! use meshlink_core::payload::{ChannelSecret, reconstruct_hex, match_attempt};
//!
//! let secret = ChannelSecret::from_hex("8b3387e9c5cdea6ac9e5edbaa115cd72").unwrap();
//! let on_air = reconstruct_hex(&secret, 1_700_000_000, 0, "hello", 0).unwrap();
//! let raw = hex::decode(&on_air).unwrap();
//! assert_eq!(match_attempt(&secret, 1_700_000_000, 0, "hello", &raw), Some(0));
//! ```

pub mod advert;
pub mod clock;
pub mod error;
pub mod payload;

pub use advert::{decode_advert, decode_advert_hex, AdvertInfo};
pub use clock::{is_expired, unix_now, RECORD_RETENTION};
pub use error::{CoreError, Result};
pub use payload::{
    analyzer_url, match_attempt, packet_hash, reconstruct_ciphertext, reconstruct_hex,
    ChannelSecret, MAX_ATTEMPTS,
};
