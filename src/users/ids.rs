//! Account identifiers.
//!
//! An id is 8 bytes of big-endian nanosecond timestamp followed by 16 random
//! bytes, encoded with an unpadded 64-symbol URL-safe alphabet and cut to
//! [`ID_LEN`] characters. The alphabet lists its symbols in ASCII order, so
//! comparing two ids as strings compares their timestamps first.

use base64::{
    alphabet::Alphabet,
    engine::{general_purpose::NO_PAD, GeneralPurpose},
    Engine,
};
use rand::{rngs::OsRng, RngCore};
use time::OffsetDateTime;

pub const ID_LEN: usize = 27;

/// URL-safe base64 symbols, sorted.
pub const SORTABLE_SYMBOLS: &str =
    "-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const SORTABLE: Alphabet = match Alphabet::new(SORTABLE_SYMBOLS) {
    Ok(alphabet) => alphabet,
    Err(_) => panic!("invalid id alphabet"),
};

const ENGINE: GeneralPurpose = GeneralPurpose::new(&SORTABLE, NO_PAD);

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("entropy source unavailable: {0}")]
    Entropy(#[from] rand::Error),
}

pub fn generate() -> Result<String, GenerationError> {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos().max(0) as u64;
    generate_at(nanos)
}

pub fn generate_at(timestamp_nanos: u64) -> Result<String, GenerationError> {
    let mut raw = [0u8; 24];
    raw[..8].copy_from_slice(&timestamp_nanos.to_be_bytes());
    OsRng.try_fill_bytes(&mut raw[8..])?;

    // 24 bytes encode to 32 symbols; the timestamp ends inside symbol 11.
    let mut id = ENGINE.encode(raw);
    id.truncate(ID_LEN);
    Ok(id)
}
