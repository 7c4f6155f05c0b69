//! Percentage bucketing
//!
//! A user's bucket is `fnv1a_32(decimal(user_id)) % 100`. The function is
//! part of the public contract: changing it moves users between rollout
//! cohorts, so it must stay byte-for-byte stable.

use crate::types::UserId;

/// Number of buckets users are spread over
pub const BUCKET_COUNT: u32 = 100;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a
#[must_use]
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Deterministic bucket in `0..100` for a user.
#[must_use]
// BUCKET_COUNT fits in a u8
#[allow(clippy::cast_possible_truncation)]
pub fn bucket_for(user_id: UserId) -> u8 {
    (fnv1a_32(user_id.get().to_string().as_bytes()) % BUCKET_COUNT) as u8
}
