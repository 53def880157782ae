pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
/// Fractional digits used when an amount is folded into the digest record.
pub const AMOUNT_DECIMALS: usize = 6;
/// Upper bound for the optional nonce search; a SHA-256 digest has no more bits.
pub const MAX_DIFFICULTY: u32 = (HASH_SIZE * 8) as u32;
