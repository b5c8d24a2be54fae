use crate::types::Candle;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Content hash of a series (FNV-1a over timestamp and close bits).
///
/// Used as an opaque change marker in coverage records; never compared
/// across implementations.
#[must_use]
pub fn series_checksum(candles: &[Candle]) -> u64 {
    let mut h = FNV_OFFSET;
    let mut mix = |bytes: [u8; 8]| {
        for b in bytes {
            h ^= u64::from(b);
            h = h.wrapping_mul(FNV_PRIME);
        }
    };
    for c in candles {
        mix(c.ts.timestamp().to_le_bytes());
        mix(c.close.to_bits().to_le_bytes());
    }
    h
}
