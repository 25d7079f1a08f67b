//! CRC-32 over a packet's header (with the checksum field zeroed) and payload.

use crc::{Algorithm, Crc};

/// `lab2/src/checksum.cpp` builds its table from the bit-reflected
/// polynomial 0xEDB88320 and shifts right; the `crc` crate takes the
/// same algorithm in its normal (non-reflected) form, 0x04C11DB7, and
/// reflects internally per `refin`/`refout` — the two describe the
/// same CRC-32 (matching the standard "123456789" check value below).
const RDT_CRC32: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0x04C1_1DB7,
    init: 0xFFFF_FFFF,
    refin: true,
    refout: true,
    xorout: 0xFFFF_FFFF,
    check: 0xCBF4_3926,
    residue: 0xDEBB_20E3,
};

static CRC: Crc<u32> = Crc::<u32>::new(&RDT_CRC32);

/// Computes the checksum over `header` (with its checksum field already
/// zeroed by the caller) followed by `payload`.
pub fn checksum(header: &[u8], payload: &[u8]) -> u32 {
    let mut digest = CRC.digest();
    digest.update(header);
    digest.update(payload);
    digest.finalize()
}
