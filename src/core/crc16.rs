//! CRC-16/ARC checksum used by the frame header.
//!
//! Reflected polynomial `0xA001`, initial value `0x0000`, no final xor.
//! The lookup table is built at compile time so every build produces the
//! same bytes on the wire.

const POLYNOMIAL: u16 = 0xA001;

const TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut value = 0u16;
        let mut temp = i as u16;
        let mut bit = 0;
        while bit < 8 {
            if (value ^ temp) & 0x0001 != 0 {
                value = (value >> 1) ^ POLYNOMIAL;
            } else {
                value >>= 1;
            }
            temp >>= 1;
            bit += 1;
        }
        table[i] = value;
        i += 1;
    }
    table
}

/// Compute the checksum of `data`.
#[inline]
pub fn checksum(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ byte as u16) & 0xFF) as usize]
    })
}
