//! Checksum algebra: Adler-32 and CRC-32 over byte ranges plus the combine
//! operators used to stitch checksums across segmented engine jobs.
//!
//! The engine reports a checksum per job. Function codes that accept an
//! initial value chain them in hardware; the rest (the wrap/copy code) hand
//! back a checksum over just that job's bytes, and the stream combines it
//! with its running value using the operators below.

use crc32fast::Hasher;

/// Largest prime smaller than 65536.
const BASE: u32 = 65521;

pub(crate) const INIT_ADLER: u32 = 1;
pub(crate) const INIT_CRC: u32 = 0;

/// Update a running Adler-32 with `buf`. Seed with 1 for a fresh sum.
pub fn adler32(adler: u32, buf: &[u8]) -> u32 {
    let mut a = simd_adler32::Adler32::from_checksum(adler);
    a.write(buf);
    a.finish()
}

/// Update a running CRC-32 (zlib polynomial, pre/post conditioned) with
/// `buf`. Seed with 0 for a fresh sum.
pub fn crc32(crc: u32, buf: &[u8]) -> u32 {
    let mut h = Hasher::new_with_initial(crc);
    h.update(buf);
    h.finalize()
}

/// Combine `adler1 = A(X)` and `adler2 = A(Y)` into `A(X ‖ Y)` where `len2`
/// is the length of `Y`.
///
/// A negative `len2` returns `0xffffffff` as a debugging clue.
pub fn adler32_combine(adler1: u32, adler2: u32, len2: i64) -> u32 {
    if len2 < 0 {
        return 0xffff_ffff;
    }

    /* the derivation of this formula is left as an exercise for the reader */
    let rem = (len2 as u64 % u64::from(BASE)) as u32;
    let mut sum1 = adler1 & 0xffff;
    let mut sum2 = rem.wrapping_mul(sum1) % BASE;
    sum1 += (adler2 & 0xffff) + BASE - 1;
    sum2 += ((adler1 >> 16) & 0xffff) + ((adler2 >> 16) & 0xffff) + BASE - rem;
    if sum1 >= BASE {
        sum1 -= BASE;
    }
    if sum1 >= BASE {
        sum1 -= BASE;
    }
    if sum2 >= BASE << 1 {
        sum2 -= BASE << 1;
    }
    if sum2 >= BASE {
        sum2 -= BASE;
    }
    sum1 | (sum2 << 16)
}

/// Combine `crc1 = C(X)` and `crc2 = C(Y)` into `C(X ‖ Y)` where `len2` is
/// the length of `Y`.
///
/// The zero-padding operator `M` with `C(X ‖ 0^len2) = M · C(X)` is built by
/// squaring the one-zero-bit shift matrix over GF(2); `C(X ‖ Y)` is then
/// `M · C(X) XOR C(Y)`.
pub fn crc32_combine(crc1: u32, crc2: u32, len2: i64) -> u32 {
    if len2 <= 0 {
        return crc1;
    }
    let mut len2 = len2 as u64;
    let mut crc1 = crc1;

    let mut even = [0u32; 32]; // even-power-of-two zeros operator
    let mut odd = [0u32; 32]; // odd-power-of-two zeros operator

    // operator for one zero bit
    odd[0] = 0xedb8_8320; // CRC-32 polynomial, reflected
    let mut row: u32 = 1;
    for entry in odd.iter_mut().skip(1) {
        *entry = row;
        row <<= 1;
    }

    // two zero bits, then four
    gf2_matrix_square(&mut even, &odd);
    gf2_matrix_square(&mut odd, &even);

    // apply len2 zero bytes; the first square yields the eight-zero-bit
    // operator
    loop {
        gf2_matrix_square(&mut even, &odd);
        if len2 & 1 != 0 {
            crc1 = gf2_matrix_times(&even, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }

        gf2_matrix_square(&mut odd, &even);
        if len2 & 1 != 0 {
            crc1 = gf2_matrix_times(&odd, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }
    }

    crc1 ^ crc2
}

fn gf2_matrix_times(mat: &[u32; 32], mut vec: u32) -> u32 {
    let mut sum = 0;
    let mut i = 0;
    while vec != 0 {
        if vec & 1 != 0 {
            sum ^= mat[i];
        }
        vec >>= 1;
        i += 1;
    }
    sum
}

fn gf2_matrix_square(square: &mut [u32; 32], mat: &[u32; 32]) {
    for n in 0..32 {
        square[n] = gf2_matrix_times(mat, mat[n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn adler_known_values() {
        assert_eq!(adler32(INIT_ADLER, b""), 1);
        assert_eq!(adler32(INIT_ADLER, b"Wikipedia"), 0x11e6_0398);
    }

    #[test]
    fn crc_known_values() {
        assert_eq!(crc32(INIT_CRC, b""), 0);
        assert_eq!(crc32(INIT_CRC, b"123456789"), 0xcbf4_3926);
    }

    #[test]
    fn adler_combine_negative_len_sentinel() {
        assert_eq!(adler32_combine(123, 456, -1), 0xffff_ffff);
    }

    #[test]
    fn crc_combine_zero_len_is_identity() {
        assert_eq!(crc32_combine(0xdead_beef, 0x1234_5678, 0), 0xdead_beef);
    }

    #[test]
    fn combine_spec_example() {
        let a = vec![7u8; 100];
        let b: Vec<u8> = (0..10000u32).map(|i| (i * 17 + 3) as u8).collect();
        let whole: Vec<u8> = a.iter().chain(b.iter()).copied().collect();
        assert_eq!(
            adler32_combine(adler32(1, &a), adler32(1, &b), b.len() as i64),
            adler32(1, &whole)
        );
        assert_eq!(
            crc32_combine(crc32(0, &a), crc32(0, &b), b.len() as i64),
            crc32(0, &whole)
        );
    }

    quickcheck! {
        fn qc_adler_combine(a: Vec<u8>, b: Vec<u8>) -> bool {
            let whole: Vec<u8> = a.iter().chain(b.iter()).copied().collect();
            adler32_combine(adler32(1, &a), adler32(1, &b), b.len() as i64)
                == adler32(1, &whole)
        }

        fn qc_crc_combine(a: Vec<u8>, b: Vec<u8>) -> bool {
            let whole: Vec<u8> = a.iter().chain(b.iter()).copied().collect();
            crc32_combine(crc32(0, &a), crc32(0, &b), b.len() as i64)
                == crc32(0, &whole)
        }
    }
}
