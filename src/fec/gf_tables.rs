use crate::optimize::{self, SimdPolicy};
use std::sync::Once;

/// Order of the field GF(2^8).
pub const GF_ORDER: usize = 256;
/// Reduction polynomial x^8 + x^4 + x^3 + x^2 + 1.
pub const IRREDUCIBLE_POLY: u16 = 0x11D;

// EXP_TABLE is doubled so log(a) + log(b) never needs a modular reduction.
// MUL_LO/MUL_HI hold per-coefficient nibble products for the PSHUFB/TBL
// kernels: c * x == MUL_LO[c][x & 0x0f] ^ MUL_HI[c][x >> 4].
static mut LOG_TABLE: [u8; GF_ORDER] = [0; GF_ORDER];
static mut EXP_TABLE: [u8; 2 * GF_ORDER] = [0; 2 * GF_ORDER];
static mut MUL_LO: [[u8; 16]; GF_ORDER] = [[0; 16]; GF_ORDER];
static mut MUL_HI: [[u8; 16]; GF_ORDER] = [[0; 16]; GF_ORDER];

static GF_INIT: Once = Once::new();

/// Build the log/exp and nibble product tables. Idempotent; every public
/// entry point of the codec runs through here before touching the field.
pub fn init_gf_tables() {
    GF_INIT.call_once(|| unsafe {
        let mut x: u16 = 1;
        for i in 0..255 {
            EXP_TABLE[i] = x as u8;
            LOG_TABLE[x as usize] = i as u8;
            x <<= 1;
            if x >= 0x100 {
                x ^= IRREDUCIBLE_POLY;
            }
        }
        for i in 255..2 * GF_ORDER {
            EXP_TABLE[i] = EXP_TABLE[i - 255];
        }
        for c in 0..GF_ORDER {
            for x in 0..16 {
                MUL_LO[c][x] = gf_mul_table(c as u8, x as u8);
                MUL_HI[c][x] = gf_mul_table(c as u8, (x << 4) as u8);
            }
        }
    });
}

#[inline(always)]
pub(crate) fn gf_mul_table(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    unsafe {
        let log_a = LOG_TABLE[a as usize] as u16;
        let log_b = LOG_TABLE[b as usize] as u16;
        let sum_log = log_a + log_b;
        EXP_TABLE[sum_log as usize]
    }
}

/// Multiply two field elements.
#[inline(always)]
pub fn gf_mul(a: u8, b: u8) -> u8 {
    gf_mul_table(a, b)
}

/// Carry-less shift-and-reduce multiply. Slow; kept as an independent
/// reference the table lookups are checked against.
pub fn gf_mul_shift(mut a: u8, mut b: u8) -> u8 {
    let mut res = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            res ^= a;
        }
        let carry = a & 0x80;
        a <<= 1;
        if carry != 0 {
            a ^= IRREDUCIBLE_POLY as u8;
        }
        b >>= 1;
    }
    res
}

/// Multiplicative inverse.
///
/// # Panics
///
/// Panics if `a` is zero; zero has no inverse, and callers gate on it.
#[inline(always)]
pub fn gf_inv(a: u8) -> u8 {
    if a == 0 {
        panic!("attempted to invert 0 in GF(2^8)");
    }
    unsafe { EXP_TABLE[255 - LOG_TABLE[a as usize] as usize] }
}

/// `x` raised to `n` in the field. `0^0` is defined as 1.
#[inline]
pub fn gf_pow(x: u8, n: usize) -> u8 {
    if n == 0 {
        return 1;
    }
    if x == 0 {
        return 0;
    }
    unsafe {
        let log_x = LOG_TABLE[x as usize] as usize;
        EXP_TABLE[(log_x * n) % 255]
    }
}

/// `acc ^= a * b` for a single byte.
#[inline(always)]
pub fn gf_mul_add(a: u8, b: u8, acc: &mut u8) {
    *acc ^= gf_mul_table(a, b);
}

/// `dst = c * src`, element-wise over equal-length slices.
pub fn gf_mul_slice(c: u8, src: &[u8], dst: &mut [u8]) {
    debug_assert_eq!(src.len(), dst.len());
    if c == 0 {
        dst.fill(0);
        return;
    }
    if c == 1 {
        dst.copy_from_slice(src);
        return;
    }
    optimize::dispatch(|policy| run_kernel(policy, c, src, dst, false));
}

/// `dst ^= c * src`, element-wise over equal-length slices. This is the
/// inner loop of both encode and reconstruct.
pub fn gf_muladd_slice(c: u8, src: &[u8], dst: &mut [u8]) {
    debug_assert_eq!(src.len(), dst.len());
    if c == 0 {
        return;
    }
    if c == 1 {
        xor_slice(src, dst);
        return;
    }
    optimize::dispatch(|policy| run_kernel(policy, c, src, dst, true));
}

fn xor_slice(src: &[u8], dst: &mut [u8]) {
    for (d, &s) in dst.iter_mut().zip(src.iter()) {
        *d ^= s;
    }
}

#[allow(unused_variables)]
fn run_kernel(policy: &dyn SimdPolicy, c: u8, src: &[u8], dst: &mut [u8], accumulate: bool) {
    #[cfg(target_arch = "x86_64")]
    if policy.as_any().is::<optimize::Avx2>() {
        return unsafe { mul_slice_avx2(c, src, dst, accumulate) };
    }
    #[cfg(target_arch = "x86_64")]
    if policy.as_any().is::<optimize::Ssse3>() {
        return unsafe { mul_slice_ssse3(c, src, dst, accumulate) };
    }
    #[cfg(target_arch = "aarch64")]
    if policy.as_any().is::<optimize::Neon>() {
        return unsafe { mul_slice_neon(c, src, dst, accumulate) };
    }
    mul_slice_scalar(c, src, dst, accumulate);
}

// Scalar fallback over the log/exp tables. `c` is non-zero here.
fn mul_slice_scalar(c: u8, src: &[u8], dst: &mut [u8], accumulate: bool) {
    let log_c = unsafe { LOG_TABLE[c as usize] } as usize;
    if accumulate {
        for (d, &s) in dst.iter_mut().zip(src.iter()) {
            if s != 0 {
                *d ^= unsafe { EXP_TABLE[log_c + LOG_TABLE[s as usize] as usize] };
            }
        }
    } else {
        for (d, &s) in dst.iter_mut().zip(src.iter()) {
            *d = if s != 0 {
                unsafe { EXP_TABLE[log_c + LOG_TABLE[s as usize] as usize] }
            } else {
                0
            };
        }
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "ssse3")]
unsafe fn mul_slice_ssse3(c: u8, src: &[u8], dst: &mut [u8], accumulate: bool) {
    use std::arch::x86_64::*;

    let table_lo = _mm_loadu_si128(MUL_LO[c as usize].as_ptr() as *const __m128i);
    let table_hi = _mm_loadu_si128(MUL_HI[c as usize].as_ptr() as *const __m128i);
    let nibble_mask = _mm_set1_epi8(0x0f);

    let mut i = 0;
    while i + 16 <= src.len() {
        let v = _mm_loadu_si128(src.as_ptr().add(i) as *const __m128i);
        let lo = _mm_and_si128(v, nibble_mask);
        let hi = _mm_and_si128(_mm_srli_epi64::<4>(v), nibble_mask);
        let mut prod = _mm_xor_si128(
            _mm_shuffle_epi8(table_lo, lo),
            _mm_shuffle_epi8(table_hi, hi),
        );
        if accumulate {
            let d = _mm_loadu_si128(dst.as_ptr().add(i) as *const __m128i);
            prod = _mm_xor_si128(prod, d);
        }
        _mm_storeu_si128(dst.as_mut_ptr().add(i) as *mut __m128i, prod);
        i += 16;
    }
    mul_slice_scalar(c, &src[i..], &mut dst[i..], accumulate);
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn mul_slice_avx2(c: u8, src: &[u8], dst: &mut [u8], accumulate: bool) {
    use std::arch::x86_64::*;

    let table_lo =
        _mm256_broadcastsi128_si256(_mm_loadu_si128(MUL_LO[c as usize].as_ptr() as *const __m128i));
    let table_hi =
        _mm256_broadcastsi128_si256(_mm_loadu_si128(MUL_HI[c as usize].as_ptr() as *const __m128i));
    let nibble_mask = _mm256_set1_epi8(0x0f);

    let mut i = 0;
    while i + 32 <= src.len() {
        let v = _mm256_loadu_si256(src.as_ptr().add(i) as *const __m256i);
        let lo = _mm256_and_si256(v, nibble_mask);
        let hi = _mm256_and_si256(_mm256_srli_epi64::<4>(v), nibble_mask);
        let mut prod = _mm256_xor_si256(
            _mm256_shuffle_epi8(table_lo, lo),
            _mm256_shuffle_epi8(table_hi, hi),
        );
        if accumulate {
            let d = _mm256_loadu_si256(dst.as_ptr().add(i) as *const __m256i);
            prod = _mm256_xor_si256(prod, d);
        }
        _mm256_storeu_si256(dst.as_mut_ptr().add(i) as *mut __m256i, prod);
        i += 32;
    }
    mul_slice_scalar(c, &src[i..], &mut dst[i..], accumulate);
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn mul_slice_neon(c: u8, src: &[u8], dst: &mut [u8], accumulate: bool) {
    use std::arch::aarch64::*;

    let table_lo = vld1q_u8(MUL_LO[c as usize].as_ptr());
    let table_hi = vld1q_u8(MUL_HI[c as usize].as_ptr());
    let nibble_mask = vdupq_n_u8(0x0f);

    let mut i = 0;
    while i + 16 <= src.len() {
        let v = vld1q_u8(src.as_ptr().add(i));
        let lo = vandq_u8(v, nibble_mask);
        let hi = vshrq_n_u8::<4>(v);
        let mut prod = veorq_u8(vqtbl1q_u8(table_lo, lo), vqtbl1q_u8(table_hi, hi));
        if accumulate {
            prod = veorq_u8(prod, vld1q_u8(dst.as_ptr().add(i)));
        }
        vst1q_u8(dst.as_mut_ptr().add(i), prod);
        i += 16;
    }
    mul_slice_scalar(c, &src[i..], &mut dst[i..], accumulate);
}
