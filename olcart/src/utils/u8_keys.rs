//! Edge-byte lookup over the unsorted key arrays of the small node layouts.

#[cfg(all(
    feature = "simd_keys",
    target_arch = "x86_64",
    target_feature = "sse2"
))]
#[inline]
fn x86_64_sse_find_key_16_up_to(key: u8, keys: [u8; 16], num_children: usize) -> Option<usize> {
    use std::arch::x86_64::{
        __m128i, _mm_cmpeq_epi8, _mm_loadu_si128, _mm_movemask_epi8, _mm_set1_epi8,
    };

    let bitfield = unsafe {
        let key_vec = _mm_set1_epi8(key as i8);
        let results = _mm_cmpeq_epi8(key_vec, _mm_loadu_si128(keys.as_ptr() as *const __m128i));
        let mask = (1 << num_children) - 1;
        _mm_movemask_epi8(results) & mask
    };
    if bitfield != 0 {
        return Some(bitfield.trailing_zeros() as usize);
    }
    None
}

#[cfg(all(
    feature = "simd_keys",
    target_arch = "aarch64",
    target_feature = "neon"
))]
#[inline]
fn aarch64_neon_find_key_16(key: u8, keys: [u8; 16], num_children: usize) -> Option<usize> {
    use std::arch::aarch64::*;
    unsafe {
        let key_vec = vdupq_n_u8(key);
        let node_keys_vec = vld1q_u8(keys.as_ptr());
        let cmp_vec = vceqq_u8(key_vec, node_keys_vec);

        // No movemask on NEON: narrow each lane to 4 bits and read the result as one u64.
        let eq_mask = vreinterpretq_u16_u8(cmp_vec);
        let res = vshrn_n_u16::<4>(eq_mask);
        let matches = vget_lane_u64::<0>(vreinterpret_u64_u8(res));

        if matches != 0 {
            let shifted = (matches.trailing_zeros() >> 2) as usize;
            if shifted < num_children {
                return Some(shifted);
            }
        }
        None
    }
}

/// Position of `key` among the first `num_children` entries of `keys`, which are unordered.
#[allow(unreachable_code)]
pub fn u8_keys_find_key_position<const WIDTH: usize>(
    key: u8,
    keys: &[u8; WIDTH],
    num_children: usize,
) -> Option<usize> {
    let num_children = num_children.min(WIDTH);

    if WIDTH == 16 {
        #[cfg(all(
            feature = "simd_keys",
            target_arch = "x86_64",
            target_feature = "sse2"
        ))]
        if let Ok(keys) = <[u8; 16]>::try_from(&keys[..]) {
            return x86_64_sse_find_key_16_up_to(key, keys, num_children);
        }

        #[cfg(all(
            feature = "simd_keys",
            target_arch = "aarch64",
            target_feature = "neon"
        ))]
        if let Ok(keys) = <[u8; 16]>::try_from(&keys[..]) {
            return aarch64_neon_find_key_16(key, keys, num_children);
        }
    }

    (0..num_children).find(|&i| keys[i] == key)
}
