//! Vectorized inner loop for radius queries
//!
//! Candidates are filtered in 8-lane blocks: load x/y/z, subtract the
//! centre, squared distance, compare against r². The AVX path is selected
//! at compile time; the scalar path is the portable definition of
//! correctness and handles block tails everywhere.

use boids_core::constants::{PREFETCH_STRIDE, SIMD_WIDTH};

/// Prefetch the cache line holding `ptr`
///
/// No-op off x86_64; correctness never depends on it.
#[inline(always)]
pub(super) fn prefetch_read<T>(ptr: *const T) {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
        _mm_prefetch::<_MM_HINT_T0>(ptr as *const i8);
    }
    #[cfg(not(target_arch = "x86_64"))]
    let _ = ptr;
}

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "x86_64", target_feature = "avx"))] {
        /// Lane mask for one 8-wide block, bit i set when
        /// `|p_i - center|^2 <= r2`
        ///
        /// # Safety
        ///
        /// `xs`, `ys`, `zs` must be readable for 8 consecutive `f32`s.
        #[inline]
        unsafe fn block_mask(
            xs: *const f32,
            ys: *const f32,
            zs: *const f32,
            center: [f32; 3],
            r2: f32,
        ) -> u32 {
            use std::arch::x86_64::*;

            let cx = _mm256_set1_ps(center[0]);
            let cy = _mm256_set1_ps(center[1]);
            let cz = _mm256_set1_ps(center[2]);
            let rr = _mm256_set1_ps(r2);

            let dx = _mm256_sub_ps(_mm256_loadu_ps(xs), cx);
            let dy = _mm256_sub_ps(_mm256_loadu_ps(ys), cy);
            let dz = _mm256_sub_ps(_mm256_loadu_ps(zs), cz);

            let d2 = _mm256_add_ps(
                _mm256_mul_ps(dx, dx),
                _mm256_add_ps(_mm256_mul_ps(dy, dy), _mm256_mul_ps(dz, dz)),
            );

            let hit = _mm256_cmp_ps::<_CMP_LE_OQ>(d2, rr);
            _mm256_movemask_ps(hit) as u32
        }
    } else {
        /// Scalar rendition of the 8-wide lane mask
        ///
        /// # Safety
        ///
        /// `xs`, `ys`, `zs` must be readable for 8 consecutive `f32`s.
        #[inline]
        unsafe fn block_mask(
            xs: *const f32,
            ys: *const f32,
            zs: *const f32,
            center: [f32; 3],
            r2: f32,
        ) -> u32 {
            let mut mask = 0u32;
            for lane in 0..SIMD_WIDTH {
                let dx = *xs.add(lane) - center[0];
                let dy = *ys.add(lane) - center[1];
                let dz = *zs.add(lane) - center[2];
                if dx * dx + dy * dy + dz * dz <= r2 {
                    mask |= 1 << lane;
                }
            }
            mask
        }
    }
}

/// Filter one cell's candidates, emitting the original id of every
/// position within `r2` of `center`
///
/// Blocks of [`SIMD_WIDTH`] run through the lane mask; the tail runs
/// scalar. The next [`PREFETCH_STRIDE`] elements of every lane (and the
/// id array) are prefetched ahead of the loop cursor.
pub(super) fn filter_candidates(
    xs: &[f32],
    ys: &[f32],
    zs: &[f32],
    ids: &[u32],
    center: [f32; 3],
    r2: f32,
    emit: &mut impl FnMut(u32),
) {
    let n = xs.len();
    debug_assert_eq!(n, ys.len());
    debug_assert_eq!(n, zs.len());
    debug_assert_eq!(n, ids.len());

    let blocks = n / SIMD_WIDTH;
    for b in 0..blocks {
        let at = b * SIMD_WIDTH;

        let ahead = at + PREFETCH_STRIDE;
        if ahead < n {
            prefetch_read(unsafe { xs.as_ptr().add(ahead) });
            prefetch_read(unsafe { ys.as_ptr().add(ahead) });
            prefetch_read(unsafe { zs.as_ptr().add(ahead) });
            prefetch_read(unsafe { ids.as_ptr().add(ahead) });
        }

        // Safety: at + SIMD_WIDTH <= n for every full block
        let mut mask = unsafe {
            block_mask(
                xs.as_ptr().add(at),
                ys.as_ptr().add(at),
                zs.as_ptr().add(at),
                center,
                r2,
            )
        };

        while mask != 0 {
            let lane = mask.trailing_zeros() as usize;
            emit(ids[at + lane]);
            mask &= mask - 1;
        }
    }

    for i in blocks * SIMD_WIDTH..n {
        let dx = xs[i] - center[0];
        let dy = ys[i] - center[1];
        let dz = zs[i] - center[2];
        if dx * dx + dy * dy + dz * dz <= r2 {
            emit(ids[i]);
        }
    }
}
