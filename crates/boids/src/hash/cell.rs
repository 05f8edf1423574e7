//! Cell index schemes
//!
//! Two schemes, chosen at build time and fixed thereafter:
//!
//! - *Linear* (default): `x + y*Gx + z*Gx*Gy`. Cheap, table sized exactly
//!   to the grid.
//! - *Morton-64* (`morton` feature): bit-interleaved (x, y, z). Nearby
//!   cells land near each other in memory at the cost of a padded table.

/// Linear row-major index
#[inline]
pub fn linear_index(coords: [u32; 3], grid: [u32; 3]) -> u64 {
    coords[0] as u64
        + coords[1] as u64 * grid[0] as u64
        + coords[2] as u64 * grid[0] as u64 * grid[1] as u64
}

/// Table length for the linear scheme
#[inline]
pub fn linear_table_len(grid: [u32; 3]) -> u64 {
    grid[0] as u64 * grid[1] as u64 * grid[2] as u64
}

/// Spread the low 21 bits of `v` so each lands 3 positions apart
#[inline]
fn part1by2(v: u32) -> u64 {
    let mut x = v as u64 & 0x1f_ffff;
    x = (x | (x << 32)) & 0x001f_0000_0000_ffff;
    x = (x | (x << 16)) & 0x001f_0000_ff00_00ff;
    x = (x | (x << 8)) & 0x100f_00f0_0f00_f00f;
    x = (x | (x << 4)) & 0x10c3_0c30_c30c_30c3;
    x = (x | (x << 2)) & 0x1249_2492_4924_9249;
    x
}

/// Morton-64 interleave of (x, y, z), x in the lowest lane
#[inline]
pub fn morton_index(coords: [u32; 3]) -> u64 {
    part1by2(coords[0]) | (part1by2(coords[1]) << 1) | (part1by2(coords[2]) << 2)
}

/// Table length for the Morton scheme
///
/// The spread is order-preserving per axis, so the interleave of the
/// maximum coordinates bounds every index in the grid. Over-allocates
/// relative to linear; that is the price of locality.
#[inline]
pub fn morton_table_len(grid: [u32; 3]) -> u64 {
    morton_index([grid[0] - 1, grid[1] - 1, grid[2] - 1]) + 1
}

// Build-time scheme selection

#[cfg(not(feature = "morton"))]
#[inline]
pub fn cell_index(coords: [u32; 3], grid: [u32; 3]) -> u64 {
    linear_index(coords, grid)
}

#[cfg(feature = "morton")]
#[inline]
pub fn cell_index(coords: [u32; 3], _grid: [u32; 3]) -> u64 {
    morton_index(coords)
}

#[cfg(not(feature = "morton"))]
#[inline]
pub fn table_len(grid: [u32; 3]) -> u64 {
    linear_table_len(grid)
}

#[cfg(feature = "morton")]
#[inline]
pub fn table_len(grid: [u32; 3]) -> u64 {
    morton_table_len(grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_index() {
        let grid = [4, 3, 2];
        assert_eq!(linear_index([0, 0, 0], grid), 0);
        assert_eq!(linear_index([3, 0, 0], grid), 3);
        assert_eq!(linear_index([0, 1, 0], grid), 4);
        assert_eq!(linear_index([0, 0, 1], grid), 12);
        assert_eq!(linear_index([3, 2, 1], grid), 23);
        assert_eq!(linear_table_len(grid), 24);
    }

    #[test]
    fn test_morton_small() {
        assert_eq!(morton_index([0, 0, 0]), 0);
        assert_eq!(morton_index([1, 0, 0]), 0b001);
        assert_eq!(morton_index([0, 1, 0]), 0b010);
        assert_eq!(morton_index([0, 0, 1]), 0b100);
        assert_eq!(morton_index([1, 1, 1]), 0b111);
        assert_eq!(morton_index([2, 0, 0]), 0b001_000);
        assert_eq!(morton_index([3, 3, 3]), 0b111_111);
    }

    #[test]
    fn test_morton_no_collisions_in_small_grid() {
        let grid = [8, 8, 8];
        let mut seen = std::collections::HashSet::new();
        for z in 0..8 {
            for y in 0..8 {
                for x in 0..8 {
                    assert!(seen.insert(morton_index([x, y, z])));
                }
            }
        }
        assert_eq!(seen.len(), 512);
    }

    #[test]
    fn test_morton_table_len_bounds_grid() {
        let grid = [5, 9, 3];
        let bound = morton_table_len(grid);
        for z in 0..grid[2] {
            for y in 0..grid[1] {
                for x in 0..grid[0] {
                    assert!(morton_index([x, y, z]) < bound);
                }
            }
        }
    }

    #[test]
    fn test_morton_high_bits() {
        // 21-bit coordinates survive the spread without overlap
        let max = (1 << 21) - 1;
        assert_eq!(
            morton_index([max, max, max]),
            0x7fff_ffff_ffff_ffff
        );
    }
}
