//! Contrast-limited adaptive histogram equalization.
//!
//! Raw radiographs arrive with wildly inconsistent exposure; every
//! architecture in the ensemble was calibrated against equalized input, so
//! this step is mandatory and runs once per submitted image. The image is
//! divided into a tile grid, each tile's histogram is equalized under a
//! clip limit, and per-pixel values are blended bilinearly between the
//! four surrounding tile mappings to hide tile boundaries.

use ndarray::Array2;

const BINS: usize = 256;

/// Equalizes an 8-bit grayscale image, returning intensities in [0, 1].
///
/// # Arguments
///
/// * `gray` - Input image, rows = height
/// * `tile_grid` - Number of tiles along each axis
/// * `clip_limit` - Histogram clip threshold relative to the uniform bin
///   height; values at or above 1.0
pub fn equalize(gray: &Array2<u8>, tile_grid: usize, clip_limit: f32) -> Array2<f32> {
    let (height, width) = gray.dim();
    let grid = tile_grid.max(2);

    let tile_h = height.div_ceil(grid).max(1);
    let tile_w = width.div_ceil(grid).max(1);

    // Per-tile intensity mappings.
    let mut mappings = vec![[0f32; BINS]; grid * grid];
    for ty in 0..grid {
        for tx in 0..grid {
            let y0 = ty * tile_h;
            let y1 = ((ty + 1) * tile_h).min(height);
            let x0 = tx * tile_w;
            let x1 = ((tx + 1) * tile_w).min(width);
            mappings[ty * grid + tx] = tile_mapping(gray, y0, y1, x0, x1, clip_limit);
        }
    }

    let mut out = Array2::<f32>::zeros((height, width));
    for y in 0..height {
        // Fractional tile coordinate of this row, measured between tile
        // centers so border rows fall back to the nearest tile.
        let gy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let (ty0, ty1, wy) = split_tile_coord(gy, grid);
        for x in 0..width {
            let gx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let (tx0, tx1, wx) = split_tile_coord(gx, grid);

            let v = gray[[y, x]] as usize;
            let m00 = mappings[ty0 * grid + tx0][v];
            let m01 = mappings[ty0 * grid + tx1][v];
            let m10 = mappings[ty1 * grid + tx0][v];
            let m11 = mappings[ty1 * grid + tx1][v];

            let top = m00 * (1.0 - wx) + m01 * wx;
            let bottom = m10 * (1.0 - wx) + m11 * wx;
            out[[y, x]] = (top * (1.0 - wy) + bottom * wy) / 255.0;
        }
    }
    out
}

/// Builds the clipped-equalization mapping for one tile.
fn tile_mapping(
    gray: &Array2<u8>,
    y0: usize,
    y1: usize,
    x0: usize,
    x1: usize,
    clip_limit: f32,
) -> [f32; BINS] {
    let mut identity = [0f32; BINS];
    for (v, slot) in identity.iter_mut().enumerate() {
        *slot = v as f32;
    }

    let pixels = (y1.saturating_sub(y0)) * (x1.saturating_sub(x0));
    if pixels == 0 {
        return identity;
    }

    let mut hist = [0usize; BINS];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[gray[[y, x]] as usize] += 1;
        }
    }

    let limit = ((clip_limit * pixels as f32 / BINS as f32).ceil() as usize).max(1);
    clip_histogram(&mut hist, limit);

    // Cumulative distribution -> remap. A zero-variance tile (all mass at
    // one intensity) keeps the identity mapping; no division by zero.
    let total: usize = hist.iter().sum();
    let cdf_min = hist
        .iter()
        .scan(0usize, |acc, &c| {
            *acc += c;
            Some(*acc)
        })
        .find(|&c| c > 0)
        .unwrap_or(0);
    if total <= cdf_min {
        return identity;
    }

    let mut mapping = [0f32; BINS];
    let mut cdf = 0usize;
    let scale = 255.0 / (total - cdf_min) as f32;
    for (v, &count) in hist.iter().enumerate() {
        cdf += count;
        mapping[v] = (cdf.saturating_sub(cdf_min)) as f32 * scale;
    }
    mapping
}

/// Clips each bin to `limit` and redistributes the clipped excess
/// uniformly, keeping noise in flat regions from being over-amplified.
/// The remainder of the division lands one-per-bin on the first bins so
/// the histogram mass stays exactly equal to the tile's pixel count.
fn clip_histogram(hist: &mut [usize; BINS], limit: usize) {
    let mut excess = 0usize;
    for count in hist.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }
    let bonus = excess / BINS;
    if bonus > 0 {
        for count in hist.iter_mut() {
            *count += bonus;
        }
    }
    for count in hist.iter_mut().take(excess % BINS) {
        *count += 1;
    }
}

/// Splits a fractional tile coordinate into the two neighbouring tile
/// indices and the blend weight toward the second one.
fn split_tile_coord(g: f32, grid: usize) -> (usize, usize, f32) {
    if g <= 0.0 {
        return (0, 0, 0.0);
    }
    let floor = g.floor();
    let i0 = (floor as usize).min(grid - 1);
    let i1 = (i0 + 1).min(grid - 1);
    (i0, i1, g - floor)
}
