//! Bilinear resampling.
//!
//! Used in both directions: shrinking the equalized radiograph to an
//! architecture's input resolution, and stretching low-resolution
//! attribution maps back to the source image geometry.

use ndarray::Array2;

/// Resamples `src` to `out_h` x `out_w` with bilinear interpolation.
///
/// Pixel centers are aligned between the two grids; edge samples clamp to
/// the border row/column.
pub fn bilinear(src: &Array2<f32>, out_h: usize, out_w: usize) -> Array2<f32> {
    let (in_h, in_w) = src.dim();
    if in_h == out_h && in_w == out_w {
        return src.clone();
    }

    let scale_y = in_h as f32 / out_h as f32;
    let scale_x = in_w as f32 / out_w as f32;

    Array2::from_shape_fn((out_h, out_w), |(y, x)| {
        let sy = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (in_h - 1) as f32);
        let sx = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (in_w - 1) as f32);

        let y0 = sy.floor() as usize;
        let x0 = sx.floor() as usize;
        let y1 = (y0 + 1).min(in_h - 1);
        let x1 = (x0 + 1).min(in_w - 1);
        let wy = sy - y0 as f32;
        let wx = sx - x0 as f32;

        let top = src[[y0, x0]] * (1.0 - wx) + src[[y0, x1]] * wx;
        let bottom = src[[y1, x0]] * (1.0 - wx) + src[[y1, x1]] * wx;
        top * (1.0 - wy) + bottom * wy
    })
}
