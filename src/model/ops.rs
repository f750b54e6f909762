//! Tensor operations for the convolutional backbones.
//!
//! Everything here runs on the CPU over `ndarray` buffers. Convolution is
//! the hot path and parallelizes across output channels with rayon; the
//! remaining ops are cheap reductions.

use ndarray::{Array1, Array2, Array3, Array4};
use rayon::prelude::*;

/// 3x3 (or any odd kernel) same-padding convolution with stride 1.
///
/// # Arguments
///
/// * `input` - Shape `[in_channels, height, width]`
/// * `weight` - Shape `[out_channels, in_channels, k, k]`
/// * `bias` - Shape `[out_channels]`
///
/// # Returns
///
/// Output of shape `[out_channels, height, width]`.
pub fn conv2d_same(input: &Array3<f32>, weight: &Array4<f32>, bias: &Array1<f32>) -> Array3<f32> {
    let (in_c, height, width) = input.dim();
    let (out_c, w_in_c, kh, kw) = weight.dim();
    debug_assert_eq!(in_c, w_in_c, "channel mismatch");
    let pad_y = kh / 2;
    let pad_x = kw / 2;

    let planes: Vec<Array2<f32>> = (0..out_c)
        .into_par_iter()
        .map(|oc| {
            let mut plane = Array2::<f32>::from_elem((height, width), bias[oc]);
            for ic in 0..in_c {
                for ky in 0..kh {
                    for kx in 0..kw {
                        let w = weight[[oc, ic, ky, kx]];
                        if w == 0.0 {
                            continue;
                        }
                        // Valid input rows for this kernel tap.
                        for y in 0..height {
                            let sy = y as isize + ky as isize - pad_y as isize;
                            if sy < 0 || sy >= height as isize {
                                continue;
                            }
                            for x in 0..width {
                                let sx = x as isize + kx as isize - pad_x as isize;
                                if sx < 0 || sx >= width as isize {
                                    continue;
                                }
                                plane[[y, x]] += w * input[[ic, sy as usize, sx as usize]];
                            }
                        }
                    }
                }
            }
            plane
        })
        .collect();

    let mut out = Array3::<f32>::zeros((out_c, height, width));
    for (oc, plane) in planes.into_iter().enumerate() {
        out.index_axis_mut(ndarray::Axis(0), oc).assign(&plane);
    }
    out
}

/// In-place rectified linear unit.
pub fn relu_inplace(x: &mut Array3<f32>) {
    x.mapv_inplace(|v| v.max(0.0));
}

/// 2x2 average pooling with stride 2; trailing odd rows/columns are dropped.
pub fn avg_pool2(input: &Array3<f32>) -> Array3<f32> {
    let (channels, height, width) = input.dim();
    let out_h = (height / 2).max(1);
    let out_w = (width / 2).max(1);
    Array3::from_shape_fn((channels, out_h, out_w), |(c, y, x)| {
        let y0 = (y * 2).min(height - 1);
        let x0 = (x * 2).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);
        (input[[c, y0, x0]] + input[[c, y0, x1]] + input[[c, y1, x0]] + input[[c, y1, x1]]) / 4.0
    })
}

/// Global average pooling over the spatial axes.
pub fn global_avg_pool(input: &Array3<f32>) -> Array1<f32> {
    let (channels, height, width) = input.dim();
    let norm = (height * width) as f32;
    Array1::from_shape_fn(channels, |c| {
        input.index_axis(ndarray::Axis(0), c).sum() / norm
    })
}

/// Numerically stable softmax.
pub fn softmax(logits: &Array1<f32>) -> Array1<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps = logits.mapv(|v| (v - max).exp());
    let sum = exps.sum();
    exps / sum
}
