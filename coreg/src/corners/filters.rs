//! Structure-tensor filters with strict no-data propagation.
//!
//! No-data is NaN throughout. An output sample is no-data if any input
//! sample under its kernel footprint is no-data or lies outside the buffer.

use common::Buffer2;

/// Normalised 1D Gaussian kernel of radius `ceil(3 * sigma)`.
pub fn gaussian_kernel_1d(sigma: f64) -> Vec<f64> {
    assert!(sigma > 0.0, "Sigma must be positive");

    let radius = (3.0 * sigma).ceil() as usize;
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut kernel: Vec<f64> = (0..2 * radius + 1)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-x * x / two_sigma_sq).exp()
        })
        .collect();

    let sum: f64 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Central differences `0.5 * (f(i+1) - f(i-1))` along x and y.
pub fn derivatives(input: &Buffer2<f64>, dx: &mut Buffer2<f64>, dy: &mut Buffer2<f64>) {
    let (w, h) = (input.width(), input.height());
    dx.reset(w, h, f64::NAN);
    dy.reset(w, h, f64::NAN);

    for y in 0..h {
        for x in 0..w {
            let c = input[(x, y)];
            if c.is_nan() {
                continue;
            }
            if x > 0 && x + 1 < w {
                let l = input[(x - 1, y)];
                let r = input[(x + 1, y)];
                // NaN propagates through the subtraction.
                dx[(x, y)] = 0.5 * (r - l);
            }
            if y > 0 && y + 1 < h {
                let t = input[(x, y - 1)];
                let b = input[(x, y + 1)];
                dy[(x, y)] = 0.5 * (b - t);
            }
        }
    }
}

/// Gradient products `dx*dx`, `dx*dy`, `dy*dy`.
pub fn gradient_products(
    dx: &Buffer2<f64>,
    dy: &Buffer2<f64>,
    xx: &mut Buffer2<f64>,
    xy: &mut Buffer2<f64>,
    yy: &mut Buffer2<f64>,
) {
    let (w, h) = (dx.width(), dx.height());
    xx.reset(w, h, f64::NAN);
    xy.reset(w, h, f64::NAN);
    yy.reset(w, h, f64::NAN);
    for i in 0..dx.len() {
        let (gx, gy) = (dx[i], dy[i]);
        xx[i] = gx * gx;
        xy[i] = gx * gy;
        yy[i] = gy * gy;
    }
}

/// Separable convolution, rows then columns. `scratch` holds the row pass.
pub fn smooth_strict(data: &mut Buffer2<f64>, kernel: &[f64], scratch: &mut Buffer2<f64>) {
    let (w, h) = (data.width(), data.height());
    let radius = kernel.len() / 2;
    scratch.reset(w, h, f64::NAN);

    for y in 0..h {
        let row = data.row(y);
        let out = scratch.row_mut(y);
        for x in radius..w.saturating_sub(radius) {
            // NaN in any tap poisons the sum.
            out[x] = kernel
                .iter()
                .zip(&row[x - radius..=x + radius])
                .map(|(k, v)| k * v)
                .sum();
        }
    }

    data.fill(f64::NAN);
    for y in radius..h.saturating_sub(radius) {
        for x in 0..w {
            let mut sum = 0.0;
            for (i, k) in kernel.iter().enumerate() {
                sum += k * scratch[(x, y + i - radius)];
            }
            data[(x, y)] = sum;
        }
    }
}

/// `R = (Sxx*Syy - Sxy^2) - k*(Sxx + Syy)^2`, written into `sxx`.
/// Non-positive responses become no-data.
pub fn harris_response(sxx: &mut Buffer2<f64>, sxy: &Buffer2<f64>, syy: &Buffer2<f64>, k: f64) {
    for i in 0..sxx.len() {
        let (a, b, c) = (sxx[i], sxy[i], syy[i]);
        let trace = a + c;
        let r = (a * c - b * b) - k * trace * trace;
        sxx[i] = if r > 0.0 { r } else { f64::NAN };
    }
}
