//! Normalised cross-correlation surfaces computed with FFTs.
//!
//! The raw correlation of a master patch `M` (`mw x mh`) against a slave
//! window `S` (`sw x sh`, at least as large) is evaluated for every offset
//! `u` at which `M` fits inside `S`:
//!
//! ```text
//! c(u) = sum_p M0(p) * S(p + u)
//! ```
//!
//! where `M0` is `M` minus its mean. Both inputs are zero padded to
//! `(mw + sw - 1) x (mh + sh - 1)` so the circular correlation computed in
//! the frequency domain equals the linear one over the valid offsets.
//! Slave window statistics come from summed-area tables.

use std::sync::Arc;

use common::Buffer2;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Master patches with less energy than this are treated as flat.
const MIN_MASTER_NORM: f64 = 1e-9;
/// Relative variance below which a slave window is treated as flat.
const FLAT_WINDOW_EPS: f64 = 1e-12;

/// FFT correlation engine.
///
/// Plans and buffers are sized for the padded correlation size of the last
/// call and rebuilt only when that size changes.
pub struct NccCorrelator {
    planner: FftPlanner<f64>,
    size: (usize, usize),
    forward_x: Arc<dyn Fft<f64>>,
    forward_y: Arc<dyn Fft<f64>>,
    inverse_x: Arc<dyn Fft<f64>>,
    inverse_y: Arc<dyn Fft<f64>>,
    master_spec: Vec<Complex<f64>>,
    slave_spec: Vec<Complex<f64>>,
    transposed: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    rebuilds: usize,
}

impl Default for NccCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl NccCorrelator {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let forward_x = planner.plan_fft_forward(1);
        let forward_y = planner.plan_fft_forward(1);
        let inverse_x = planner.plan_fft_inverse(1);
        let inverse_y = planner.plan_fft_inverse(1);
        Self {
            planner,
            size: (0, 0),
            forward_x,
            forward_y,
            inverse_x,
            inverse_y,
            master_spec: Vec::new(),
            slave_spec: Vec::new(),
            transposed: Vec::new(),
            scratch: Vec::new(),
            rebuilds: 0,
        }
    }

    /// Padded FFT size currently planned.
    pub fn fft_size(&self) -> (usize, usize) {
        self.size
    }

    /// Number of times plans were (re)built.
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }

    fn ensure_size(&mut self, nx: usize, ny: usize) {
        if self.size == (nx, ny) {
            return;
        }
        self.forward_x = self.planner.plan_fft_forward(nx);
        self.forward_y = self.planner.plan_fft_forward(ny);
        self.inverse_x = self.planner.plan_fft_inverse(nx);
        self.inverse_y = self.planner.plan_fft_inverse(ny);

        let scratch_len = [
            &self.forward_x,
            &self.forward_y,
            &self.inverse_x,
            &self.inverse_y,
        ]
        .iter()
        .map(|fft| fft.get_inplace_scratch_len())
        .max()
        .unwrap_or(0);

        let zero = Complex::new(0.0, 0.0);
        self.master_spec = vec![zero; nx * ny];
        self.slave_spec = vec![zero; nx * ny];
        self.transposed = vec![zero; nx * ny];
        self.scratch = vec![zero; scratch_len];
        self.size = (nx, ny);
        self.rebuilds += 1;
        tracing::debug!("Correlation engine planned for {}x{}", nx, ny);
    }

    /// NCC score for every offset of `master` inside `slave`.
    ///
    /// The result is `(sw - mw + 1) x (sh - mh + 1)`; entry `(ux, uy)` scores
    /// master pixel `p` against slave pixel `p + (ux, uy)`. Offsets where the
    /// slave window is flat score 0. Returns `None` when the master patch
    /// itself is flat, or when inputs hold non-finite samples.
    pub fn correlate(&mut self, master: &Buffer2<f64>, slave: &Buffer2<f64>) -> Option<Buffer2<f64>> {
        let (mw, mh) = (master.width(), master.height());
        let (sw, sh) = (slave.width(), slave.height());
        assert!(
            mw > 0 && mh > 0 && sw >= mw && sh >= mh,
            "slave window must contain the master patch"
        );
        if master.iter().chain(slave.iter()).any(|v| !v.is_finite()) {
            return None;
        }

        let n = (mw * mh) as f64;
        let mean = master.iter().sum::<f64>() / n;
        let norm_m = master.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>().sqrt();
        if norm_m <= MIN_MASTER_NORM {
            return None;
        }

        let (nx, ny) = (mw + sw - 1, mh + sh - 1);
        self.ensure_size(nx, ny);

        let zero = Complex::new(0.0, 0.0);
        self.master_spec.fill(zero);
        self.slave_spec.fill(zero);
        for y in 0..mh {
            for (x, &v) in master.row(y).iter().enumerate() {
                self.master_spec[y * nx + x] = Complex::new(v - mean, 0.0);
            }
        }
        for y in 0..sh {
            for (x, &v) in slave.row(y).iter().enumerate() {
                self.slave_spec[y * nx + x] = Complex::new(v, 0.0);
            }
        }

        fft_2d(
            &mut self.master_spec,
            &mut self.transposed,
            &mut self.scratch,
            &*self.forward_x,
            &*self.forward_y,
            (nx, ny),
        );
        fft_2d(
            &mut self.slave_spec,
            &mut self.transposed,
            &mut self.scratch,
            &*self.forward_x,
            &*self.forward_y,
            (nx, ny),
        );
        for (s, m) in self.slave_spec.iter_mut().zip(&self.master_spec) {
            *s *= m.conj();
        }
        fft_2d(
            &mut self.slave_spec,
            &mut self.transposed,
            &mut self.scratch,
            &*self.inverse_x,
            &*self.inverse_y,
            (nx, ny),
        );
        let scale = 1.0 / (nx * ny) as f64;

        let sums = SummedArea::new(slave, |v| v);
        let sums_sq = SummedArea::new(slave, |v| v * v);
        let (ow, oh) = (sw - mw + 1, sh - mh + 1);
        let scores = Buffer2::from_fn(ow, oh, |ux, uy| {
            let s = sums.window(ux, uy, mw, mh);
            let s2 = sums_sq.window(ux, uy, mw, mh);
            let var = s2 - s * s / n;
            if var <= FLAT_WINDOW_EPS * s2.abs().max(1.0) {
                return 0.0;
            }
            let c = self.slave_spec[uy * nx + ux].re * scale;
            (c / (norm_m * var.sqrt())).clamp(-1.0, 1.0)
        });
        Some(scores)
    }
}

/// In-place 2D transform: rows, then columns through a transpose.
fn fft_2d(
    data: &mut [Complex<f64>],
    transposed: &mut [Complex<f64>],
    scratch: &mut [Complex<f64>],
    along_x: &dyn Fft<f64>,
    along_y: &dyn Fft<f64>,
    (nx, ny): (usize, usize),
) {
    along_x.process_with_scratch(data, scratch);
    transpose(data, transposed, nx, ny);
    along_y.process_with_scratch(transposed, scratch);
    transpose(transposed, data, ny, nx);
}

/// `dst` (h x w rows) = transpose of `src` (w x h rows).
fn transpose(src: &[Complex<f64>], dst: &mut [Complex<f64>], width: usize, height: usize) {
    for y in 0..height {
        for x in 0..width {
            dst[x * height + y] = src[y * width + x];
        }
    }
}

/// Summed-area table with a zero first row and column.
struct SummedArea {
    table: Buffer2<f64>,
}

impl SummedArea {
    fn new(data: &Buffer2<f64>, f: impl Fn(f64) -> f64) -> Self {
        let (w, h) = (data.width(), data.height());
        let mut table = Buffer2::new_filled(w + 1, h + 1, 0.0);
        for y in 0..h {
            let mut row_sum = 0.0;
            for x in 0..w {
                row_sum += f(data[(x, y)]);
                table[(x + 1, y + 1)] = table[(x + 1, y)] + row_sum;
            }
        }
        Self { table }
    }

    #[inline]
    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        let t = &self.table;
        t[(x + w, y + h)] - t[(x, y + h)] - t[(x + w, y)] + t[(x, y)]
    }
}
