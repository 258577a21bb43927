//! Analytic point-spread-function models.
//!
//! Models are evaluated with unit peak (`value(0, 0) == 1`), which is the
//! normalisation the template solver wants; [`Psf::effective_area`] converts
//! to the flux-normalised quantity used by the noise model.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::consts::PSF_RADIUS_SIGMAS;
use crate::mask::BBox;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Psf {
    /// Circular Gaussian with standard deviation `sigma` pixels.
    Gaussian { sigma: f32 },
    /// Core plus wing Gaussian; `wing_ratio` is the wing's peak relative to the core's.
    DoubleGaussian {
        sigma_core: f32,
        sigma_wing: f32,
        wing_ratio: f32,
    },
    /// Airy pattern; `radius` = first dark ring radius in pixels.
    Airy { radius: f32 },
}

impl Psf {
    /// Unit-peak profile at offset `(dr, dc)` from the centre.
    pub fn value(&self, dr: f64, dc: f64) -> f64 {
        let r2 = dr * dr + dc * dc;
        match *self {
            Psf::Gaussian { sigma } => gaussian(r2, sigma as f64),
            Psf::DoubleGaussian {
                sigma_core,
                sigma_wing,
                wing_ratio,
            } => {
                let b = wing_ratio as f64;
                (gaussian(r2, sigma_core as f64) + b * gaussian(r2, sigma_wing as f64)) / (1.0 + b)
            }
            Psf::Airy { radius } => {
                let r = r2.sqrt();
                if r < 1e-12 {
                    1.0 // lim (2*J1(x)/x)^2 as x→0 = 1
                } else {
                    let arg = std::f64::consts::PI * r / radius as f64;
                    let jinc = 2.0 * bessel_j1(arg) / arg;
                    jinc * jinc
                }
            }
        }
    }

    /// Gaussian-equivalent width in pixels.
    pub fn sigma(&self) -> f32 {
        match *self {
            Psf::Gaussian { sigma } => sigma,
            Psf::DoubleGaussian {
                sigma_core,
                sigma_wing,
                wing_ratio,
            } => (sigma_core + wing_ratio * sigma_wing) / (1.0 + wing_ratio),
            // FWHM of the Airy core is 1.029 * radius.
            Psf::Airy { radius } => 0.437 * radius,
        }
    }

    /// Half-size of the square stamp the model is evaluated on.
    pub fn radius(&self) -> i32 {
        let outer = match *self {
            Psf::DoubleGaussian {
                sigma_core,
                sigma_wing,
                ..
            } => sigma_core.max(sigma_wing),
            _ => self.sigma(),
        };
        ((PSF_RADIUS_SIGMAS * outer).ceil() as i32).max(1)
    }

    /// `(Σp)² / Σp²` over the stamp: the number of pixels an unresolved
    /// source's noise is effectively spread over.
    pub fn effective_area(&self) -> f64 {
        let r = self.radius();
        let mut sum = 0.0f64;
        let mut sum2 = 0.0f64;
        for dr in -r..=r {
            for dc in -r..=r {
                let v = self.value(dr as f64, dc as f64);
                sum += v;
                sum2 += v * v;
            }
        }
        if sum2 > 0.0 {
            sum * sum / sum2
        } else {
            1.0
        }
    }

    /// Evaluate the unit-peak profile centred at `(row_c, col_c)` over `bbox`.
    pub fn render(&self, row_c: f64, col_c: f64, bbox: &BBox) -> Array2<f32> {
        let r = self.radius() as f64;
        Array2::from_shape_fn((bbox.height(), bbox.width()), |(i, j)| {
            let dr = (bbox.row0 + i as i32) as f64 - row_c;
            let dc = (bbox.col0 + j as i32) as f64 - col_c;
            if dr.abs() > r || dc.abs() > r {
                0.0
            } else {
                self.value(dr, dc) as f32
            }
        })
    }
}

fn gaussian(r2: f64, sigma: f64) -> f64 {
    (-r2 / (2.0 * sigma * sigma)).exp()
}

// ---------------------------------------------------------------------------
// Bessel J1: Abramowitz & Stegun rational polynomial approximation
// ---------------------------------------------------------------------------

pub fn bessel_j1(x: f64) -> f64 {
    let ax = x.abs();

    if ax < 8.0 {
        let y = x * x;
        let r1 = x
            * (72362614232.0
                + y * (-7895059235.0
                    + y * (242396853.1
                        + y * (-2972611.439 + y * (15704.48260 + y * (-30.16036606))))));
        let r2 = 144725228442.0
            + y * (2300535178.0 + y * (18583304.74 + y * (99447.43394 + y * (376.9991397 + y))));
        r1 / r2
    } else {
        let z = 8.0 / ax;
        let y = z * z;
        let xx = ax - 2.356194491; // ax - 3*PI/4
        let p0 = 1.0
            + y * (0.183105e-2
                + y * (-0.3516396496e-4 + y * (0.2457520174e-5 + y * (-0.240337019e-6))));
        let q0 = 0.04687499995
            + y * (-0.2002690873e-3
                + y * (0.8449199096e-5 + y * (-0.88228987e-6 + y * (0.105787412e-6))));
        let ans = (0.636619772 / ax).sqrt() * (xx.cos() * p0 - z * xx.sin() * q0);
        if x < 0.0 {
            -ans
        } else {
            ans
        }
    }
}
