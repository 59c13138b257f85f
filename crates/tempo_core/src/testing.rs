//! Support for testing state implementations.
//!
//! Downstream crates that implement the capability contracts over their own
//! payloads can run [`check_state_contract`] and [`check_split_consistency`]
//! in their test suites to catch the usual mistakes: copies that share
//! buffers, `axpy` implementations that touch their argument, and split
//! propagators that drift away from the derivative rule they are supposed
//! to exponentiate. [`VectorState`] is a minimal dense reference
//! implementation of the contract, used by the crate's own tests and
//! doctests.

use anyhow::{bail, Result};
use nalgebra::DVector;
use num_complex::Complex64;

use crate::state::{ComputeDy, ContractError, Dtype, SplitOperator, State};

/// Minimal dense state: a single vector payload with no embedded metric.
///
/// Implements exactly the minimal contract and nothing else, so it also
/// serves as the canonical counterexample for capability-bound construction.
#[derive(Debug, Clone)]
pub struct VectorState {
    t: f64,
    dtype: Dtype,
    writeable: bool,
    data: DVector<Complex64>,
}

impl VectorState {
    pub fn from_complex(data: DVector<Complex64>) -> Self {
        Self {
            t: 0.0,
            dtype: Dtype::Complex,
            writeable: true,
            data,
        }
    }

    pub fn from_real(data: DVector<f64>) -> Self {
        Self {
            t: 0.0,
            dtype: Dtype::Real,
            writeable: true,
            data: data.map(|v| Complex64::new(v, 0.0)),
        }
    }

    pub fn data(&self) -> &DVector<Complex64> {
        &self.data
    }

    /// Toggle write protection, e.g. to model a shared read-only buffer.
    pub fn set_writeable(&mut self, writeable: bool) {
        self.writeable = writeable;
    }

    fn ensure_writeable(&self) -> Result<()> {
        if !self.writeable {
            bail!(ContractError::NotWriteable);
        }
        Ok(())
    }

    fn ensure_compatible(&self, x: &Self) -> Result<()> {
        if self.data.len() != x.data.len() {
            bail!(ContractError::ShapeMismatch {
                expected: self.data.len(),
                found: x.data.len(),
            });
        }
        if self.dtype != x.dtype {
            bail!(ContractError::DtypeMismatch {
                expected: self.dtype,
                found: x.dtype,
            });
        }
        Ok(())
    }

    fn ensure_real_scalar(&self, f: Complex64) -> Result<()> {
        if self.dtype == Dtype::Real && f.im != 0.0 {
            bail!(ContractError::DtypeMismatch {
                expected: Dtype::Real,
                found: Dtype::Complex,
            });
        }
        Ok(())
    }
}

impl State for VectorState {
    fn t(&self) -> f64 {
        self.t
    }

    fn set_t(&mut self, t: f64) {
        self.t = t;
    }

    fn dtype(&self) -> Dtype {
        self.dtype
    }

    fn is_writeable(&self) -> bool {
        self.writeable
    }

    fn axpy(&mut self, x: &Self, a: Complex64) -> Result<()> {
        self.ensure_writeable()?;
        self.ensure_compatible(x)?;
        self.ensure_real_scalar(a)?;
        self.data.axpy(a, &x.data, Complex64::new(1.0, 0.0));
        Ok(())
    }

    fn scale(&mut self, f: Complex64) -> Result<()> {
        self.ensure_writeable()?;
        self.ensure_real_scalar(f)?;
        self.data *= f;
        Ok(())
    }

    fn copy(&self) -> Self {
        let mut y = self.clone();
        y.writeable = true;
        y
    }

    fn copy_from(&mut self, y: &Self) -> Result<()> {
        self.ensure_writeable()?;
        self.ensure_compatible(y)?;
        self.data.copy_from(&y.data);
        self.t = y.t;
        Ok(())
    }

    fn braket(&self, x: &Self) -> Result<Complex64> {
        self.ensure_compatible(x)?;
        let value = match self.dtype {
            Dtype::Real => self.data.dot(&x.data),
            Dtype::Complex => self.data.dotc(&x.data),
        };
        Ok(value)
    }
}

/// Relative tolerance for the contract checks.
const TOL: f64 = 1e-10;

/// Verify the minimal-contract laws of a state implementation.
///
/// Only capability operations are used, so this works for any payload
/// layout. Pass a representative state with non-zero norm; all checks are
/// measured through `braket`, and a zero state would make them vacuous.
pub fn check_state_contract<S: State>(y: &S) -> Result<()> {
    let norm2 = y.braket(y)?;
    if !norm2.re.is_finite() || norm2.re <= 0.0 {
        bail!("contract checks require a state with finite non-zero norm");
    }
    if norm2.im.abs() > TOL * norm2.re {
        bail!(
            "braket(y, y) must be real, got imaginary part {}",
            norm2.im
        );
    }

    let mut z = y.copy();
    if !z.is_writeable() {
        bail!("copy() must return a writeable state");
    }
    if z.t() != y.t() {
        bail!("copy() must preserve the time coordinate");
    }
    if (z.braket(y)? - norm2).norm() > TOL * norm2.re {
        bail!("copy() must preserve the payload");
    }

    // Mutating the copy must leave the original untouched.
    z.scale(Complex64::new(2.0, 0.0))?;
    if (y.braket(y)? - norm2).norm() > TOL * norm2.re {
        bail!("mutating a copy must not affect the original");
    }
    if (z.braket(&z)? - 4.0 * norm2).norm() > 4.0 * TOL * norm2.re {
        bail!("scale(2) must scale braket(y, y) by 4");
    }

    // copy_from round trip.
    z.copy_from(y)?;
    if z.t() != y.t() {
        bail!("copy_from must restore the time coordinate");
    }
    let diff = z.sub(y)?;
    if diff.braket(&diff)?.re > TOL * norm2.re {
        bail!("copy_from must restore the payload");
    }

    // axpy accumulates into self and leaves its argument alone.
    let mut w = y.copy();
    w.axpy(y, Complex64::new(1.0, 0.0))?;
    if (w.braket(&w)? - 4.0 * norm2).norm() > 4.0 * TOL * norm2.re {
        bail!("axpy(y, 1) on a copy of y must double the state");
    }
    if (y.braket(y)? - norm2).norm() > TOL * norm2.re {
        bail!("axpy must never mutate its argument");
    }

    // Derived operations stay consistent with the minimal set.
    let zeros = y.zeros()?;
    if zeros.braket(&zeros)?.norm() > TOL * norm2.re {
        bail!("zeros() must produce a zero state");
    }
    let sum = y.add(y)?;
    let doubled = y.mul_scalar(Complex64::new(2.0, 0.0))?;
    let resid = sum.sub(&doubled)?;
    if resid.braket(&resid)?.re > TOL * norm2.re {
        bail!("add(y) and mul_scalar(2) must agree");
    }

    // Conjugate symmetry of the inner product.
    if (w.braket(y)? - y.braket(&w)?.conj()).norm() > TOL * norm2.re {
        bail!("braket must be conjugate-symmetric");
    }

    Ok(())
}

/// Verify that the split propagators are consistent with `compute_dy`.
///
/// Propagates one symmetric split step forward and one backward and
/// compares the centered difference against the derivative rule. The
/// residual is second order in `dt`, so pick `dt` small and `tol` a little
/// above the expected `O(dt²)` floor. Requires propagators that accept
/// negative sub-steps, which exact exponentials do.
pub fn check_split_consistency<S>(y: &S, dt: f64, tol: f64) -> Result<()>
where
    S: ComputeDy + SplitOperator,
{
    if !dt.is_finite() || dt <= 0.0 {
        bail!("Step size dt must be positive and finite.");
    }

    let mut dy = y.empty();
    y.compute_dy(&mut dy)?;

    let forward = trotter_step(y, dt)?;
    let backward = trotter_step(y, -dt)?;

    let mut fd = forward.sub(&backward)?;
    fd.scale(Complex64::new(0.5 / dt, 0.0))?;

    let resid = fd.sub(&dy)?;
    let err = resid.norm()?;
    if err > tol * (1.0 + dy.norm()?) {
        bail!("split propagators disagree with compute_dy: residual {err:.3e}");
    }
    Ok(())
}

/// One symmetric split step of size `dt` on a copy of `y`.
fn trotter_step<S: SplitOperator>(y: &S, dt: f64) -> Result<S> {
    let mut z = y.copy();
    z.apply_exp_k(0.5 * dt)?;
    z.set_t(y.t() + 0.5 * dt);
    let mut potentials = z.init_potentials()?;
    if !z.is_linear() {
        z.compute_potentials(&mut potentials)?;
    }
    z.apply_exp_v(dt, &potentials)?;
    z.apply_exp_k(0.5 * dt)?;
    z.set_t(y.t() + dt);
    Ok(z)
}
