//! Capability contracts for evolvable states.
//!
//! A state is the value `y(t)` of a dynamical system, opaque to the evolvers
//! except through the operations declared here. Each extended capability is
//! a separate trait, and an evolver bounds only on the traits it actually
//! uses, so pairing a state with an evolver it cannot serve is rejected when
//! the evolver is constructed rather than deep inside a stepping loop.

use anyhow::Result;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Value domain of a state's payload.
///
/// Real states may skip conjugation in inner products and must reject
/// complex scale factors instead of silently truncating them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dtype {
    Real,
    Complex,
}

/// Contract violations raised by state implementations.
#[derive(Debug, Error)]
pub enum ContractError {
    /// An operation was requested of a state that does not provide it.
    /// Evolver construction rejects incapable states through trait bounds;
    /// this variant exists for dynamic wrappers over the contract.
    #[error("state does not provide the {0} capability")]
    MissingCapability(&'static str),

    #[error("state shapes do not match: expected {expected}, found {found}")]
    ShapeMismatch { expected: usize, found: usize },

    #[error("cannot write {found:?} data into a {expected:?} state")]
    DtypeMismatch { expected: Dtype, found: Dtype },

    #[error("state is not writeable")]
    NotWriteable,
}

/// Minimal contract every evolvable state must satisfy.
///
/// The in-place operations (`axpy`, `scale`, `copy_from`) mutate `self` and
/// never their arguments. A value returned by [`State::copy`] is logically
/// independent: mutating either the original or the copy must not affect
/// the other.
pub trait State: Sized {
    /// Time coordinate at which the payload is considered valid.
    ///
    /// This value is authoritative for every time-dependent computation
    /// requested of the state; evolvers set it on their working copy before
    /// invoking any time-dependent capability.
    fn t(&self) -> f64;

    /// Set the time coordinate.
    fn set_t(&mut self, t: f64);

    /// Value domain of the payload.
    fn dtype(&self) -> Dtype;

    /// Whether in-place mutation is currently permitted.
    fn is_writeable(&self) -> bool;

    /// `self += a * x`.
    fn axpy(&mut self, x: &Self, a: Complex64) -> Result<()>;

    /// `self *= f`.
    fn scale(&mut self, f: Complex64) -> Result<()>;

    /// Independent writeable duplicate.
    fn copy(&self) -> Self;

    /// Overwrite the payload and time with `y`'s, preserving identity.
    fn copy_from(&mut self, y: &Self) -> Result<()>;

    /// Inner product `⟨self|x⟩`, conjugate-linear in `self` for complex
    /// states and unconjugated for real ones, honoring any metric weight
    /// embedded in the state.
    fn braket(&self, x: &Self) -> Result<Complex64>;

    /// Writeable copy whose contents are about to be overwritten.
    fn empty(&self) -> Self {
        self.copy()
    }

    /// Zero-filled writeable copy.
    fn zeros(&self) -> Result<Self> {
        let mut y = self.copy();
        y.scale(Complex64::new(0.0, 0.0))?;
        Ok(y)
    }

    /// `self + x` as a new state.
    fn add(&self, x: &Self) -> Result<Self> {
        let mut y = self.copy();
        y.axpy(x, Complex64::new(1.0, 0.0))?;
        Ok(y)
    }

    /// `self - x` as a new state.
    fn sub(&self, x: &Self) -> Result<Self> {
        let mut y = self.copy();
        y.axpy(x, Complex64::new(-1.0, 0.0))?;
        Ok(y)
    }

    /// `-self` as a new state.
    fn neg(&self) -> Result<Self> {
        self.mul_scalar(Complex64::new(-1.0, 0.0))
    }

    /// `f * self` as a new state.
    fn mul_scalar(&self, f: Complex64) -> Result<Self> {
        let mut y = self.copy();
        y.scale(f)?;
        Ok(y)
    }

    /// `self / f` as a new state.
    fn div_scalar(&self, f: Complex64) -> Result<Self> {
        self.mul_scalar(f.inv())
    }

    /// `√⟨self|self⟩`.
    fn norm(&self) -> Result<f64> {
        Ok(self.braket(self)?.re.sqrt())
    }
}

/// Derivative capability, required by [`crate::evolvers::EvolverAbm`].
pub trait ComputeDy: State {
    /// Write `dy/dt` evaluated at `self.t()` into `dy`.
    ///
    /// The buffer is caller-supplied so that steady-state stepping performs
    /// no allocation. Implementations must not read stale data from `dy`.
    fn compute_dy(&self, dy: &mut Self) -> Result<()>;
}

/// Split-operator capability, required by [`crate::evolvers::EvolverSplit`].
///
/// Assumes the evolution law factors as `dy/dt = -i (K + V[y]) y` where the
/// state can apply the exact propagators `exp(-i K dt)` and `exp(-i V dt)`
/// over an arbitrary sub-step.
pub trait SplitOperator: State {
    /// Representation of the potential part. Use `Self` to source the
    /// potential from a full companion state, or a smaller dedicated value
    /// when the state is much larger than what determines the potential.
    type Potentials;

    /// `true` when `V` does not depend on `y`. The evolver then computes
    /// the potentials once at construction and reuses them on every step;
    /// explicit time dependence still reaches `apply_exp_v` through
    /// [`State::t`].
    fn is_linear(&self) -> bool {
        false
    }

    /// Produce the potentials buffer the evolver will own. Called once at
    /// evolver construction; for linear problems the returned value is the
    /// precomputed potential itself.
    fn init_potentials(&self) -> Result<Self::Potentials>;

    /// Refresh `out` from `self` at `self.t()`. Never called for linear
    /// problems.
    fn compute_potentials(&self, out: &mut Self::Potentials) -> Result<()> {
        let _ = out;
        Ok(())
    }

    /// Apply `exp(-i K dt)` in place.
    fn apply_exp_k(&mut self, dt: f64) -> Result<()>;

    /// Apply `exp(-i V dt)` in place, with `V` read from `potentials`.
    fn apply_exp_v(&mut self, dt: f64, potentials: &Self::Potentials) -> Result<()>;
}

/// Optional per-step projection onto a normalization manifold, including
/// any orthogonalization of components that must stay mutually orthogonal.
///
/// Pairing this capability with either evolver turns a dissipative or
/// imaginary-time propagator into a descent toward a stationary state.
pub trait Normalize: State {
    fn normalize(&mut self) -> Result<()>;
}

/// Batched elementwise evaluation.
///
/// A pure performance hook: the stored result must equal what the
/// corresponding composition of `axpy`, `scale` and `copy_from` would
/// produce, fused into a single pass over the payload.
pub trait ApplyExpr: State {
    /// Evaluate `expr` elementwise over `args` and store the result in
    /// `self`. All arguments share `self`'s shape and `self` must not alias
    /// an argument. Real states receive elements with zero imaginary part
    /// and must reject results that leave the real axis.
    fn apply_expr(
        &mut self,
        args: &[&Self],
        expr: &dyn Fn(&[Complex64]) -> Complex64,
    ) -> Result<()>;
}
