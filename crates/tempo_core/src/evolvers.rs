//! Fixed-step evolvers.
//!
//! Two stepping engines share the [`Evolver`] façade: a fifth-order
//! Adams-Bashforth-Moulton predictor-corrector ([`EvolverAbm`]) that needs
//! only the derivative capability, and a second-order symmetric
//! split-operator propagator ([`EvolverSplit`]) for problems whose kinetic
//! and potential parts can be exponentiated exactly. Both are strictly
//! fixed-step and single-threaded; a step is a deterministic sequence of
//! in-place mutations on buffers the evolver owns.

use std::mem;

use anyhow::{bail, Result};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::state::{ApplyExpr, ComputeDy, Normalize, SplitOperator, State};

/// Adams-Bashforth predictor coefficients, order 5, times `h/720`.
const AB5: [f64; 5] = [1901.0, -2774.0, 2616.0, -1274.0, 251.0];

/// Adams-Moulton corrector coefficients, times `h/720`. The first entry
/// multiplies the derivative evaluated at the predicted state.
const AM4: [f64; 5] = [251.0, 646.0, -264.0, 106.0, -19.0];

/// Depth of the derivative history ring.
const HISTORY_DEPTH: usize = 5;

fn real(a: f64) -> Complex64 {
    Complex64::new(a, 0.0)
}

fn validate_step(dt: f64, t0: f64) -> Result<()> {
    if !dt.is_finite() || dt <= 0.0 {
        bail!("Step size dt must be positive and finite.");
    }
    if !t0.is_finite() {
        bail!("Initial time t0 must be finite.");
    }
    Ok(())
}

/// Uniform entry point shared by both evolvers.
///
/// An evolver owns its working state outright: constructors take the
/// initial state by value, so a caller that wants to keep the original
/// clones it first. The working buffer is never handed out; [`Evolver::y`]
/// returns an independent copy.
pub trait Evolver {
    type State: State;

    /// Apply the per-step procedure `steps` times. `advance(0)` leaves the
    /// evolver untouched.
    ///
    /// Any error raised by a state capability propagates unmodified and
    /// leaves the internal history unspecified; discard the evolver after a
    /// failed call rather than resuming it.
    fn advance(&mut self, steps: usize) -> Result<()>;

    /// Independent copy of the current working state.
    fn y(&self) -> Self::State;

    /// Current time.
    fn t(&self) -> f64;

    /// Step size.
    fn dt(&self) -> f64;

    /// Number of completed steps.
    fn steps_taken(&self) -> u64;
}

/// Settings for [`EvolverAbm`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AbmSettings {
    /// Step size, positive and finite.
    pub dt: f64,
    /// Initial time.
    pub t0: f64,
    /// Re-evaluate the derivative at the corrected state before storing it
    /// in the history (PECE). When disabled the predicted-state derivative
    /// is stored instead (PEC), saving one evaluation per step at some
    /// accuracy cost.
    pub reevaluate: bool,
}

impl AbmSettings {
    pub fn new(dt: f64) -> Self {
        Self {
            dt,
            t0: 0.0,
            reevaluate: true,
        }
    }
}

/// Settings for [`EvolverSplit`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SplitSettings {
    /// Step size, positive and finite.
    pub dt: f64,
    /// Initial time.
    pub t0: f64,
}

impl SplitSettings {
    pub fn new(dt: f64) -> Self {
        Self { dt, t0: 0.0 }
    }
}

/// Fifth-order Adams-Bashforth-Moulton predictor-corrector evolver.
///
/// The multistep formula needs five historical derivative values, so the
/// first four steps are generated by classical RK4 while the history ring
/// fills. Each steady step is a single-pass predict, evaluate, correct,
/// re-evaluate cycle; the corrector is never iterated to convergence, which
/// keeps the cost per step fixed at two derivative evaluations (one in PEC
/// mode).
///
/// Memory: steady state holds eight state-sized buffers (the five-slot
/// derivative ring, the working state, the predicted state and one
/// derivative scratch). Bootstrap steps briefly hold up to ten, since the
/// RK4 stage derivatives stay live until the step completes. States backed
/// by large payloads should budget for this.
///
/// Conserved quantities of the underlying problem are not enforced. Drift
/// in an invariant over a long run means `dt` is too large for the desired
/// accuracy, not that the integrator is misbehaving.
pub struct EvolverAbm<S: ComputeDy> {
    y: S,
    t: f64,
    dt: f64,
    steps: u64,
    reevaluate: bool,
    /// Derivative ring, filled to [`HISTORY_DEPTH`] during bootstrap and
    /// cycled in place afterwards. `head` indexes the most recent entry.
    dys: Vec<S>,
    head: usize,
    /// Predicted state; doubles as the RK4 stage state during bootstrap.
    scratch_y: S,
    /// Predicted derivative; doubles as an RK4 stage derivative.
    scratch_dy: S,
    step_fn: fn(&mut Self) -> Result<()>,
    post_step: Option<fn(&mut S) -> Result<()>>,
}

impl<S: ComputeDy> EvolverAbm<S> {
    /// Take ownership of `y` and evolve it with fixed step `settings.dt`
    /// from `settings.t0`.
    ///
    /// Construction fails to compile when the state lacks the derivative
    /// capability:
    ///
    /// ```compile_fail
    /// use nalgebra::DVector;
    /// use num_complex::Complex64;
    /// use tempo_core::evolvers::{AbmSettings, EvolverAbm};
    /// use tempo_core::testing::VectorState;
    ///
    /// let y = VectorState::from_complex(DVector::from_element(4, Complex64::new(1.0, 0.0)));
    /// let _ = EvolverAbm::new(y, AbmSettings::new(0.1)); // no compute_dy
    /// ```
    pub fn new(mut y: S, settings: AbmSettings) -> Result<Self> {
        validate_step(settings.dt, settings.t0)?;
        y.set_t(settings.t0);
        let scratch_y = y.copy();
        let scratch_dy = y.copy();
        Ok(Self {
            y,
            t: settings.t0,
            dt: settings.dt,
            steps: 0,
            reevaluate: settings.reevaluate,
            dys: Vec::with_capacity(HISTORY_DEPTH),
            head: 0,
            scratch_y,
            scratch_dy,
            step_fn: Self::step_plain,
            post_step: None,
        })
    }

    fn do_step(&mut self) -> Result<()> {
        if self.dys.len() < HISTORY_DEPTH {
            self.step_bootstrap()
        } else {
            (self.step_fn)(self)
        }
    }

    /// Ring index of the derivative `age` steps behind the most recent.
    fn recent(&self, age: usize) -> usize {
        (self.head + HISTORY_DEPTH - age) % HISTORY_DEPTH
    }

    /// One classical RK4 step while the derivative history is filling.
    ///
    /// The first invocation also records the derivative at the initial
    /// point, so after four bootstrap steps the ring holds derivatives at
    /// five consecutive grid times and the multistep cycle can take over.
    fn step_bootstrap(&mut self) -> Result<()> {
        let h = self.dt;
        let t = self.t;

        if self.dys.is_empty() {
            let mut dy = self.y.empty();
            self.y.compute_dy(&mut dy)?;
            self.dys.push(dy);
            self.head = 0;
        }

        let mut k3 = self.y.empty();
        let mut k4 = self.y.empty();

        // k1 is the most recent history entry, f(y_n, t_n). The remaining
        // stages go through scratch_y/scratch_dy and the two locals.
        self.scratch_y.copy_from(&self.y)?;
        self.scratch_y.axpy(&self.dys[self.head], real(0.5 * h))?;
        self.scratch_y.set_t(t + 0.5 * h);
        self.scratch_y.compute_dy(&mut self.scratch_dy)?; // k2

        self.scratch_y.copy_from(&self.y)?;
        self.scratch_y.axpy(&self.scratch_dy, real(0.5 * h))?;
        self.scratch_y.set_t(t + 0.5 * h);
        self.scratch_y.compute_dy(&mut k3)?;

        self.scratch_y.copy_from(&self.y)?;
        self.scratch_y.axpy(&k3, real(h))?;
        self.scratch_y.set_t(t + h);
        self.scratch_y.compute_dy(&mut k4)?;

        self.y.axpy(&self.dys[self.head], real(h / 6.0))?;
        self.y.axpy(&self.scratch_dy, real(h / 3.0))?;
        self.y.axpy(&k3, real(h / 3.0))?;
        self.y.axpy(&k4, real(h / 6.0))?;

        self.t = t + h;
        self.y.set_t(self.t);
        if let Some(hook) = self.post_step {
            hook(&mut self.y)?;
        }

        // Record f(y_{n+1}, t_{n+1}), reusing k4's buffer as the new slot.
        self.y.compute_dy(&mut k4)?;
        self.dys.push(k4);
        self.head = self.dys.len() - 1;
        self.steps += 1;
        Ok(())
    }

    /// Single-pass PECE cycle over the derivative ring.
    fn step_plain(&mut self) -> Result<()> {
        let h = self.dt;
        let t1 = self.t + h;

        // Predict.
        self.scratch_y.copy_from(&self.y)?;
        for (age, c) in AB5.iter().enumerate() {
            let idx = self.recent(age);
            self.scratch_y.axpy(&self.dys[idx], real(h * c / 720.0))?;
        }
        self.scratch_y.set_t(t1);

        // Evaluate at the predicted state.
        self.scratch_y.compute_dy(&mut self.scratch_dy)?;

        // Correct in place on the working state.
        self.y.axpy(&self.scratch_dy, real(h * AM4[0] / 720.0))?;
        for (age, c) in AM4[1..].iter().enumerate() {
            let idx = self.recent(age);
            self.y.axpy(&self.dys[idx], real(h * c / 720.0))?;
        }
        self.y.set_t(t1);

        self.finish_step(t1)
    }

    /// Store the new head derivative over the oldest ring slot, advance
    /// time and run the post-step hook.
    fn finish_step(&mut self, t1: f64) -> Result<()> {
        let oldest = (self.head + 1) % HISTORY_DEPTH;
        if self.reevaluate {
            self.y.compute_dy(&mut self.dys[oldest])?;
        } else {
            self.dys[oldest].copy_from(&self.scratch_dy)?;
        }
        self.head = oldest;
        self.t = t1;
        self.steps += 1;
        if let Some(hook) = self.post_step {
            hook(&mut self.y)?;
        }
        Ok(())
    }
}

impl<S: ComputeDy + Normalize> EvolverAbm<S> {
    /// Like [`EvolverAbm::new`], additionally renormalizing the state after
    /// every completed step. Pairs the integrator with imaginary-time or
    /// otherwise non-unitary derivative rules to descend toward a
    /// stationary state.
    pub fn new_normalized(y: S, settings: AbmSettings) -> Result<Self> {
        let mut evolver = Self::new(y, settings)?;
        evolver.post_step = Some(S::normalize);
        Ok(evolver)
    }
}

impl<S: ComputeDy + ApplyExpr> EvolverAbm<S> {
    /// Switch the steady-state cycle to fused elementwise evaluation.
    ///
    /// The predictor and corrector combinations are each computed in a
    /// single pass over the payload instead of one `axpy` per history
    /// entry, and the corrected state is swapped in from the predictor
    /// buffer. The trajectory is the same as the plain cycle's up to
    /// floating-point reassociation.
    pub fn fused(mut self) -> Self {
        self.step_fn = Self::step_fused;
        self
    }

    fn step_fused(&mut self) -> Result<()> {
        let h = self.dt;
        let t1 = self.t + h;
        let ab = AB5.map(|c| h * c / 720.0);
        let am = AM4.map(|c| h * c / 720.0);
        let (i0, i1, i2, i3, i4) = (
            self.recent(0),
            self.recent(1),
            self.recent(2),
            self.recent(3),
            self.recent(4),
        );

        // Predict.
        let args = [
            &self.y,
            &self.dys[i0],
            &self.dys[i1],
            &self.dys[i2],
            &self.dys[i3],
            &self.dys[i4],
        ];
        self.scratch_y.apply_expr(&args, &|v| {
            v[0] + ab[0] * v[1] + ab[1] * v[2] + ab[2] * v[3] + ab[3] * v[4] + ab[4] * v[5]
        })?;
        self.scratch_y.set_t(t1);

        // Evaluate at the predicted state.
        self.scratch_y.compute_dy(&mut self.scratch_dy)?;

        // Correct into the predictor buffer, then swap it in as the new
        // working state.
        let args = [
            &self.y,
            &self.scratch_dy,
            &self.dys[i0],
            &self.dys[i1],
            &self.dys[i2],
            &self.dys[i3],
        ];
        self.scratch_y.apply_expr(&args, &|v| {
            v[0] + am[0] * v[1] + am[1] * v[2] + am[2] * v[3] + am[3] * v[4] + am[4] * v[5]
        })?;
        self.scratch_y.set_t(t1);
        mem::swap(&mut self.y, &mut self.scratch_y);

        self.finish_step(t1)
    }
}

impl<S: ComputeDy> Evolver for EvolverAbm<S> {
    type State = S;

    fn advance(&mut self, steps: usize) -> Result<()> {
        for _ in 0..steps {
            self.do_step()?;
        }
        Ok(())
    }

    fn y(&self) -> S {
        self.y.copy()
    }

    fn t(&self) -> f64 {
        self.t
    }

    fn dt(&self) -> f64 {
        self.dt
    }

    fn steps_taken(&self) -> u64 {
        self.steps
    }
}

/// Second-order symmetric split-operator (Trotter) evolver.
///
/// Each step applies `exp(-i K h/2)`, then `exp(-i V h)` with the potential
/// taken at the midpoint time, then `exp(-i K h/2)`. For a nonlinear
/// potential the midpoint value is sourced from the half-kinetic-advanced
/// working state itself; for a linear one (`is_linear`) the potentials are
/// computed once at construction and reused every step.
///
/// Accuracy is only second order in `h`, but for unitary `K` and `V` the
/// norm of the state is preserved exactly at every step, independent of
/// `h`, and the whole evolver needs just the working state plus one
/// potentials buffer. That low footprint is its main advantage over the
/// predictor-corrector engine.
pub struct EvolverSplit<S: SplitOperator> {
    y: S,
    t: f64,
    dt: f64,
    steps: u64,
    linear: bool,
    potentials: S::Potentials,
    post_step: Option<fn(&mut S) -> Result<()>>,
}

impl<S: SplitOperator> EvolverSplit<S> {
    /// Take ownership of `y` and evolve it with fixed step `settings.dt`
    /// from `settings.t0`.
    ///
    /// Construction fails to compile when the state lacks the
    /// split-operator capability:
    ///
    /// ```compile_fail
    /// use nalgebra::DVector;
    /// use num_complex::Complex64;
    /// use tempo_core::evolvers::{EvolverSplit, SplitSettings};
    /// use tempo_core::testing::VectorState;
    ///
    /// let y = VectorState::from_complex(DVector::from_element(4, Complex64::new(1.0, 0.0)));
    /// let _ = EvolverSplit::new(y, SplitSettings::new(0.1)); // no propagators
    /// ```
    pub fn new(mut y: S, settings: SplitSettings) -> Result<Self> {
        validate_step(settings.dt, settings.t0)?;
        y.set_t(settings.t0);
        let linear = y.is_linear();
        let potentials = y.init_potentials()?;
        Ok(Self {
            y,
            t: settings.t0,
            dt: settings.dt,
            steps: 0,
            linear,
            potentials,
            post_step: None,
        })
    }

    fn do_step(&mut self) -> Result<()> {
        let h = self.dt;

        self.y.apply_exp_k(0.5 * h)?;
        self.y.set_t(self.t + 0.5 * h);
        if !self.linear {
            // Midpoint potentials, sourced from the half-advanced state.
            self.y.compute_potentials(&mut self.potentials)?;
        }
        self.y.apply_exp_v(h, &self.potentials)?;
        self.y.apply_exp_k(0.5 * h)?;

        self.t += h;
        self.y.set_t(self.t);
        self.steps += 1;
        if let Some(hook) = self.post_step {
            hook(&mut self.y)?;
        }
        Ok(())
    }
}

impl<S: SplitOperator + Normalize> EvolverSplit<S> {
    /// Like [`EvolverSplit::new`], additionally renormalizing the state
    /// after every completed step. Useful for the dissipative and
    /// imaginary-time variants of the propagator.
    pub fn new_normalized(y: S, settings: SplitSettings) -> Result<Self> {
        let mut evolver = Self::new(y, settings)?;
        evolver.post_step = Some(S::normalize);
        Ok(evolver)
    }
}

impl<S: SplitOperator> Evolver for EvolverSplit<S> {
    type State = S;

    fn advance(&mut self, steps: usize) -> Result<()> {
        for _ in 0..steps {
            self.do_step()?;
        }
        Ok(())
    }

    fn y(&self) -> S {
        self.y.copy()
    }

    fn t(&self) -> f64 {
        self.t
    }

    fn dt(&self) -> f64 {
        self.dt
    }

    fn steps_taken(&self) -> u64 {
        self.steps
    }
}
