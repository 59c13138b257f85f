//! `tempo_core` advances the state of a dynamical system through fixed time
//! steps while staying agnostic to how that state is stored.
//!
//! Key components:
//! - **Contracts** ([`state`]): the minimal [`state::State`] operations plus
//!   independent capability traits for derivatives, split propagators,
//!   normalization and fused elementwise evaluation.
//! - **Evolvers** ([`evolvers`]): [`evolvers::EvolverAbm`], a fifth-order
//!   Adams-Bashforth-Moulton predictor-corrector, and
//!   [`evolvers::EvolverSplit`], a second-order symmetric split-operator
//!   propagator, behind the shared [`evolvers::Evolver`] façade.
//! - **Testing** ([`testing`]): contract-law checks and a minimal dense
//!   reference state for downstream implementations.

pub mod evolvers;
pub mod state;
pub mod testing;
