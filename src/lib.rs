// src/lib.rs

#![allow(dead_code)]

//! Core of a run-time resource manager: resource accounting over a typed
//! hierarchical tree (`resource`), the EXC application lifecycle (`app`),
//! partition validation for offload-capable platforms (`validator`),
//! binding-domain bookkeeping (`binding`), and the threshold/hysteresis
//! primitives an optimization policy polls to decide when to re-run
//! (`trigger`).
//!
//! None of these modules own a scheduling policy, an RPC surface, or a
//! process entry point — see `SPEC_FULL.md` `§1` (Non-goals). They exist to
//! be driven by one: a policy thread calls into `resource`/`app` under its
//! own scheduling loop, and `validator`/`binding` are consulted while that
//! policy builds a working-mode assignment.
//!
//! # Errors
//!
//! Each subsystem returns its own typed error enum from [`error`]
//! (`AccounterError`, `AppError`, `ValidatorError`) rather than a single
//! crate-wide error — callers are expected to match on the small fixed set a
//! given subsystem can actually return, the same way the reference daemon's
//! public API returns one exit-code enum per module.
//!
//! # Concurrency
//!
//! There is no async runtime here: every subsystem is plain OS threads
//! cooperating through `parking_lot` mutexes, condvars and rwlocks, with
//! lock ordering documented at the call sites that need it (`§5`).

pub mod app;
pub mod binding;
pub mod error;
pub mod ids;
pub mod resource;
pub mod trigger;
pub mod validator;

pub use error::{AccounterError, AccounterResult, AppError, AppResult, ValidatorError, ValidatorResult};
pub use ids::{AppUid, ViewToken};
