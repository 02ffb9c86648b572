//! `vigil-runtime` - instrumented bytecode runtime for the vigil debugger.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Breakpoint table and hit policies.
pub mod breakpoint;
/// Bytecode representation, execution, and live patching.
pub mod bytecode;
/// Thread suspension and stepping control.
pub mod control;
/// Runtime and evaluation errors.
pub mod error;
/// Breakpoint condition evaluation against frames.
pub mod eval;
/// Call frames.
pub mod frame;
/// Thread identity and the thread registry.
pub mod thread;
/// Execution-event instrumentation.
pub mod trace;
/// Runtime value types.
pub mod value;

mod runtime;

pub use runtime::{FunctionTable, Runtime};
