#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Staged action pipeline for the otad update agent
//!
//! An update is a short pipeline of asynchronous actions sharing one install
//! plan. This crate provides the action capability trait, the serial
//! processor that runs actions and pipes the plan between them, and the
//! cooperative cancellation token that `stop()` cascades through.

mod action;
mod cancel;
mod processor;

pub use action::{Action, ActionContext};
pub use cancel::CancelToken;
pub use processor::{ActionProcessor, ProcessorHandle};
