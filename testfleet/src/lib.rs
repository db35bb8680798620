// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The testfleet run driver.
//!
//! `testfleet run` discovers (or loads) tests, dispatches them over a substrate and reports the
//! verdict through its exit code. `testfleet list` stops after discovery. The hidden `__worker`
//! subcommand is the worker side of the process substrate.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{Color, OutputContext, StderrStyles};
