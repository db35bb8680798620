// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for testfleet: test discovery, dispatch over a parallel substrate, single
//! test execution, result aggregation and stats recording.
//!
//! A run goes through two fan-out rounds. The discovery round expands test programs into test
//! cases (see [`list`]), and the execution round runs every test case (see [`runner`]). Both are
//! scheduled by a [`dispatch::Dispatcher`] over a [`dispatch::Substrate`].

pub mod config;
pub mod descriptor;
pub mod dispatch;
pub mod env;
pub mod errors;
pub mod helpers;
pub mod list;
pub mod record;
pub mod reporter;
pub mod runner;
pub mod time;
