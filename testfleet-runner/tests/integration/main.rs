// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for discovery and execution against a fake source tree.
//!
//! The fake tree has shell scripts standing in for the program-listing command, gtest-style test
//! programs and the single-test entry point, so these tests only run on Unix.

#![cfg(unix)]

mod discovery;
mod execution;
mod fixtures;
