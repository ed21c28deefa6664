// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! This crate contains the integration test suite for `strike_cache`.
//!
//! - The `util` module contains the handle manager and cache constructors shared by different
//!   test modules.
//! - We do not use the default Rust test harness, but instead use this `mod.rs` file as the
//!   entry point to run all other tests, so that shared helpers live in one place.
//! - For test naming, put the topic of the test at the start of the name, e.g.
//!   `remote_evicted_strike_is_rebuilt` rather than `rebuild_evicted_remote_strike`.

#![allow(missing_docs, reason = "we don't need docs for testing")]
#![allow(clippy::cast_possible_truncation, reason = "not critical for testing")]

mod concurrency;
mod promise;
mod remote;
mod util;
