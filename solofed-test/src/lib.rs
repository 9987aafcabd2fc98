// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of solofed.
//
// solofed is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// solofed is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with solofed.  If not,
// see <http://www.gnu.org/licenses/>.

//! # The solofed Integration Tests
//!
//! # Introduction
//!
//! `cargo test` gives us no notion of a test fixture: no way to say "run this suite once against
//! the in-memory store & once more against DynamoDB". Rather than write (and maintain) one test
//! binary per storage backend, the integration tests in this crate opt out of the default test
//! harness:
//!
//! ```toml
//! [[test]]
//!     name = "follows"
//!     harness = false
//! ```
//!
//! Cargo will then compile `tests/follows.rs`, which must provide its own `main()`, and run it
//! with whatever arguments followed `--` on the `cargo test` command line. [libtest-mimic] parses
//! those arguments & reports results the way `cargo test` users expect.
//!
//! [libtest-mimic]: https://docs.rs/libtest-mimic/latest/libtest_mimic/index.html
//!
//! # Project Structure
//!
//! The test functions themselves live in this library, written against
//! [Backend](solofed::storage::Backend) so that they don't care which store they're handed. The
//! test programs under `tests` register them (via [inventory]), build each configured fixture &
//! run every registered test against it. Code relating to the test framework itself (the `Test`
//! struct, test configuration) belongs in `tests/common`.
//!
//! Every test works with actors whose IDs are unique to that test invocation, so the suite can be
//! run repeatedly against a long-lived DynamoDB instance without cleaning up in between.

use chrono::Utc;
use libtest_mimic::Failed;
use url::Url;
use uuid::Uuid;

use solofed::{
    entities::{LocalUser, Username},
    origin::Origin,
};

pub mod follows;

/// The local user on whose behalf all tests run
pub fn local_user() -> Result<LocalUser, Failed> {
    Ok(LocalUser::new(
        Username::new("alice")?,
        "Alice",
        "https://social.example".parse::<Origin>()?,
        Utc::now(),
    )?)
}

/// A remote actor nobody's seen before
pub fn stranger() -> Result<Url, Failed> {
    Ok(Url::parse(&format!(
        "https://remote.example/users/{}",
        Uuid::new_v4().simple()
    ))?)
}

/// A fresh Follow activity ID at the remote server
pub fn follow_id() -> Result<Url, Failed> {
    Ok(Url::parse(&format!(
        "https://remote.example/follows/{}",
        Uuid::new_v4()
    ))?)
}
