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

//! # storage
//!
//! Abstractions for the solofed storage layer: the local user & the follow graph.
//!
//! Implementations must make every mutation atomic with respect to its ([Direction], actor) key;
//! callers rely on that for idempotence. Operations on different keys are independent.

use async_trait::async_trait;
use url::Url;

use crate::entities::{Direction, FollowRelationship, FollowState, LocalUser, RelationshipId};

#[derive(Debug)]
pub struct Error {
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error {
            source: Box::new(err),
        }
    }
}

/// The result of [Backend::insert_or_fetch]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Inserted {
    /// The relationship was written
    Created(FollowRelationship),
    /// There was already an active relationship for the key; here it is
    Existing(FollowRelationship),
    /// The write lost to a concurrent one, and by the time we looked there was no active
    /// relationship for the key after all; re-read & decide again
    Raced,
}

#[async_trait]
pub trait Backend {
    /// Retrieve the local user, if it's been set up
    async fn local_user(&self) -> Result<Option<LocalUser>, Error>;
    /// Record `user` as the local user, unless one has already been recorded; either way, return
    /// the local user.
    async fn setup_local_user(&self, user: &LocalUser) -> Result<LocalUser, Error>;
    /// Retrieve the active (i.e. non-removed) relationship for `actor` in direction `direction`
    async fn lookup(
        &self,
        direction: Direction,
        actor: &Url,
    ) -> Result<Option<FollowRelationship>, Error>;
    /// Write `rel` (which must be [FollowState::Pending]) unless there's already an active
    /// relationship for its key, in which case return that instead. A tombstone for the key
    /// doesn't prevent the write; it's simply retained. Implementations that can't make the
    /// write & the fetch atomic may return [Inserted::Raced] when the existing relationship went
    /// away in between.
    async fn insert_or_fetch(&self, rel: &FollowRelationship) -> Result<Inserted, Error>;
    /// Move the relationship `id` for `actor` in direction `direction` from `from` to `to`; return
    /// false, changing nothing, if it's not currently in state `from` (or doesn't exist).
    async fn transition(
        &self,
        direction: Direction,
        actor: &Url,
        id: &RelationshipId,
        from: FollowState,
        to: FollowState,
    ) -> Result<bool, Error>;
    /// All active relationships in direction `direction`, oldest first
    async fn enumerate_active(&self, direction: Direction)
        -> Result<Vec<FollowRelationship>, Error>;
    /// Every relationship, tombstones included, ever recorded for `actor` in direction `direction`,
    /// oldest first
    async fn history(
        &self,
        direction: Direction,
        actor: &Url,
    ) -> Result<Vec<FollowRelationship>, Error>;
}
