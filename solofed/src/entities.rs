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

//! # solofed models
//!
//! ## Introduction
//!
//! The foundational types: the (single) local user, the remote actors with which it has
//! relationships, and the follow relationships themselves.
//!
//! A [FollowRelationship] is a directed edge between the local user & a [RemoteActor]. Edges are
//! never deleted; when a follow is undone the edge moves to [FollowState::Removed] and stays put as
//! a tombstone. At most one edge per ([Direction], actor) pair may be in a non-removed state at any
//! time; the storage layer is responsible for enforcing that.

use std::{fmt::Display, ops::Deref, str::FromStr};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{prelude::*, Backtrace};
use url::Url;
use uuid::Uuid;

use crate::{ap_entities::make_user_id, origin::Origin};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{text} is not a valid direction"))]
    BadDirection { text: String, backtrace: Backtrace },
    #[snafu(display("{text} is not a valid follow state"))]
    BadFollowState { text: String, backtrace: Backtrace },
    #[snafu(display("{name} is not a valid solofed username"))]
    BadUsername { name: String, backtrace: Backtrace },
    #[snafu(display("Failed to form the actor ID for {username}: {source}"))]
    ActorId {
        username: Username,
        #[snafu(source(from(crate::ap_entities::Error, Box::new)))]
        source: Box<crate::ap_entities::Error>,
    },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Identifiers                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Declare a newtype wrapping [Uuid] for use as an opaque identifier for some sort of entity.
///
/// Relationships & users are both identified by UUIDs, but I don't want to be able to hand one
/// where the other is expected.
macro_rules! define_id {
    ($type_name:ident) => {
        #[derive(
            Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
        )]
        #[serde(transparent)]
        pub struct $type_name(Uuid);
        impl $type_name {
            pub fn new() -> $type_name {
                $type_name(Uuid::new_v4())
            }
            pub fn from_raw_string(s: &str) -> StdResult<$type_name, uuid::Error> {
                Ok($type_name(Uuid::parse_str(s)?))
            }
        }
        impl Default for $type_name {
            fn default() -> Self {
                Self::new()
            }
        }
        impl Deref for $type_name {
            type Target = Uuid;
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
        impl Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.as_hyphenated())
            }
        }
    };
}

define_id!(UserId);
define_id!(RelationshipId);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Username                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

// solofed usernames must be ASCII, may be from two to sixty-four chacacters in length, and must
// match the regex "^[a-zA-Z][-_.a-zA-Z0-9]+$".
const MIN_USERNAME_LENGTH: usize = 2;
const MAX_USERNAME_LENGTH: usize = 64;

lazy_static! {
    static ref USERNAME: Regex = Regex::new("^[a-zA-Z][-_.a-zA-Z0-9]+$").unwrap(/* known good */);
}

fn check_username(s: &str) -> bool {
    s.is_ascii()
        && s.len() >= MIN_USERNAME_LENGTH
        && s.len() <= MAX_USERNAME_LENGTH
        && USERNAME.is_match(s)
}

/// A refined type representing a solofed username
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    pub fn new(name: &str) -> Result<Username> {
        ensure!(
            check_username(name),
            BadUsernameSnafu {
                name: name.to_owned()
            }
        );
        Ok(Username(name.to_owned()))
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for Username {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Username {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Username::new(&s).map_err(|err| <D::Error as serde::de::Error>::custom(format!("{}", err)))
    }
}

impl Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Username {
    type Err = Error;

    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        Username::new(s)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           LocalUser                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The one & only account on this instance
///
/// This is created once, at setup time, and thereafter resolved at startup & handed explicitly to
/// anything that needs it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LocalUser {
    id: UserId,
    username: Username,
    display_name: String,
    created: DateTime<Utc>,
    origin: Origin,
    actor_id: Url,
}

impl LocalUser {
    pub fn new(
        username: Username,
        display_name: &str,
        origin: Origin,
        created: DateTime<Utc>,
    ) -> Result<LocalUser> {
        let actor_id = make_user_id(&username, &origin).context(ActorIdSnafu {
            username: username.clone(),
        })?;
        Ok(LocalUser {
            id: UserId::new(),
            username,
            display_name: display_name.to_owned(),
            created,
            origin,
            actor_id,
        })
    }
    /// The ActivityPub actor ID for this user
    pub fn actor_id(&self) -> &Url {
        &self.actor_id
    }
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
    pub fn id(&self) -> UserId {
        self.id
    }
    pub fn origin(&self) -> &Origin {
        &self.origin
    }
    pub fn username(&self) -> &Username {
        &self.username
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          RemoteActor                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A party on some other server, identified by its actor URI
///
/// We don't own these; the inbox & name are whatever we happened to learn when we last saw the
/// actor, and may well be stale (or missing altogether).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RemoteActor {
    id: Url,
    inbox: Option<Url>,
    shared_inbox: Option<Url>,
    display_name: Option<String>,
}

impl RemoteActor {
    pub fn new(id: Url) -> RemoteActor {
        RemoteActor {
            id,
            inbox: None,
            shared_inbox: None,
            display_name: None,
        }
    }
    pub fn with_inbox(mut self, inbox: Option<Url>) -> RemoteActor {
        self.inbox = inbox;
        self
    }
    pub fn with_shared_inbox(mut self, shared_inbox: Option<Url>) -> RemoteActor {
        self.shared_inbox = shared_inbox;
        self
    }
    pub fn with_display_name(mut self, display_name: Option<String>) -> RemoteActor {
        self.display_name = display_name;
        self
    }
    pub fn id(&self) -> &Url {
        &self.id
    }
    pub fn inbox(&self) -> Option<&Url> {
        self.inbox.as_ref()
    }
    pub fn shared_inbox(&self) -> Option<&Url> {
        self.shared_inbox.as_ref()
    }
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       FollowRelationship                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Which way a [FollowRelationship] points
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The remote actor follows the local user
    Incoming,
    /// The local user follows the remote actor
    Outgoing,
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Direction::Incoming => "incoming",
                Direction::Outgoing => "outgoing",
            }
        )
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        match s {
            "incoming" => Ok(Direction::Incoming),
            "outgoing" => Ok(Direction::Outgoing),
            _ => BadDirectionSnafu { text: s.to_owned() }.fail(),
        }
    }
}

/// Where a [FollowRelationship] is in its lifecycle
///
/// The only legal transitions are `Pending -> Accepted`, `Pending -> Removed` and
/// `Accepted -> Removed`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowState {
    Pending,
    Accepted,
    Removed,
}

impl FollowState {
    /// True for any state other than [FollowState::Removed]
    pub fn is_active(&self) -> bool {
        !matches!(self, FollowState::Removed)
    }
    pub fn can_become(&self, to: FollowState) -> bool {
        matches!(
            (self, to),
            (FollowState::Pending, FollowState::Accepted)
                | (FollowState::Pending, FollowState::Removed)
                | (FollowState::Accepted, FollowState::Removed)
        )
    }
}

impl Display for FollowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                FollowState::Pending => "pending",
                FollowState::Accepted => "accepted",
                FollowState::Removed => "removed",
            }
        )
    }
}

impl FromStr for FollowState {
    type Err = Error;

    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        match s {
            "pending" => Ok(FollowState::Pending),
            "accepted" => Ok(FollowState::Accepted),
            "removed" => Ok(FollowState::Removed),
            _ => BadFollowStateSnafu { text: s.to_owned() }.fail(),
        }
    }
}

/// The key under which relationships are stored: at most one active relationship per key
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct FollowKey {
    pub direction: Direction,
    pub actor: Url,
}

impl FollowKey {
    pub fn new(direction: Direction, actor: &Url) -> FollowKey {
        FollowKey {
            direction,
            actor: actor.clone(),
        }
    }
}

impl Display for FollowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.direction, self.actor)
    }
}

/// A directed edge between the local user & a [RemoteActor]
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FollowRelationship {
    id: RelationshipId,
    direction: Direction,
    actor: RemoteActor,
    state: FollowState,
    /// The `id` of the Follow activity that created this edge
    follow_id: Url,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

impl FollowRelationship {
    /// Create a new relationship in the [FollowState::Pending] state
    pub fn new(
        id: RelationshipId,
        direction: Direction,
        actor: RemoteActor,
        follow_id: Url,
        created: DateTime<Utc>,
    ) -> FollowRelationship {
        FollowRelationship {
            id,
            direction,
            actor,
            state: FollowState::Pending,
            follow_id,
            created,
            updated: created,
        }
    }
    pub fn actor(&self) -> &RemoteActor {
        &self.actor
    }
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
    pub fn direction(&self) -> Direction {
        self.direction
    }
    pub fn follow_id(&self) -> &Url {
        &self.follow_id
    }
    pub fn id(&self) -> RelationshipId {
        self.id
    }
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
    pub fn key(&self) -> FollowKey {
        FollowKey::new(self.direction, self.actor.id())
    }
    pub fn state(&self) -> FollowState {
        self.state
    }
    pub fn updated(&self) -> DateTime<Utc> {
        self.updated
    }
    /// Move this relationship to state `to` as of `at`; storage implementations are expected to
    /// have already checked the prior state.
    pub fn set_state(&mut self, to: FollowState, at: DateTime<Utc>) {
        self.state = to;
        self.updated = at;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn usernames() {
        assert!(Username::new("alice").is_ok());
        assert!(Username::new("al.ice_2").is_ok());
        assert!(Username::new("a").is_err());
        assert!(Username::new("2alice").is_err());
        assert!(Username::new("al ice").is_err());
        assert!(Username::new("ålice").is_err());
    }

    #[test]
    fn state_transitions() {
        assert!(FollowState::Pending.can_become(FollowState::Accepted));
        assert!(FollowState::Pending.can_become(FollowState::Removed));
        assert!(FollowState::Accepted.can_become(FollowState::Removed));
        assert!(!FollowState::Accepted.can_become(FollowState::Pending));
        assert!(!FollowState::Removed.can_become(FollowState::Accepted));
        assert!(!FollowState::Removed.can_become(FollowState::Pending));
        assert!(!FollowState::Removed.is_active());
    }

    #[test]
    fn local_user_actor_id() {
        let user = LocalUser::new(
            Username::new("sp1ff").unwrap(),
            "Michael",
            "https://social.example".parse::<Origin>().unwrap(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(
            user.actor_id().as_str(),
            "https://social.example/users/sp1ff"
        );
    }

    #[test]
    fn direction_and_state_text() {
        assert_eq!("incoming".parse::<Direction>().unwrap(), Direction::Incoming);
        assert_eq!(Direction::Outgoing.to_string(), "outgoing");
        assert_eq!("removed".parse::<FollowState>().unwrap(), FollowState::Removed);
        assert!("gone".parse::<FollowState>().is_err());
        assert_eq!(
            serde_json::to_string(&FollowState::Accepted).unwrap(),
            "\"accepted\""
        );
    }
}
