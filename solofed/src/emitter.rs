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

//! # Outbound activities
//!
//! Construct the activities the follow graph sends in reply to (or as a result of) changes: an
//! Accept for an incoming Follow, and a Follow or Undo for the local user's own follows.
//!
//! Nothing here sends anything. Each function returns an [Outbound] which the caller hands to
//! delivery. Everything is derived from the relationship & the local user, so building the same
//! reply twice produces byte-identical output.

use snafu::{prelude::*, Backtrace};
use url::Url;

use crate::{
    ap_entities::{Accept, Follow, Jld, Undo},
    entities::{Direction, FollowRelationship, FollowState, LocalUser, RelationshipId},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Relationship {id} is {direction}"))]
    WrongDirection {
        id: RelationshipId,
        direction: Direction,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to build an ActivityPub entity: {source}"))]
    Entity {
        #[snafu(source(from(crate::ap_entities::Error, Box::new)))]
        source: Box<crate::ap_entities::Error>,
    },
    #[snafu(display("Relationship {id} is {state}"))]
    WrongState {
        id: RelationshipId,
        state: FollowState,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// An activity ready for delivery to a remote actor
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Outbound {
    actor: Url,
    inbox: Option<Url>,
    activity: Jld,
}

impl Outbound {
    /// The actor to whom this activity is addressed
    pub fn actor(&self) -> &Url {
        &self.actor
    }
    pub fn activity(&self) -> &Jld {
        &self.activity
    }
    /// Where to deliver this activity, if we know; if not, delivery will need to resolve the actor
    pub fn inbox(&self) -> Option<&Url> {
        self.inbox.as_ref()
    }
}

fn outbound(rel: &FollowRelationship, activity: Jld) -> Outbound {
    Outbound {
        actor: rel.actor().id().clone(),
        inbox: rel
            .actor()
            .inbox()
            .or(rel.actor().shared_inbox())
            .cloned(),
        activity,
    }
}

fn check(rel: &FollowRelationship, direction: Direction, ok: fn(FollowState) -> bool) -> Result<()> {
    ensure!(
        rel.direction() == direction,
        WrongDirectionSnafu {
            id: rel.id(),
            direction: rel.direction(),
        }
    );
    ensure!(
        ok(rel.state()),
        WrongStateSnafu {
            id: rel.id(),
            state: rel.state(),
        }
    );
    Ok(())
}

/// Build the Accept for an accepted, incoming relationship
pub fn accept_for(user: &LocalUser, rel: &FollowRelationship) -> Result<Outbound> {
    accept_of(user, rel, rel.follow_id())
}

/// Build the Accept of the Follow named by `follow_id` on behalf of an accepted, incoming
/// relationship
///
/// A follower that re-sends its Follow under a new ID expects to see that ID accepted, even though
/// the relationship itself still carries the ID it was created with.
pub fn accept_of(user: &LocalUser, rel: &FollowRelationship, follow_id: &Url) -> Result<Outbound> {
    check(rel, Direction::Incoming, |state| state == FollowState::Accepted)?;
    let follow = Follow::new(
        user.actor_id().clone(),
        follow_id.clone(),
        rel.actor().id().clone(),
    );
    let accept = Accept::for_follow(user.actor_id(), follow).context(EntitySnafu)?;
    Ok(outbound(rel, Jld::new(&accept, None).context(EntitySnafu)?))
}

/// Build the Follow for an active, outgoing relationship
pub fn follow_for(user: &LocalUser, rel: &FollowRelationship) -> Result<Outbound> {
    check(rel, Direction::Outgoing, |state| state.is_active())?;
    let follow = Follow::new(
        rel.actor().id().clone(),
        rel.follow_id().clone(),
        user.actor_id().clone(),
    );
    Ok(outbound(rel, Jld::new(&follow, None).context(EntitySnafu)?))
}

/// Build the Undo for a removed, outgoing relationship
pub fn undo_for(user: &LocalUser, rel: &FollowRelationship) -> Result<Outbound> {
    check(rel, Direction::Outgoing, |state| state == FollowState::Removed)?;
    let follow = Follow::new(
        rel.actor().id().clone(),
        rel.follow_id().clone(),
        user.actor_id().clone(),
    );
    let undo = Undo::for_follow(follow).context(EntitySnafu)?;
    Ok(outbound(rel, Jld::new(&undo, None).context(EntitySnafu)?))
}
