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

//! # Inbox activity normalization
//!
//! Everything that arrives at the local user's inbox passes through [normalize] before it can touch
//! the follow graph. The result is one of the three [InboxActivity] variants, each carrying the
//! remote actor & the local actor it targeted, or an [Error]. Normalization is pure: nothing is
//! read from, or written to, storage.

use serde::Deserialize;
use serde_json::Value;
use snafu::{prelude::*, Backtrace};
use tracing::debug;
use url::Url;

use crate::{
    ap_entities::{
        username_and_relationship_from_url, ActorField, EmbeddedObject, FollowAcceptOrUndo,
        ObjectField,
    },
    entities::{LocalUser, RemoteActor},
    origin::Origin,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to deserialize the activity: {source}"))]
    Activity {
        source: serde_json::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("The embedded Follow's object was {object}, but the Accept came from {actor}"))]
    AcceptMismatch {
        actor: Url,
        object: Url,
        backtrace: Backtrace,
    },
    #[snafu(display("The activity names {outer} as its actor, but embeds a Follow by {inner}"))]
    InconsistentActor {
        outer: Url,
        inner: Url,
        backtrace: Backtrace,
    },
    #[snafu(display("The request body was not valid JSON: {source}"))]
    Json {
        source: serde_json::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Activities must be JSON objects"))]
    NotAnObject { backtrace: Backtrace },
    #[snafu(display("{actor} attempted to follow itself"))]
    SelfFollow { actor: Url, backtrace: Backtrace },
    #[snafu(display("An Undo must embed the Follow it retracts; got {object}"))]
    UndoByReference { object: Url, backtrace: Backtrace },
    #[snafu(display("This activity targets {target}, which is not the local user"))]
    WrongRecipient { target: Url, backtrace: Backtrace },
}

impl Error {
    /// True if this activity was well-formed, but simply not addressed to us
    pub fn is_wrong_recipient(&self) -> bool {
        matches!(self, Error::WrongRecipient { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         InboxActivity                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An inbound activity that solofed knows how to act on
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InboxActivity {
    /// `actor` would like to follow `object` (the local user)
    FollowRequest {
        actor: RemoteActor,
        object: Url,
        follow_id: Url,
    },
    /// `actor` no longer follows `object` (the local user)
    UnfollowRequest {
        actor: RemoteActor,
        object: Url,
        follow_id: Url,
    },
    /// `actor` accepted the Follow named by `follow_id`, sent by `object` (the local user)
    FollowAccepted {
        actor: RemoteActor,
        object: Url,
        follow_id: Url,
    },
}

impl InboxActivity {
    pub fn actor(&self) -> &RemoteActor {
        match self {
            InboxActivity::FollowRequest { actor, .. }
            | InboxActivity::UnfollowRequest { actor, .. }
            | InboxActivity::FollowAccepted { actor, .. } => actor,
        }
    }
    pub fn follow_id(&self) -> &Url {
        match self {
            InboxActivity::FollowRequest { follow_id, .. }
            | InboxActivity::UnfollowRequest { follow_id, .. }
            | InboxActivity::FollowAccepted { follow_id, .. } => follow_id,
        }
    }
    /// A short name for this kind of activity, suitable for logging
    pub fn kind(&self) -> &'static str {
        match self {
            InboxActivity::FollowRequest { .. } => "follow",
            InboxActivity::UnfollowRequest { .. } => "undo",
            InboxActivity::FollowAccepted { .. } => "accept",
        }
    }
}

/// Build a [RemoteActor] out of whatever the sender told us about itself
fn remote_actor(field: &ActorField) -> RemoteActor {
    match field.inline() {
        Some(actor) => RemoteActor::new(actor.id().clone())
            .with_inbox(Some(actor.inbox().clone()))
            .with_shared_inbox(actor.shared_inbox().cloned())
            .with_display_name(actor.display_name().map(str::to_owned)),
        None => RemoteActor::new(field.id().clone()),
    }
}

/// True if `url` names a Follow sent by `local`
fn is_local_follow(url: &Url, local: &LocalUser) -> bool {
    let same_origin = matches!(
        Origin::try_from(url.clone()).map(|origin| &origin == local.origin()),
        Ok(true)
    );
    same_origin
        && matches!(
            username_and_relationship_from_url(url),
            Ok((username, _)) if &username == local.username()
        )
}

/// Validate & classify an inbound activity on behalf of `local`
pub fn normalize(payload: &Value, local: &LocalUser) -> Result<InboxActivity> {
    ensure!(payload.is_object(), NotAnObjectSnafu);
    let activity = FollowAcceptOrUndo::deserialize(payload).context(ActivitySnafu)?;
    debug!("Normalizing {:?}", activity);
    let me = local.actor_id();
    match activity {
        FollowAcceptOrUndo::Follow(follow) => {
            ensure!(
                follow.object() == me,
                WrongRecipientSnafu {
                    target: follow.object().clone()
                }
            );
            ensure!(
                follow.actor_id() != me,
                SelfFollowSnafu {
                    actor: follow.actor_id().clone()
                }
            );
            Ok(InboxActivity::FollowRequest {
                actor: remote_actor(follow.actor()),
                object: follow.object().clone(),
                follow_id: follow.id().clone(),
            })
        }
        FollowAcceptOrUndo::Undo(undo) => {
            let follow = match undo.object() {
                ObjectField::Inline(EmbeddedObject::Follow(follow)) => follow,
                ObjectField::Iri(url) => {
                    return UndoByReferenceSnafu {
                        object: url.clone(),
                    }
                    .fail()
                }
            };
            ensure!(
                follow.actor_id() == undo.actor().id(),
                InconsistentActorSnafu {
                    outer: undo.actor().id().clone(),
                    inner: follow.actor_id().clone(),
                }
            );
            ensure!(
                follow.object() == me,
                WrongRecipientSnafu {
                    target: follow.object().clone()
                }
            );
            Ok(InboxActivity::UnfollowRequest {
                actor: remote_actor(undo.actor()),
                object: follow.object().clone(),
                follow_id: follow.id().clone(),
            })
        }
        FollowAcceptOrUndo::Accept(accept) => {
            let follow_id = match accept.object() {
                ObjectField::Inline(EmbeddedObject::Follow(follow)) => {
                    ensure!(
                        follow.actor_id() == me,
                        WrongRecipientSnafu {
                            target: follow.actor_id().clone()
                        }
                    );
                    ensure!(
                        follow.object() == accept.actor().id(),
                        AcceptMismatchSnafu {
                            actor: accept.actor().id().clone(),
                            object: follow.object().clone(),
                        }
                    );
                    follow.id().clone()
                }
                ObjectField::Iri(url) => {
                    ensure!(
                        is_local_follow(url, local),
                        WrongRecipientSnafu {
                            target: url.clone()
                        }
                    );
                    url.clone()
                }
            };
            Ok(InboxActivity::FollowAccepted {
                actor: remote_actor(accept.actor()),
                object: me.clone(),
                follow_id,
            })
        }
    }
}

/// Validate & classify a raw request body on behalf of `local`
pub fn normalize_bytes(body: &[u8], local: &LocalUser) -> Result<InboxActivity> {
    let payload = serde_json::from_slice::<Value>(body).context(JsonSnafu)?;
    normalize(&payload, local)
}
