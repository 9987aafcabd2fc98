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

//! # Follow reconciliation
//!
//! ## Introduction
//!
//! This is where inbound activities meet the follow graph. [FollowManager] takes a normalized
//! [InboxActivity] (or a local user action), consults storage, decides what to do, does it, and
//! reports what happened along with any activities that now need to be delivered.
//!
//! ## Deciding vs. doing
//!
//! The decisions are made by three pure functions, [plan_follow], [plan_unfollow] & [plan_accept],
//! each of which looks only at the current relationship (if any) for the key in question. The
//! auto-accept policy lives in [plan_follow]; if solofed ever grows manual approval of followers,
//! that's the place to change.
//!
//! ## Idempotence
//!
//! Remote servers retry, and re-deliver, freely. Every write is therefore a compare-and-set against
//! the state we expect to find: a relationship is only accepted if it's still pending, and only
//! removed if it's still in the state in which we last saw it. When a compare-and-set loses, we
//! re-read & re-decide rather than overwrite. A duplicate Follow never creates a second edge, an
//! Undo for a non-follower changes nothing, and a stray Accept is logged & dropped.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{prelude::*, Backtrace, IntoError};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    ap_entities::make_follow_id,
    emitter::{self, accept_of, follow_for, undo_for, Outbound},
    entities::{
        Direction, FollowKey, FollowRelationship, FollowState, LocalUser, RelationshipId,
        RemoteActor,
    },
    inbox::{self, normalize, InboxActivity},
    storage::{self, Backend, Inserted},
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Gave up after {attempts} attempts to update {key}"))]
    Contention {
        key: FollowKey,
        attempts: usize,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to build an outbound activity: {source}"))]
    Emit { source: emitter::Error },
    #[snafu(display("Failed to form a follow ID: {source}"))]
    FollowId {
        #[snafu(source(from(crate::ap_entities::Error, Box::new)))]
        source: Box<crate::ap_entities::Error>,
    },
    #[snafu(display("Malformed activity: {source}"))]
    MalformedActivity { source: inbox::Error },
    #[snafu(display("The local user can't follow itself"))]
    SelfFollow { backtrace: Backtrace },
    #[snafu(display("Storage is unavailable: {source}"))]
    StoreUnavailable {
        source: storage::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Activity not addressed to the local user: {source}"))]
    WrongRecipient { source: inbox::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<inbox::Error> for Error {
    fn from(err: inbox::Error) -> Self {
        if err.is_wrong_recipient() {
            WrongRecipientSnafu.into_error(err)
        } else {
            MalformedActivitySnafu.into_error(err)
        }
    }
}

/// The number of times we'll re-read & retry a write that loses a compare-and-set
const MAX_CAS_ATTEMPTS: usize = 4;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Outcomes                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// What applying an activity did to the follow graph
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    /// A new relationship was recorded
    Created,
    /// A pending relationship was accepted
    Accepted,
    /// An active relationship was removed
    Removed,
    /// The activity had already been applied, or asked for something already true
    DuplicateNoOp,
    /// An Accept that matched no pending follow of ours
    LateOrUnknownReply,
    /// A concurrent operation on the same relationship got there first
    Superseded,
}

/// The result of applying an activity: what happened, and what (if anything) needs to be sent
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Outcome {
    pub disposition: Disposition,
    pub outbound: Vec<Outbound>,
}

impl Outcome {
    fn new(disposition: Disposition) -> Outcome {
        Outcome {
            disposition,
            outbound: Vec::new(),
        }
    }
    fn with(disposition: Disposition, outbound: Outbound) -> Outcome {
        Outcome {
            disposition,
            outbound: vec![outbound],
        }
    }
}

/// The local user's relationship with a given remote actor, in both directions
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Relationship {
    /// The state of the local user's follow of the remote actor, if any
    pub following: Option<FollowState>,
    /// The state of the remote actor's follow of the local user, if any
    pub followed_by: Option<FollowState>,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Planning                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// What to do about an incoming Follow
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FollowPlan {
    /// No active relationship; record a new one
    Create,
    /// We've seen this before, but never accepted it; accept it now
    AcceptPending(FollowRelationship),
    /// Already accepted; just say so again
    Reaccept(FollowRelationship),
}

/// Decide what to do about a Follow, given the current incoming relationship with its sender
///
/// solofed accepts all followers.
pub fn plan_follow(current: Option<&FollowRelationship>) -> FollowPlan {
    match current.map(|rel| (rel, rel.state())) {
        None | Some((_, FollowState::Removed)) => FollowPlan::Create,
        Some((rel, FollowState::Pending)) => FollowPlan::AcceptPending(rel.clone()),
        Some((rel, FollowState::Accepted)) => FollowPlan::Reaccept(rel.clone()),
    }
}

/// What to do about an unfollow, incoming or outgoing
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UnfollowPlan {
    /// Move relationship `id` from `from` to removed
    Remove {
        id: RelationshipId,
        from: FollowState,
    },
    /// There's nothing to remove
    Ignore,
}

pub fn plan_unfollow(current: Option<&FollowRelationship>) -> UnfollowPlan {
    match current {
        Some(rel) if rel.is_active() => UnfollowPlan::Remove {
            id: rel.id(),
            from: rel.state(),
        },
        _ => UnfollowPlan::Ignore,
    }
}

/// What to do about an Accept of one of the local user's follows
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AcceptPlan {
    /// Move relationship `id` from pending to accepted
    Accept { id: RelationshipId },
    /// Already accepted
    Duplicate,
    /// No follow of ours matches
    Unexpected,
}

/// Decide what to do about an Accept of the Follow named by `follow_id`, given the current outgoing
/// relationship with its sender
pub fn plan_accept(current: Option<&FollowRelationship>, follow_id: &Url) -> AcceptPlan {
    match current {
        Some(rel) if rel.follow_id() == follow_id => match rel.state() {
            FollowState::Pending => AcceptPlan::Accept { id: rel.id() },
            FollowState::Accepted => AcceptPlan::Duplicate,
            FollowState::Removed => AcceptPlan::Unexpected,
        },
        _ => AcceptPlan::Unexpected,
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         FollowManager                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Apply follow-related activities to the follow graph
#[derive(Clone)]
pub struct FollowManager {
    storage: Arc<dyn Backend + Send + Sync>,
}

impl FollowManager {
    pub fn new(storage: Arc<dyn Backend + Send + Sync>) -> FollowManager {
        FollowManager { storage }
    }

    /// Normalize `payload` on behalf of `user`, then apply it
    pub async fn handle(&self, user: &LocalUser, payload: &Value) -> Result<Outcome> {
        let activity = normalize(payload, user)?;
        self.apply(user, activity).await
    }

    /// Apply a normalized activity on behalf of `user`
    pub async fn apply(&self, user: &LocalUser, activity: InboxActivity) -> Result<Outcome> {
        debug!("Applying a {} from {}", activity.kind(), activity.actor().id());
        match activity {
            InboxActivity::FollowRequest {
                actor, follow_id, ..
            } => self.on_follow(user, actor, follow_id).await,
            InboxActivity::UnfollowRequest {
                actor, follow_id, ..
            } => self.on_unfollow(actor, follow_id).await,
            InboxActivity::FollowAccepted {
                actor, follow_id, ..
            } => self.on_accept(actor, follow_id).await,
        }
    }

    async fn on_follow(
        &self,
        user: &LocalUser,
        actor: RemoteActor,
        follow_id: Url,
    ) -> Result<Outcome> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .storage
                .lookup(Direction::Incoming, actor.id())
                .await
                .context(StoreUnavailableSnafu)?;
            match plan_follow(current.as_ref()) {
                FollowPlan::Create => {
                    let rel = FollowRelationship::new(
                        RelationshipId::new(),
                        Direction::Incoming,
                        actor.clone(),
                        follow_id.clone(),
                        Utc::now(),
                    );
                    match self
                        .storage
                        .insert_or_fetch(&rel)
                        .await
                        .context(StoreUnavailableSnafu)?
                    {
                        Inserted::Created(rel) => {
                            info!("{} would like to follow {}", rel.actor().id(), user.username());
                            return self
                                .accept_pending(user, rel, &follow_id, Disposition::Created)
                                .await;
                        }
                        // A concurrent Follow from the same actor beat us to it
                        Inserted::Existing(rel) => {
                            return self.duplicate_follow(user, rel, &follow_id).await
                        }
                        Inserted::Raced => {
                            debug!("Lost a race recording a Follow from {}; re-reading", actor.id())
                        }
                    }
                }
                FollowPlan::AcceptPending(rel) | FollowPlan::Reaccept(rel) => {
                    return self.duplicate_follow(user, rel, &follow_id).await
                }
            }
        }
        ContentionSnafu {
            key: FollowKey::new(Direction::Incoming, actor.id()),
            attempts: MAX_CAS_ATTEMPTS,
        }
        .fail()
    }

    /// Answer a Follow (named by `follow_id`) from an actor with whom we already have a relationship
    ///
    /// The stored relationship is left as it is, but any Accept names the Follow we were just sent.
    async fn duplicate_follow(
        &self,
        user: &LocalUser,
        rel: FollowRelationship,
        follow_id: &Url,
    ) -> Result<Outcome> {
        debug!("Duplicate Follow {} from {}", follow_id, rel.actor().id());
        match rel.state() {
            FollowState::Pending => {
                self.accept_pending(user, rel, follow_id, Disposition::DuplicateNoOp)
                    .await
            }
            FollowState::Accepted => Ok(Outcome::with(
                Disposition::DuplicateNoOp,
                accept_of(user, &rel, follow_id).context(EmitSnafu)?,
            )),
            FollowState::Removed => Ok(Outcome::new(Disposition::Superseded)),
        }
    }

    /// Accept `rel` (currently pending) & build the reply to the Follow named by `follow_id`
    async fn accept_pending(
        &self,
        user: &LocalUser,
        mut rel: FollowRelationship,
        follow_id: &Url,
        disposition: Disposition,
    ) -> Result<Outcome> {
        if self
            .storage
            .transition(
                Direction::Incoming,
                rel.actor().id(),
                &rel.id(),
                FollowState::Pending,
                FollowState::Accepted,
            )
            .await
            .context(StoreUnavailableSnafu)?
        {
            rel.set_state(FollowState::Accepted, Utc::now());
            info!("{} now follows {}", rel.actor().id(), user.username());
            return Ok(Outcome::with(
                disposition,
                accept_of(user, &rel, follow_id).context(EmitSnafu)?,
            ));
        }
        // Somebody else moved it. If they accepted it, there's no harm in saying so again; if they
        // removed it, we say nothing.
        match self
            .storage
            .lookup(Direction::Incoming, rel.actor().id())
            .await
            .context(StoreUnavailableSnafu)?
        {
            Some(current) if current.id() == rel.id() && current.state() == FollowState::Accepted => {
                Ok(Outcome::with(
                    disposition,
                    accept_of(user, &current, follow_id).context(EmitSnafu)?,
                ))
            }
            _ => {
                info!(
                    "Follow {} from {} was withdrawn before it could be accepted",
                    follow_id,
                    rel.actor().id()
                );
                Ok(Outcome::new(Disposition::Superseded))
            }
        }
    }

    /// Remove the active relationship (if any) for `actor` in direction `direction`, returning the
    /// relationship as removed
    async fn remove(
        &self,
        direction: Direction,
        actor: &Url,
    ) -> Result<Option<FollowRelationship>> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .storage
                .lookup(direction, actor)
                .await
                .context(StoreUnavailableSnafu)?;
            match (plan_unfollow(current.as_ref()), current) {
                (UnfollowPlan::Remove { id, from }, Some(mut rel)) => {
                    if self
                        .storage
                        .transition(direction, actor, &id, from, FollowState::Removed)
                        .await
                        .context(StoreUnavailableSnafu)?
                    {
                        rel.set_state(FollowState::Removed, Utc::now());
                        return Ok(Some(rel));
                    }
                    debug!("Lost a race removing {}; re-reading", id);
                }
                _ => return Ok(None),
            }
        }
        ContentionSnafu {
            key: FollowKey::new(direction, actor),
            attempts: MAX_CAS_ATTEMPTS,
        }
        .fail()
    }

    async fn on_unfollow(&self, actor: RemoteActor, follow_id: Url) -> Result<Outcome> {
        match self.remove(Direction::Incoming, actor.id()).await? {
            Some(rel) => {
                if rel.follow_id() != &follow_id {
                    debug!(
                        "{} undid {}, but the relationship was created by {}",
                        actor.id(),
                        follow_id,
                        rel.follow_id()
                    );
                }
                info!("{} no longer follows us", actor.id());
                Ok(Outcome::new(Disposition::Removed))
            }
            None => {
                debug!("Undo from {}, who doesn't follow us", actor.id());
                Ok(Outcome::new(Disposition::DuplicateNoOp))
            }
        }
    }

    async fn on_accept(&self, actor: RemoteActor, follow_id: Url) -> Result<Outcome> {
        let current = self
            .storage
            .lookup(Direction::Outgoing, actor.id())
            .await
            .context(StoreUnavailableSnafu)?;
        match plan_accept(current.as_ref(), &follow_id) {
            AcceptPlan::Accept { id } => {
                if self
                    .storage
                    .transition(
                        Direction::Outgoing,
                        actor.id(),
                        &id,
                        FollowState::Pending,
                        FollowState::Accepted,
                    )
                    .await
                    .context(StoreUnavailableSnafu)?
                {
                    info!("{} accepted our follow", actor.id());
                    Ok(Outcome::new(Disposition::Accepted))
                } else {
                    // Either a duplicate Accept got there first, or we unfollowed in the meantime
                    let now = self
                        .storage
                        .lookup(Direction::Outgoing, actor.id())
                        .await
                        .context(StoreUnavailableSnafu)?;
                    match plan_accept(now.as_ref(), &follow_id) {
                        AcceptPlan::Duplicate => Ok(Outcome::new(Disposition::DuplicateNoOp)),
                        _ => {
                            warn!("Late Accept of {} from {}", follow_id, actor.id());
                            Ok(Outcome::new(Disposition::LateOrUnknownReply))
                        }
                    }
                }
            }
            AcceptPlan::Duplicate => Ok(Outcome::new(Disposition::DuplicateNoOp)),
            AcceptPlan::Unexpected => {
                warn!(
                    "Accept of {} from {} matches no pending follow; ignoring",
                    follow_id,
                    actor.id()
                );
                Ok(Outcome::new(Disposition::LateOrUnknownReply))
            }
        }
    }

    /// The local user would like to follow `actor`
    pub async fn follow(&self, user: &LocalUser, actor: RemoteActor) -> Result<Outcome> {
        ensure!(actor.id() != user.actor_id(), SelfFollowSnafu);
        let id = RelationshipId::new();
        let follow_id = make_follow_id(user.username(), &id, user.origin()).context(FollowIdSnafu)?;
        let rel = FollowRelationship::new(id, Direction::Outgoing, actor, follow_id, Utc::now());
        for _ in 0..MAX_CAS_ATTEMPTS {
            match self
                .storage
                .insert_or_fetch(&rel)
                .await
                .context(StoreUnavailableSnafu)?
            {
                Inserted::Created(rel) => {
                    info!("{} is following {}", user.username(), rel.actor().id());
                    return Ok(Outcome::with(
                        Disposition::Created,
                        follow_for(user, &rel).context(EmitSnafu)?,
                    ));
                }
                // Still waiting to hear back; ask again, with the same Follow
                Inserted::Existing(rel) if rel.state() == FollowState::Pending => {
                    return Ok(Outcome::with(
                        Disposition::DuplicateNoOp,
                        follow_for(user, &rel).context(EmitSnafu)?,
                    ))
                }
                Inserted::Existing(_) => return Ok(Outcome::new(Disposition::DuplicateNoOp)),
                Inserted::Raced => {
                    debug!("Lost a race following {}; retrying", rel.actor().id())
                }
            }
        }
        ContentionSnafu {
            key: rel.key(),
            attempts: MAX_CAS_ATTEMPTS,
        }
        .fail()
    }

    /// The local user would like to stop following `actor`
    pub async fn unfollow(&self, user: &LocalUser, actor: &Url) -> Result<Outcome> {
        match self.remove(Direction::Outgoing, actor).await? {
            Some(rel) => {
                info!("{} is no longer following {}", user.username(), actor);
                Ok(Outcome::with(
                    Disposition::Removed,
                    undo_for(user, &rel).context(EmitSnafu)?,
                ))
            }
            None => Ok(Outcome::new(Disposition::DuplicateNoOp)),
        }
    }

    /// The local user's active followers, oldest first
    pub async fn followers(&self) -> Result<Vec<FollowRelationship>> {
        self.storage
            .enumerate_active(Direction::Incoming)
            .await
            .context(StoreUnavailableSnafu)
    }

    /// The actors the local user is following (or has asked to follow), oldest first
    pub async fn following(&self) -> Result<Vec<FollowRelationship>> {
        self.storage
            .enumerate_active(Direction::Outgoing)
            .await
            .context(StoreUnavailableSnafu)
    }

    /// The local user's relationship with `actor`, in both directions
    pub async fn relationship(&self, actor: &Url) -> Result<Relationship> {
        let following = self
            .storage
            .lookup(Direction::Outgoing, actor)
            .await
            .context(StoreUnavailableSnafu)?;
        let followed_by = self
            .storage
            .lookup(Direction::Incoming, actor)
            .await
            .context(StoreUnavailableSnafu)?;
        Ok(Relationship {
            following: following.map(|rel| rel.state()),
            followed_by: followed_by.map(|rel| rel.state()),
        })
    }

    /// Every relationship ever recorded with `actor` in direction `direction`, oldest first
    pub async fn history(
        &self,
        direction: Direction,
        actor: &Url,
    ) -> Result<Vec<FollowRelationship>> {
        self.storage
            .history(direction, actor)
            .await
            .context(StoreUnavailableSnafu)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::{entities::Username, memory::Store, origin::Origin};

    fn alice() -> LocalUser {
        LocalUser::new(
            Username::new("alice").unwrap(),
            "Alice",
            "https://social.example".parse::<Origin>().unwrap(),
            Utc::now(),
        )
        .unwrap()
    }

    fn manager() -> FollowManager {
        FollowManager::new(Arc::new(Store::new()))
    }

    fn follow(actor: &str, id: &str) -> Value {
        json!({
            "id": id,
            "type": "Follow",
            "actor": actor,
            "object": "https://social.example/users/alice"
        })
    }

    fn undo(actor: &str, id: &str) -> Value {
        json!({
            "id": format!("{}/undo", id),
            "type": "Undo",
            "actor": actor,
            "object": follow(actor, id)
        })
    }

    fn pending(direction: Direction) -> FollowRelationship {
        FollowRelationship::new(
            RelationshipId::new(),
            direction,
            RemoteActor::new(Url::parse("https://remote.example/users/bob").unwrap()),
            Url::parse("https://remote.example/follows/1").unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn plans() {
        let mut rel = pending(Direction::Incoming);
        assert_eq!(plan_follow(None), FollowPlan::Create);
        assert_eq!(
            plan_follow(Some(&rel)),
            FollowPlan::AcceptPending(rel.clone())
        );
        assert_eq!(
            plan_unfollow(Some(&rel)),
            UnfollowPlan::Remove {
                id: rel.id(),
                from: FollowState::Pending
            }
        );
        rel.set_state(FollowState::Accepted, Utc::now());
        assert_eq!(plan_follow(Some(&rel)), FollowPlan::Reaccept(rel.clone()));
        rel.set_state(FollowState::Removed, Utc::now());
        assert_eq!(plan_follow(Some(&rel)), FollowPlan::Create);
        assert_eq!(plan_unfollow(Some(&rel)), UnfollowPlan::Ignore);
        assert_eq!(plan_unfollow(None), UnfollowPlan::Ignore);

        let mut rel = pending(Direction::Outgoing);
        let follow_id = rel.follow_id().clone();
        let other = Url::parse("https://remote.example/follows/2").unwrap();
        assert_eq!(
            plan_accept(Some(&rel), &follow_id),
            AcceptPlan::Accept { id: rel.id() }
        );
        assert_eq!(plan_accept(Some(&rel), &other), AcceptPlan::Unexpected);
        assert_eq!(plan_accept(None, &follow_id), AcceptPlan::Unexpected);
        rel.set_state(FollowState::Accepted, Utc::now());
        assert_eq!(plan_accept(Some(&rel), &follow_id), AcceptPlan::Duplicate);
    }

    #[tokio::test]
    async fn duplicate_follows() {
        let user = alice();
        let mgr = manager();
        let bob = "https://remote.example/users/bob";
        let first = mgr
            .handle(&user, &follow(bob, "https://remote.example/follows/1"))
            .await
            .unwrap();
        assert_eq!(first.disposition, Disposition::Created);
        assert_eq!(first.outbound.len(), 1);
        let second = mgr
            .handle(&user, &follow(bob, "https://remote.example/follows/1"))
            .await
            .unwrap();
        assert_eq!(second.disposition, Disposition::DuplicateNoOp);
        assert_eq!(second.outbound, first.outbound);

        let followers = mgr.followers().await.unwrap();
        assert_eq!(followers.len(), 1);
        assert_eq!(followers[0].state(), FollowState::Accepted);
    }

    #[tokio::test]
    async fn refollow_under_a_new_id() {
        let user = alice();
        let mgr = manager();
        let bob = "https://remote.example/users/bob";
        mgr.handle(&user, &follow(bob, "https://remote.example/follows/1"))
            .await
            .unwrap();
        let again = mgr
            .handle(&user, &follow(bob, "https://remote.example/follows/2"))
            .await
            .unwrap();
        assert_eq!(again.disposition, Disposition::DuplicateNoOp);
        assert_eq!(again.outbound.len(), 1);
        // The Accept names the Follow we were just sent...
        let accept =
            serde_json::from_str::<Value>(&again.outbound[0].activity().to_string()).unwrap();
        assert_eq!(accept["type"], "Accept");
        assert_eq!(accept["object"]["id"], "https://remote.example/follows/2");
        // but the relationship is the one we already had.
        let followers = mgr.followers().await.unwrap();
        assert_eq!(followers.len(), 1);
        assert_eq!(
            followers[0].follow_id().as_str(),
            "https://remote.example/follows/1"
        );
    }

    /// A [Backend] whose first few inserts lose a race
    struct Racy {
        inner: Store,
        races: AtomicUsize,
    }

    impl Racy {
        fn new(races: usize) -> Racy {
            Racy {
                inner: Store::new(),
                races: AtomicUsize::new(races),
            }
        }
    }

    #[async_trait]
    impl Backend for Racy {
        async fn local_user(&self) -> std::result::Result<Option<LocalUser>, storage::Error> {
            self.inner.local_user().await
        }
        async fn setup_local_user(
            &self,
            user: &LocalUser,
        ) -> std::result::Result<LocalUser, storage::Error> {
            self.inner.setup_local_user(user).await
        }
        async fn lookup(
            &self,
            direction: Direction,
            actor: &Url,
        ) -> std::result::Result<Option<FollowRelationship>, storage::Error> {
            self.inner.lookup(direction, actor).await
        }
        async fn insert_or_fetch(
            &self,
            rel: &FollowRelationship,
        ) -> std::result::Result<Inserted, storage::Error> {
            if self
                .races
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Ok(Inserted::Raced);
            }
            self.inner.insert_or_fetch(rel).await
        }
        async fn transition(
            &self,
            direction: Direction,
            actor: &Url,
            id: &RelationshipId,
            from: FollowState,
            to: FollowState,
        ) -> std::result::Result<bool, storage::Error> {
            self.inner.transition(direction, actor, id, from, to).await
        }
        async fn enumerate_active(
            &self,
            direction: Direction,
        ) -> std::result::Result<Vec<FollowRelationship>, storage::Error> {
            self.inner.enumerate_active(direction).await
        }
        async fn history(
            &self,
            direction: Direction,
            actor: &Url,
        ) -> std::result::Result<Vec<FollowRelationship>, storage::Error> {
            self.inner.history(direction, actor).await
        }
    }

    #[tokio::test]
    async fn lost_insert_races_are_replanned() {
        let user = alice();
        let bob = "https://remote.example/users/bob";

        let mgr = FollowManager::new(Arc::new(Racy::new(1)));
        let outcome = mgr
            .handle(&user, &follow(bob, "https://remote.example/follows/1"))
            .await
            .unwrap();
        assert_eq!(outcome.disposition, Disposition::Created);
        assert_eq!(outcome.outbound.len(), 1);
        assert_eq!(mgr.followers().await.unwrap().len(), 1);

        let outcome = mgr
            .follow(
                &user,
                RemoteActor::new(Url::parse("https://remote.example/users/dave").unwrap()),
            )
            .await;
        assert_eq!(outcome.unwrap().disposition, Disposition::Created);

        // Losing every time is contention, not an outage
        let mgr = FollowManager::new(Arc::new(Racy::new(MAX_CAS_ATTEMPTS)));
        assert!(matches!(
            mgr.handle(&user, &follow(bob, "https://remote.example/follows/1"))
                .await,
            Err(Error::Contention { .. })
        ));
        assert!(mgr.followers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undo_from_a_stranger() {
        let user = alice();
        let mgr = manager();
        let outcome = mgr
            .handle(
                &user,
                &undo(
                    "https://remote.example/users/carol",
                    "https://remote.example/follows/9",
                ),
            )
            .await
            .unwrap();
        assert_eq!(outcome.disposition, Disposition::DuplicateNoOp);
        assert!(outcome.outbound.is_empty());
        assert!(mgr.followers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refollow() {
        let user = alice();
        let mgr = manager();
        let bob = Url::parse("https://remote.example/users/bob").unwrap();
        mgr.handle(&user, &follow(bob.as_str(), "https://remote.example/follows/1"))
            .await
            .unwrap();
        let outcome = mgr
            .handle(&user, &undo(bob.as_str(), "https://remote.example/follows/1"))
            .await
            .unwrap();
        assert_eq!(outcome.disposition, Disposition::Removed);
        assert!(mgr.followers().await.unwrap().is_empty());
        let outcome = mgr
            .handle(&user, &follow(bob.as_str(), "https://remote.example/follows/2"))
            .await
            .unwrap();
        assert_eq!(outcome.disposition, Disposition::Created);

        let history = mgr.history(Direction::Incoming, &bob).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].state(), FollowState::Removed);
        assert_eq!(history[1].state(), FollowState::Accepted);
        assert_ne!(history[0].id(), history[1].id());
        assert_eq!(
            mgr.relationship(&bob).await.unwrap(),
            Relationship {
                following: None,
                followed_by: Some(FollowState::Accepted)
            }
        );
    }

    #[tokio::test]
    async fn stray_accepts() {
        let user = alice();
        let mgr = manager();
        let outcome = mgr
            .handle(
                &user,
                &json!({
                    "type": "Accept",
                    "actor": "https://remote.example/users/dave",
                    "object": {
                        "id": "https://social.example/users/alice/follows/36bbef8b-9922-4f6b-916b-2b2241797964",
                        "type": "Follow",
                        "actor": "https://social.example/users/alice",
                        "object": "https://remote.example/users/dave"
                    }
                }),
            )
            .await
            .unwrap();
        assert_eq!(outcome.disposition, Disposition::LateOrUnknownReply);
        assert!(mgr.following().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn outgoing_lifecycle() {
        let user = alice();
        let mgr = manager();
        let dave = Url::parse("https://remote.example/users/dave").unwrap();

        let outcome = mgr
            .follow(&user, RemoteActor::new(dave.clone()))
            .await
            .unwrap();
        assert_eq!(outcome.disposition, Disposition::Created);
        assert_eq!(outcome.outbound.len(), 1);
        // Still pending; following again re-sends the same Follow
        let again = mgr
            .follow(&user, RemoteActor::new(dave.clone()))
            .await
            .unwrap();
        assert_eq!(again.disposition, Disposition::DuplicateNoOp);
        assert_eq!(again.outbound, outcome.outbound);

        let rel = mgr.following().await.unwrap().pop().unwrap();
        assert_eq!(rel.state(), FollowState::Pending);
        let accept = json!({
            "type": "Accept",
            "actor": dave.as_str(),
            "object": rel.follow_id().as_str()
        });
        assert_eq!(
            mgr.handle(&user, &accept).await.unwrap().disposition,
            Disposition::Accepted
        );
        assert_eq!(
            mgr.handle(&user, &accept).await.unwrap().disposition,
            Disposition::DuplicateNoOp
        );
        // Accepted: nothing further to send
        assert!(mgr
            .follow(&user, RemoteActor::new(dave.clone()))
            .await
            .unwrap()
            .outbound
            .is_empty());

        let outcome = mgr.unfollow(&user, &dave).await.unwrap();
        assert_eq!(outcome.disposition, Disposition::Removed);
        assert_eq!(outcome.outbound.len(), 1);
        let outcome = mgr.unfollow(&user, &dave).await.unwrap();
        assert_eq!(outcome.disposition, Disposition::DuplicateNoOp);
        assert!(outcome.outbound.is_empty());
        // An Accept that shows up now is late
        assert_eq!(
            mgr.handle(&user, &accept).await.unwrap().disposition,
            Disposition::LateOrUnknownReply
        );

        assert!(matches!(
            mgr.follow(&user, RemoteActor::new(user.actor_id().clone()))
                .await,
            Err(Error::SelfFollow { .. })
        ));
    }

    #[tokio::test]
    async fn rejections_classify() {
        let user = alice();
        let mgr = manager();
        assert!(matches!(
            mgr.handle(&user, &json!({"type": "Follow"})).await,
            Err(Error::MalformedActivity { .. })
        ));
        assert!(matches!(
            mgr.handle(
                &user,
                &json!({
                    "id": "https://remote.example/follows/1",
                    "type": "Follow",
                    "actor": "https://remote.example/users/bob",
                    "object": "https://social.example/users/mallory"
                })
            )
            .await,
            Err(Error::WrongRecipient { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_follow_and_undo() {
        let user = Arc::new(alice());
        let mgr = manager();
        for i in 0..32 {
            let actor = format!("https://remote.example/users/racer{}", i);
            let id = format!("https://remote.example/follows/{}", i);
            let (f, u) = {
                let (m1, m2) = (mgr.clone(), mgr.clone());
                let (u1, u2) = (user.clone(), user.clone());
                let (fp, up) = (follow(&actor, &id), undo(&actor, &id));
                (
                    tokio::spawn(async move { m1.handle(&u1, &fp).await }),
                    tokio::spawn(async move { m2.handle(&u2, &up).await }),
                )
            };
            let (f, u) = (f.await.unwrap().unwrap(), u.await.unwrap().unwrap());
            let actor = Url::parse(&actor).unwrap();
            let history = mgr.history(Direction::Incoming, &actor).await.unwrap();
            assert_eq!(history.len(), 1);
            match u.disposition {
                // The Undo came second; the edge is gone
                Disposition::Removed => assert_eq!(history[0].state(), FollowState::Removed),
                // The Undo came first; the Follow stands
                Disposition::DuplicateNoOp => {
                    assert_eq!(f.disposition, Disposition::Created);
                    assert_eq!(history[0].state(), FollowState::Accepted)
                }
                other => panic!("Unexpected disposition {:?}", other),
            }
            if f.disposition == Disposition::Superseded {
                assert!(f.outbound.is_empty());
            }
        }
    }
}
