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

//! Integration tests for the follow graph
//!
//! Each test here drives a [FollowManager] over whatever [Backend] it's handed, so the same suite
//! checks the reconciliation rules against every store we support.

use std::sync::Arc;

use chrono::Utc;
use libtest_mimic::Failed;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use solofed::{
    entities::{Direction, FollowRelationship, FollowState, RelationshipId, RemoteActor},
    follows::{Disposition, FollowManager, Relationship},
    storage::{Backend, Inserted},
};

use crate::{follow_id, local_user, stranger};

fn follow(actor: &Url, id: &Url) -> Value {
    json!({
        "id": id.as_str(),
        "type": "Follow",
        "actor": actor.as_str(),
        "object": "https://social.example/users/alice"
    })
}

fn undo(actor: &Url, id: &Url) -> Value {
    json!({
        "id": format!("{}/undo", id),
        "type": "Undo",
        "actor": actor.as_str(),
        "object": follow(actor, id)
    })
}

/// Two identical Follows yield one edge & two identical Accepts
pub async fn duplicate_follows(storage: Arc<dyn Backend + Send + Sync>) -> Result<(), Failed> {
    let user = local_user()?;
    let mgr = FollowManager::new(storage);
    let (actor, id) = (stranger()?, follow_id()?);

    let first = mgr.handle(&user, &follow(&actor, &id)).await?;
    assert_eq!(first.disposition, Disposition::Created);
    assert_eq!(first.outbound.len(), 1);
    let second = mgr.handle(&user, &follow(&actor, &id)).await?;
    assert_eq!(second.disposition, Disposition::DuplicateNoOp);
    assert_eq!(second.outbound, first.outbound);

    let ours = mgr
        .followers()
        .await?
        .into_iter()
        .filter(|rel| rel.actor().id() == &actor)
        .collect::<Vec<_>>();
    assert_eq!(ours.len(), 1);
    assert_eq!(ours[0].state(), FollowState::Accepted);
    assert_eq!(mgr.history(Direction::Incoming, &actor).await?.len(), 1);
    Ok(())
}

/// An Undo from someone who never followed us changes nothing
pub async fn stray_undo(storage: Arc<dyn Backend + Send + Sync>) -> Result<(), Failed> {
    let user = local_user()?;
    let mgr = FollowManager::new(storage);
    let actor = stranger()?;

    let outcome = mgr.handle(&user, &undo(&actor, &follow_id()?)).await?;
    assert_eq!(outcome.disposition, Disposition::DuplicateNoOp);
    assert!(outcome.outbound.is_empty());
    assert!(mgr.history(Direction::Incoming, &actor).await?.is_empty());
    Ok(())
}

/// Follow, Undo, Follow: the tombstone is retained & a new edge is created alongside it
pub async fn refollow(storage: Arc<dyn Backend + Send + Sync>) -> Result<(), Failed> {
    let user = local_user()?;
    let mgr = FollowManager::new(storage);
    let actor = stranger()?;
    let first = follow_id()?;

    mgr.handle(&user, &follow(&actor, &first)).await?;
    let outcome = mgr.handle(&user, &undo(&actor, &first)).await?;
    assert_eq!(outcome.disposition, Disposition::Removed);
    assert!(outcome.outbound.is_empty());
    assert_eq!(
        mgr.relationship(&actor).await?,
        Relationship {
            following: None,
            followed_by: None
        }
    );

    let outcome = mgr.handle(&user, &follow(&actor, &follow_id()?)).await?;
    assert_eq!(outcome.disposition, Disposition::Created);

    let history = mgr.history(Direction::Incoming, &actor).await?;
    debug!("History for {}: {:?}", actor, history);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].state(), FollowState::Removed);
    assert_eq!(history[0].follow_id(), &first);
    assert_eq!(history[1].state(), FollowState::Accepted);
    assert_ne!(history[0].id(), history[1].id());
    assert_eq!(
        mgr.relationship(&actor).await?,
        Relationship {
            following: None,
            followed_by: Some(FollowState::Accepted)
        }
    );
    Ok(())
}

/// An Accept for a Follow we never sent is ignored
pub async fn stray_accept(storage: Arc<dyn Backend + Send + Sync>) -> Result<(), Failed> {
    let user = local_user()?;
    let mgr = FollowManager::new(storage);
    let actor = stranger()?;

    let outcome = mgr
        .handle(
            &user,
            &json!({
                "type": "Accept",
                "actor": actor.as_str(),
                "object": {
                    "id": "https://social.example/users/alice/follows/36bbef8b-9922-4f6b-916b-2b2241797964",
                    "type": "Follow",
                    "actor": "https://social.example/users/alice",
                    "object": actor.as_str()
                }
            }),
        )
        .await?;
    assert_eq!(outcome.disposition, Disposition::LateOrUnknownReply);
    assert!(outcome.outbound.is_empty());
    assert!(mgr.history(Direction::Outgoing, &actor).await?.is_empty());
    Ok(())
}

/// Follow a remote actor, get accepted, unfollow
pub async fn outgoing_lifecycle(storage: Arc<dyn Backend + Send + Sync>) -> Result<(), Failed> {
    let user = local_user()?;
    let mgr = FollowManager::new(storage);
    let actor = stranger()?;

    let outcome = mgr.follow(&user, RemoteActor::new(actor.clone())).await?;
    assert_eq!(outcome.disposition, Disposition::Created);
    assert_eq!(outcome.outbound.len(), 1);
    let again = mgr.follow(&user, RemoteActor::new(actor.clone())).await?;
    assert_eq!(again.disposition, Disposition::DuplicateNoOp);
    assert_eq!(again.outbound, outcome.outbound);
    assert_eq!(
        mgr.relationship(&actor).await?.following,
        Some(FollowState::Pending)
    );

    let history = mgr.history(Direction::Outgoing, &actor).await?;
    assert_eq!(history.len(), 1);
    let accept = json!({
        "type": "Accept",
        "actor": actor.as_str(),
        "object": history[0].follow_id().as_str()
    });
    assert_eq!(
        mgr.handle(&user, &accept).await?.disposition,
        Disposition::Accepted
    );
    assert_eq!(
        mgr.handle(&user, &accept).await?.disposition,
        Disposition::DuplicateNoOp
    );
    assert!(mgr
        .following()
        .await?
        .iter()
        .any(|rel| rel.actor().id() == &actor && rel.state() == FollowState::Accepted));

    let outcome = mgr.unfollow(&user, &actor).await?;
    assert_eq!(outcome.disposition, Disposition::Removed);
    assert_eq!(outcome.outbound.len(), 1);
    let outcome = mgr.unfollow(&user, &actor).await?;
    assert_eq!(outcome.disposition, Disposition::DuplicateNoOp);
    assert!(outcome.outbound.is_empty());
    assert_eq!(
        mgr.handle(&user, &accept).await?.disposition,
        Disposition::LateOrUnknownReply
    );
    assert!(!mgr
        .following()
        .await?
        .iter()
        .any(|rel| rel.actor().id() == &actor));
    Ok(())
}

/// Race a Follow against its Undo; whichever wins, we end up with exactly one edge, in a state
/// consistent with the order in which they landed.
pub async fn concurrent_follow_and_undo(
    storage: Arc<dyn Backend + Send + Sync>,
) -> Result<(), Failed> {
    let user = Arc::new(local_user()?);
    let mgr = FollowManager::new(storage);
    for _ in 0..8 {
        let (actor, id) = (stranger()?, follow_id()?);
        let f = {
            let (mgr, user, payload) = (mgr.clone(), user.clone(), follow(&actor, &id));
            tokio::spawn(async move { mgr.handle(&user, &payload).await })
        };
        let u = {
            let (mgr, user, payload) = (mgr.clone(), user.clone(), undo(&actor, &id));
            tokio::spawn(async move { mgr.handle(&user, &payload).await })
        };
        let (f, u) = (f.await??, u.await??);
        let history = mgr.history(Direction::Incoming, &actor).await?;
        assert_eq!(history.len(), 1);
        match u.disposition {
            Disposition::Removed => assert_eq!(history[0].state(), FollowState::Removed),
            Disposition::DuplicateNoOp => {
                assert_eq!(f.disposition, Disposition::Created);
                assert_eq!(history[0].state(), FollowState::Accepted);
            }
            other => return Err(format!("Unexpected disposition {:?}", other).into()),
        }
        if f.disposition == Disposition::Superseded {
            assert!(f.outbound.is_empty());
        }
    }
    Ok(())
}

/// Exercise the storage primitives directly
pub async fn insert_and_transition(storage: Arc<dyn Backend + Send + Sync>) -> Result<(), Failed> {
    let actor = stranger()?;
    let rel = FollowRelationship::new(
        RelationshipId::new(),
        Direction::Outgoing,
        RemoteActor::new(actor.clone()),
        follow_id()?,
        Utc::now(),
    );

    assert_eq!(
        storage.insert_or_fetch(&rel).await?,
        Inserted::Created(rel.clone())
    );
    let other = FollowRelationship::new(
        RelationshipId::new(),
        Direction::Outgoing,
        RemoteActor::new(actor.clone()),
        follow_id()?,
        Utc::now(),
    );
    match storage.insert_or_fetch(&other).await? {
        Inserted::Existing(existing) => assert_eq!(existing.id(), rel.id()),
        inserted => return Err(format!("Expected the existing edge; got {:?}", inserted).into()),
    }
    // The same actor in the other direction is an independent edge
    assert!(storage.lookup(Direction::Incoming, &actor).await?.is_none());

    // Wrong `from` state: nothing happens
    assert!(!storage
        .transition(
            Direction::Outgoing,
            &actor,
            &rel.id(),
            FollowState::Accepted,
            FollowState::Removed
        )
        .await?);
    // Wrong ID: nothing happens
    assert!(!storage
        .transition(
            Direction::Outgoing,
            &actor,
            &other.id(),
            FollowState::Pending,
            FollowState::Accepted
        )
        .await?);
    assert!(storage
        .transition(
            Direction::Outgoing,
            &actor,
            &rel.id(),
            FollowState::Pending,
            FollowState::Accepted
        )
        .await?);
    let current = storage
        .lookup(Direction::Outgoing, &actor)
        .await?
        .ok_or("The accepted edge went missing")?;
    assert_eq!(current.state(), FollowState::Accepted);
    assert_eq!(current.follow_id(), rel.follow_id());

    assert!(storage
        .transition(
            Direction::Outgoing,
            &actor,
            &rel.id(),
            FollowState::Accepted,
            FollowState::Removed
        )
        .await?);
    assert!(storage.lookup(Direction::Outgoing, &actor).await?.is_none());
    // Tombstones are final
    assert!(storage
        .transition(
            Direction::Outgoing,
            &actor,
            &rel.id(),
            FollowState::Removed,
            FollowState::Pending
        )
        .await
        .is_err());

    // ...but don't block a new edge
    assert_eq!(
        storage.insert_or_fetch(&other).await?,
        Inserted::Created(other.clone())
    );
    let history = storage.history(Direction::Outgoing, &actor).await?;
    assert_eq!(
        history.iter().map(|rel| rel.id()).collect::<Vec<_>>(),
        vec![rel.id(), other.id()]
    );
    Ok(())
}

/// The local user, once recorded, isn't replaced
pub async fn local_user_setup(storage: Arc<dyn Backend + Send + Sync>) -> Result<(), Failed> {
    let first = storage.setup_local_user(&local_user()?).await?;
    let second = storage.setup_local_user(&local_user()?).await?;
    assert_eq!(first, second);
    assert_eq!(storage.local_user().await?, Some(first));
    Ok(())
}
