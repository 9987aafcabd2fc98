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

//! # In-memory storage
//!
//! A [Backend] implementation that lives entirely in process memory. It's suitable for testing, and
//! for running a throwaway instance.
//!
//! Each ([Direction], actor) key gets its own slot: the full history of relationships for that key,
//! oldest first, behind its own [Mutex]. Only the last entry in a slot may be active. The map lock
//! is only held long enough to find (or create) a slot, so operations on different keys never wait
//! on one another.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use snafu::{prelude::*, Backtrace};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use url::Url;

use crate::{
    entities::{
        Direction, FollowKey, FollowRelationship, FollowState, LocalUser, RelationshipId,
    },
    storage::{self, Backend, Inserted},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Can't move a follow relationship from {from} to {to}"))]
    IllegalTransition {
        from: FollowState,
        to: FollowState,
        backtrace: Backtrace,
    },
    #[snafu(display("New relationships must be pending; {id} is {state}"))]
    NotPending {
        id: RelationshipId,
        state: FollowState,
        backtrace: Backtrace,
    },
}

type Slot = Arc<Mutex<Vec<FollowRelationship>>>;

#[derive(Debug, Default)]
pub struct Store {
    user: Mutex<Option<LocalUser>>,
    slots: RwLock<HashMap<FollowKey, Slot>>,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }
    async fn existing_slot(&self, key: &FollowKey) -> Option<Slot> {
        self.slots.read().await.get(key).cloned()
    }
    async fn slot(&self, key: FollowKey) -> Slot {
        if let Some(slot) = self.existing_slot(&key).await {
            return slot;
        }
        self.slots.write().await.entry(key).or_default().clone()
    }
}

#[async_trait]
impl Backend for Store {
    async fn local_user(&self) -> Result<Option<LocalUser>, storage::Error> {
        Ok(self.user.lock().await.clone())
    }

    async fn setup_local_user(&self, user: &LocalUser) -> Result<LocalUser, storage::Error> {
        Ok(self.user.lock().await.get_or_insert_with(|| user.clone()).clone())
    }

    async fn lookup(
        &self,
        direction: Direction,
        actor: &Url,
    ) -> Result<Option<FollowRelationship>, storage::Error> {
        let slot = match self.existing_slot(&FollowKey::new(direction, actor)).await {
            Some(slot) => slot,
            None => return Ok(None),
        };
        let history = slot.lock().await;
        Ok(history.last().filter(|rel| rel.is_active()).cloned())
    }

    async fn insert_or_fetch(&self, rel: &FollowRelationship) -> Result<Inserted, storage::Error> {
        if rel.state() != FollowState::Pending {
            return Err(storage::Error::new(
                NotPendingSnafu {
                    id: rel.id(),
                    state: rel.state(),
                }
                .build(),
            ));
        }
        let slot = self.slot(rel.key()).await;
        let mut history = slot.lock().await;
        match history.last() {
            Some(current) if current.is_active() => Ok(Inserted::Existing(current.clone())),
            _ => {
                debug!("Recording new relationship {} ({})", rel.id(), rel.key());
                history.push(rel.clone());
                Ok(Inserted::Created(rel.clone()))
            }
        }
    }

    async fn transition(
        &self,
        direction: Direction,
        actor: &Url,
        id: &RelationshipId,
        from: FollowState,
        to: FollowState,
    ) -> Result<bool, storage::Error> {
        if !from.can_become(to) {
            return Err(storage::Error::new(
                IllegalTransitionSnafu { from, to }.build(),
            ));
        }
        let slot = match self.existing_slot(&FollowKey::new(direction, actor)).await {
            Some(slot) => slot,
            None => return Ok(false),
        };
        let mut history = slot.lock().await;
        match history
            .iter_mut()
            .rev()
            .find(|rel| rel.id() == *id && rel.state() == from)
        {
            Some(rel) => {
                rel.set_state(to, Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn enumerate_active(
        &self,
        direction: Direction,
    ) -> Result<Vec<FollowRelationship>, storage::Error> {
        let slots = self
            .slots
            .read()
            .await
            .iter()
            .filter(|(key, _)| key.direction == direction)
            .map(|(_, slot)| slot.clone())
            .collect::<Vec<Slot>>();
        let mut active = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(rel) = slot.lock().await.last().filter(|rel| rel.is_active()) {
                active.push(rel.clone());
            }
        }
        active.sort_by(|lhs, rhs| {
            lhs.created()
                .cmp(&rhs.created())
                .then_with(|| lhs.id().cmp(&rhs.id()))
        });
        Ok(active)
    }

    async fn history(
        &self,
        direction: Direction,
        actor: &Url,
    ) -> Result<Vec<FollowRelationship>, storage::Error> {
        match self.existing_slot(&FollowKey::new(direction, actor)).await {
            Some(slot) => Ok(slot.lock().await.clone()),
            None => Ok(Vec::new()),
        }
    }
}
