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

//! The ActivityPub endpoints for the local user: the inbox, and the followers & following
//! collections
//!
//! HTTP signature verification is expected to have been performed before requests reach the inbox.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use snafu::{prelude::*, Backtrace};
use tracing::{debug, error, info, warn};

use crate::{
    ap_entities::{self, make_user_followers, make_user_following, Jld, OrderedCollection},
    counter_add,
    entities::{FollowRelationship, LocalUser, Username},
    follows::{self, Outcome},
    http::{patch_content_type, ErrorResponseBody},
    inbox::{normalize_bytes, InboxActivity},
    metrics::{self, Instruments},
    solofed::Solofed,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to produce a collection: {source}"))]
    Collection { source: ap_entities::Error },
    #[snafu(display("{source}"))]
    Follows { source: follows::Error },
    #[snafu(display("Unknown user {username}"))]
    NoUser {
        username: Username,
        backtrace: Backtrace,
    },
}

impl Error {
    /// Convert this error into an HTTP status code & message suitable for the response body
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            Error::Collection { .. } => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", self)),
            Error::Follows { source } => (follows_status(source), format!("{}", self)),
            Error::NoUser { username, .. } => {
                (StatusCode::NOT_FOUND, format!("Unknown user {}", username))
            }
        }
    }
    /// True if the request was at fault
    fn is_rejection(&self) -> bool {
        self.as_status_and_msg().0.is_client_error()
    }
}

/// Map a [follows::Error] to an HTTP status
pub fn follows_status(err: &follows::Error) -> StatusCode {
    match err {
        follows::Error::MalformedActivity { .. } => StatusCode::BAD_REQUEST,
        follows::Error::SelfFollow { .. } => StatusCode::BAD_REQUEST,
        follows::Error::WrongRecipient { .. } => StatusCode::NOT_FOUND,
        follows::Error::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        follows::Error::Contention { .. } => StatusCode::SERVICE_UNAVAILABLE,
        follows::Error::Emit { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        follows::Error::FollowId { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (code, msg) = self.as_status_and_msg();
        (code, Json(ErrorResponseBody { error: msg })).into_response()
    }
}

type Result<T> = std::result::Result<T, Error>;

fn check_user(state: &Solofed, username: &Username) -> Result<()> {
    ensure!(
        state.user.username() == username,
        NoUserSnafu {
            username: username.clone()
        }
    );
    Ok(())
}

/// Hand-off everything in `outcome` to delivery
pub async fn dispatch(state: &Solofed, outcome: Outcome) -> follows::Disposition {
    for outbound in outcome.outbound {
        if let Err(err) = state.sender.send(outbound).await {
            warn!("Failed to queue an outbound activity: {}", err);
        }
    }
    outcome.disposition
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                               `/users/{username}/inbox` handler                                //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("inbox.follows") }
inventory::submit! { metrics::Registration::new("inbox.undos") }
inventory::submit! { metrics::Registration::new("inbox.accepts") }
inventory::submit! { metrics::Registration::new("inbox.rejections") }
inventory::submit! { metrics::Registration::new("inbox.errors") }

fn count(activity: &InboxActivity, instruments: &Instruments) {
    match activity {
        InboxActivity::FollowRequest { .. } => {
            counter_add!(instruments, "inbox.follows", 1, &[]);
        }
        InboxActivity::UnfollowRequest { .. } => {
            counter_add!(instruments, "inbox.undos", 1, &[]);
        }
        InboxActivity::FollowAccepted { .. } => {
            counter_add!(instruments, "inbox.accepts", 1, &[]);
        }
    }
}

/// ActivityPub user inbox
///
/// Follows, Undos of Follows, and Accepts of the local user's Follows are applied to the follow
/// graph; anything else is rejected. Any replies are queued for delivery before we respond.
async fn inbox(
    State(state): State<Arc<Solofed>>,
    Path(username): Path<Username>,
    body: Bytes,
) -> axum::response::Response {
    async fn inbox1(state: &Solofed, username: &Username, body: &[u8]) -> Result<Outcome> {
        check_user(state, username)?;
        let activity = normalize_bytes(body, &state.user)
            .map_err(follows::Error::from)
            .context(FollowsSnafu)?;
        count(&activity, &state.instruments);
        state
            .follows
            .apply(&state.user, activity)
            .await
            .context(FollowsSnafu)
    }

    match inbox1(&state, &username, &body).await {
        Ok(outcome) => {
            let disposition = dispatch(&state, outcome).await;
            debug!("Inbox disposition: {:?}", disposition);
            StatusCode::ACCEPTED.into_response()
        }
        Err(err) => {
            if err.is_rejection() {
                info!("Rejecting an inbox request: {}", err);
                counter_add!(state.instruments, "inbox.rejections", 1, &[]);
            } else {
                error!("{:#?}", err);
                counter_add!(state.instruments, "inbox.errors", 1, &[]);
            }
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          collections                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn collection(
    user: &LocalUser,
    id: ap_entities::Result<url::Url>,
    rels: Vec<FollowRelationship>,
) -> Result<Jld> {
    let coll = OrderedCollection::new(
        id.context(CollectionSnafu)?,
        rels.into_iter().map(|rel| rel.actor().id().clone()),
    );
    debug!(
        "Collection for {} has {} items",
        user.username(),
        coll.items().count()
    );
    Jld::new(&coll, None).context(CollectionSnafu)
}

/// `/users/{username}/followers` handler
async fn followers(
    State(state): State<Arc<Solofed>>,
    Path(username): Path<Username>,
) -> axum::response::Response {
    async fn followers1(state: &Solofed, username: &Username) -> Result<Jld> {
        check_user(state, username)?;
        collection(
            &state.user,
            make_user_followers(username, state.user.origin()),
            state.follows.followers().await.context(FollowsSnafu)?,
        )
    }
    match followers1(&state, &username).await {
        Ok(jld) => patch_content_type((StatusCode::OK, jld.to_string()).into_response()),
        Err(err) => err.into_response(),
    }
}

/// `/users/{username}/following` handler
async fn following(
    State(state): State<Arc<Solofed>>,
    Path(username): Path<Username>,
) -> axum::response::Response {
    async fn following1(state: &Solofed, username: &Username) -> Result<Jld> {
        check_user(state, username)?;
        collection(
            &state.user,
            make_user_following(username, state.user.origin()),
            state.follows.following().await.context(FollowsSnafu)?,
        )
    }
    match following1(&state, &username).await {
        Ok(jld) => patch_content_type((StatusCode::OK, jld.to_string()).into_response()),
        Err(err) => err.into_response(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Public API                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

pub fn make_router(state: Arc<Solofed>) -> Router<Arc<Solofed>> {
    Router::new()
        .route("/users/{username}/inbox", post(inbox))
        .route("/users/{username}/followers", get(followers))
        .route("/users/{username}/following", get(following))
        .with_state(state)
}
