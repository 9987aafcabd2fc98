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

//! Local operations on the follow graph
//!
//! These endpoints are served on the private listener only: they let the operator have the local
//! user follow & unfollow remote actors, and inspect the relationship with any given actor.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracing::error;
use url::Url;

use crate::{
    actor::{dispatch, follows_status},
    entities::RemoteActor,
    follows::{self, Disposition, Relationship},
    http::ErrorResponseBody,
    solofed::Solofed,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
    Follows { source: follows::Error },
}

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            Error::Follows { source } => (follows_status(source), format!("{}", self)),
        }
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (code, msg) = self.as_status_and_msg();
        if code.is_server_error() {
            error!("{:#?}", self);
        }
        (code, Json(ErrorResponseBody { error: msg })).into_response()
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Request body for `/follow` & `/unfollow`
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FollowReq {
    pub actor: Url,
    /// The actor's inbox, if known; if not, it will be resolved at delivery time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbox: Option<Url>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DispositionRsp {
    pub disposition: Disposition,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RelationshipReq {
    pub actor: Url,
}

async fn follow(
    State(state): State<Arc<Solofed>>,
    Json(req): Json<FollowReq>,
) -> axum::response::Response {
    async fn follow1(state: &Solofed, req: FollowReq) -> Result<Disposition> {
        let outcome = state
            .follows
            .follow(
                &state.user,
                RemoteActor::new(req.actor).with_inbox(req.inbox),
            )
            .await
            .context(FollowsSnafu)?;
        Ok(dispatch(state, outcome).await)
    }
    match follow1(&state, req).await {
        Ok(disposition) => (StatusCode::OK, Json(DispositionRsp { disposition })).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn unfollow(
    State(state): State<Arc<Solofed>>,
    Json(req): Json<FollowReq>,
) -> axum::response::Response {
    async fn unfollow1(state: &Solofed, req: FollowReq) -> Result<Disposition> {
        let outcome = state
            .follows
            .unfollow(&state.user, &req.actor)
            .await
            .context(FollowsSnafu)?;
        Ok(dispatch(state, outcome).await)
    }
    match unfollow1(&state, req).await {
        Ok(disposition) => (StatusCode::OK, Json(DispositionRsp { disposition })).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn relationship(
    State(state): State<Arc<Solofed>>,
    Query(req): Query<RelationshipReq>,
) -> axum::response::Response {
    async fn relationship1(state: &Solofed, actor: &Url) -> Result<Relationship> {
        state
            .follows
            .relationship(actor)
            .await
            .context(FollowsSnafu)
    }
    match relationship1(&state, &req.actor).await {
        Ok(rel) => (StatusCode::OK, Json(rel)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn make_router(state: Arc<Solofed>) -> Router<Arc<Solofed>> {
    Router::new()
        .route("/follow", post(follow))
        .route("/unfollow", post(unfollow))
        .route("/relationship", get(relationship))
        .with_state(state)
}

#[cfg(test)]
mod test {
    use super::*;

    use serde_json::{json, Value};

    use crate::actor::test::{serve, state};

    #[tokio::test]
    async fn follow_and_unfollow() {
        let (state, recorder) = state();
        let addr = serve(
            Router::new()
                .nest("/ops", make_router(state.clone()))
                .with_state(state.clone()),
        )
        .await;
        let client = reqwest::Client::new();

        let rsp = client
            .post(format!("{}/ops/follow", addr))
            .json(&json!({
                "actor": "https://remote.example/users/dave",
                "inbox": "https://remote.example/users/dave/inbox"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(rsp.status(), reqwest::StatusCode::OK);
        let body = rsp.json::<Value>().await.unwrap();
        assert_eq!(body["disposition"], "created");
        let sent = recorder.take().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].inbox().map(|u| u.as_str()),
            Some("https://remote.example/users/dave/inbox")
        );

        let rel = client
            .get(format!("{}/ops/relationship", addr))
            .query(&[("actor", "https://remote.example/users/dave")])
            .send()
            .await
            .unwrap()
            .json::<Value>()
            .await
            .unwrap();
        assert_eq!(rel["following"], "pending");
        assert_eq!(rel["followed-by"], Value::Null);

        let body = client
            .post(format!("{}/ops/unfollow", addr))
            .json(&json!({"actor": "https://remote.example/users/dave"}))
            .send()
            .await
            .unwrap()
            .json::<Value>()
            .await
            .unwrap();
        assert_eq!(body["disposition"], "removed");
        assert_eq!(recorder.take().await.len(), 1);

        // Following ourselves is an error
        let rsp = client
            .post(format!("{}/ops/follow", addr))
            .json(&json!({"actor": "https://social.example/users/alice"}))
            .send()
            .await
            .unwrap();
        assert_eq!(rsp.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
