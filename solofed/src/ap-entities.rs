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

//! # ActivityPub Entities
//!
//! ## Introduction
//!
//! [ActivityPub] entities are [JSON-LD] documents. solofed takes the "loose" approach to them: treat
//! each document as plain JSON & deserialize it to a sum type discriminated by the "type" field. No
//! schema documents are fetched & no expansion is performed; we're betting that our peers use the
//! same terms we do (which, in practice, they do).
//!
//! [ActivityPub]: https://www.w3.org/TR/activitypub/
//! [JSON-LD]: https://www.w3.org/TR/json-ld/#the-context
//!
//! Only the handful of entities the follow graph needs are modeled: [Follow], [Accept], [Undo],
//! the [Actor] (just enough of it to find an inbox), and [OrderedCollection] for the followers &
//! following collections. Anything else arriving at the inbox fails to deserialize, which is what
//! we want.
//!
//! On the way out, entities are serialized through [Jld], which adds the "@context" & "type"
//! properties. `serde_json` maps are ordered by key, so a given entity always serializes to the same
//! bytes.

use std::{fmt::Display, ops::Deref};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};
use tap::Pipe;
use url::Url;
use uuid::Uuid;

use crate::{
    entities::{RelationshipId, Username},
    origin::Origin,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to deserialize an Actor: {source}"))]
    ActorDe {
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to resolve actor {actor_id}: {source}"))]
    ActorFetch {
        actor_id: Url,
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("More than one capture when attempting to parse a follow ID"))]
    Capture { backtrace: Backtrace },
    #[snafu(display("No captures when attempting to parse a follow ID"))]
    Captures { backtrace: Backtrace },
    #[snafu(display("We parsed a relationship ID out of a follow ID, but it was invalid: {source}"))]
    InvalidRelationshipId {
        source: uuid::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("We parsed a username out of a follow ID, but it was invalid: {source}"))]
    InvalidUsername {
        source: crate::entities::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("JSON serialization error: {source}"))]
    JsonSer { source: serde_json::Error },
    #[snafu(display("AP entities serialized to unexpected JSON types"))]
    JsonTypeMismatch { backtrace: Backtrace },
    #[snafu(display("Failed to parse an URL: {source}"))]
    UrlParse {
        source: url::ParseError,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       Standard Locations                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Return an URL naming a user's "followers" collection
pub fn make_user_followers(username: &Username, origin: &Origin) -> Result<Url> {
    Url::parse(&format!("{}/users/{}/followers", origin, username)).context(UrlParseSnafu)
}

/// Return an URL naming a user's "following" collection
pub fn make_user_following(username: &Username, origin: &Origin) -> Result<Url> {
    Url::parse(&format!("{}/users/{}/following", origin, username)).context(UrlParseSnafu)
}

/// Return an URL naming a solofed user; this is the user's ActivityPub actor ID
pub fn make_user_id(username: &Username, origin: &Origin) -> Result<Url> {
    Url::parse(&format!("{}/users/{}", origin, username)).context(UrlParseSnafu)
}

/// Return the ID for a Follow sent by the local user; `id` names the outgoing relationship
pub fn make_follow_id(username: &Username, id: &RelationshipId, origin: &Origin) -> Result<Url> {
    Url::parse(&format!("{}/users/{}/follows/{}", origin, username, id)).context(UrlParseSnafu)
}

/// Return the ID for an Undo retracting the Follow named by `follow_id`
pub fn make_undo_id(follow_id: &Url) -> Result<Url> {
    Url::parse(&format!("{}/undo", follow_id)).context(UrlParseSnafu)
}

/// Return the ID for an Accept of the Follow named by `follow_id`
///
/// The ID is derived from the Follow ID alone, so accepting the same Follow twice produces the same
/// Accept.
pub fn make_accept_id(actor_id: &Url, follow_id: &Url) -> Result<Url> {
    Url::parse(&format!(
        "{}#accepts/{}",
        actor_id,
        Uuid::new_v5(&Uuid::NAMESPACE_URL, follow_id.as_str().as_bytes()).as_hyphenated()
    ))
    .context(UrlParseSnafu)
}

lazy_static! {
    static ref FOLLOW_PATH: Regex =
        Regex::new("^/users/([a-zA-Z][-_.a-zA-Z0-9]+)/follows/([-0-9a-fA-F]{36})$").unwrap(/* known good */);
}

/// Parse a [Username] & [RelationshipId] from a solofed follow ID (as an [Url])
pub fn username_and_relationship_from_url(url: &Url) -> Result<(Username, RelationshipId)> {
    let captures = FOLLOW_PATH.captures(url.path()).context(CapturesSnafu)?;
    match (captures.get(1), captures.get(2)) {
        (Some(u), Some(r)) => Ok((
            Username::new(u.as_str()).context(InvalidUsernameSnafu)?,
            RelationshipId::from_raw_string(r.as_str()).context(InvalidRelationshipIdSnafu)?,
        )),
        _ => CaptureSnafu.fail(),
    }
}


////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Entities                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

// The context doesn't belong in any entity; it's added to the document only at the end. This struct
// can be conveniently serialized to JSON and appended to other values on the way out.
#[derive(Clone, Debug, Serialize)]
pub struct Context {
    #[serde(rename = "@context")]
    context: Vec<Url>,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            context: vec![
                Url::parse("https://www.w3.org/ns/activitystreams").unwrap(/* known good */),
                Url::parse("https://w3id.org/security/v1").unwrap(/* known good */),
            ],
        }
    }
}

/// Sum type representing the permissible values for the "type" field in a JLD document, as
/// produced by [solofed].
///
/// [solofed]: crate
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, PartialOrd, Serialize)]
pub enum Type {
    Accept,
    Follow,
    Undo,
    OrderedCollection,
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Type::Accept => "Accept",
                Type::Follow => "Follow",
                Type::Undo => "Undo",
                Type::OrderedCollection => "OrderedCollection",
            }
        )
    }
}

pub trait ToJld: Serialize {
    fn get_type(&self) -> Type;
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Actor                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct InlineId {
    id: Url,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "camelCase")]
struct Endpoints {
    #[serde(default)]
    shared_inbox: Option<Url>,
}

/// A remote actor, as we see it
///
/// Actor documents in the wild carry all manner of properties; we only care about where to deliver
/// to & what to call the thing.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    id: Url,
    inbox: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    endpoints: Option<Endpoints>,
}

impl Actor {
    /// A display name for this actor: its "name" if it has one, else its "preferredUsername"
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.preferred_username.as_deref())
    }
    pub fn id(&self) -> &Url {
        &self.id
    }
    pub fn inbox(&self) -> &Url {
        &self.inbox
    }
    pub fn shared_inbox(&self) -> Option<&Url> {
        self.endpoints
            .as_ref()
            .and_then(|endpoints| endpoints.shared_inbox.as_ref())
    }
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(untagged)]
pub enum ActorField {
    Inline(Box<Actor>),
    Iri(Url),
    InlineId(InlineId),
}

impl ActorField {
    pub fn id(&self) -> &Url {
        match self {
            ActorField::Inline(actor) => actor.id(),
            ActorField::Iri(url) => url,
            ActorField::InlineId(id) => &id.id,
        }
    }
    /// If this field carried the full actor document, return it
    pub fn inline(&self) -> Option<&Actor> {
        match self {
            ActorField::Inline(actor) => Some(actor),
            _ => None,
        }
    }
}

/// Fetch a remote actor's document
pub async fn fetch_actor(actor_id: &Url, client: &reqwest::Client) -> Result<Actor> {
    client
        .get(actor_id.clone())
        .header(http::header::ACCEPT, "application/activity+json")
        .send()
        .await
        .and_then(|rsp| rsp.error_for_status())
        .context(ActorFetchSnafu {
            actor_id: actor_id.clone(),
        })?
        .json::<Actor>()
        .await
        .context(ActorDeSnafu)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Follow                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Follow {
    object: Url,
    id: Url,
    actor: ActorField,
}

impl Follow {
    pub fn new(object: Url, id: Url, actor: Url) -> Follow {
        Follow {
            object,
            id,
            actor: ActorField::Iri(actor),
        }
    }
    pub fn actor(&self) -> &ActorField {
        &self.actor
    }
    /// Retrieve the `id` property of the `actor` attribute of this follow request
    pub fn actor_id(&self) -> &Url {
        self.actor.id()
    }
    pub fn id(&self) -> &Url {
        &self.id
    }
    pub fn object(&self) -> &Url {
        &self.object
    }
}

impl ToJld for Follow {
    fn get_type(&self) -> Type {
        Type::Follow
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         Accept & Undo                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The entities we're prepared to find embedded in the "object" property of an Accept or an Undo
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(tag = "type")]
pub enum EmbeddedObject {
    Follow(Follow),
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(untagged)]
pub enum ObjectField {
    Inline(EmbeddedObject),
    Iri(Url),
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Accept {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Url>,
    object: ObjectField,
    actor: ActorField,
}

impl Accept {
    /// Create an [Accept] for a [Follow] request
    ///
    /// [Accept]: https://www.w3.org/TR/activitystreams-vocabulary/#dfn-accept
    /// [Follow]: https://www.w3.org/TR/activitystreams-vocabulary/#dfn-follow
    pub fn for_follow(followed: &Url, follow_req: Follow) -> Result<Accept> {
        Ok(Accept {
            id: Some(make_accept_id(followed, follow_req.id())?),
            object: ObjectField::Inline(EmbeddedObject::Follow(follow_req)),
            actor: ActorField::Iri(followed.clone()),
        })
    }
    pub fn actor(&self) -> &ActorField {
        &self.actor
    }
    pub fn id(&self) -> Option<&Url> {
        self.id.as_ref()
    }
    pub fn object(&self) -> &ObjectField {
        &self.object
    }
}

impl ToJld for Accept {
    fn get_type(&self) -> Type {
        Type::Accept
    }
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Undo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Url>,
    object: ObjectField,
    actor: ActorField,
}

impl Undo {
    /// Create an [Undo] retracting a [Follow] request
    ///
    /// [Undo]: https://www.w3.org/TR/activitystreams-vocabulary/#dfn-undo
    /// [Follow]: https://www.w3.org/TR/activitystreams-vocabulary/#dfn-follow
    pub fn for_follow(follow_req: Follow) -> Result<Undo> {
        Ok(Undo {
            id: Some(make_undo_id(follow_req.id())?),
            actor: ActorField::Iri(follow_req.actor_id().clone()),
            object: ObjectField::Inline(EmbeddedObject::Follow(follow_req)),
        })
    }
    pub fn actor(&self) -> &ActorField {
        &self.actor
    }
    pub fn id(&self) -> Option<&Url> {
        self.id.as_ref()
    }
    pub fn object(&self) -> &ObjectField {
        &self.object
    }
}

impl ToJld for Undo {
    fn get_type(&self) -> Type {
        Type::Undo
    }
}

/// The activities a solofed inbox will accept
///
/// Anything whose "type" isn't listed here will fail to deserialize.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(tag = "type")]
pub enum FollowAcceptOrUndo {
    Accept(Accept),
    Follow(Follow),
    Undo(Undo),
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       OrderedCollection                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A complete (i.e. unpaged) ordered collection of actor IDs
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollection {
    id: Url,
    total_items: usize,
    ordered_items: Vec<Url>,
}

impl OrderedCollection {
    pub fn new<I: IntoIterator<Item = Url>>(id: Url, items: I) -> OrderedCollection {
        let ordered_items = items.into_iter().collect::<Vec<Url>>();
        OrderedCollection {
            id,
            total_items: ordered_items.len(),
            ordered_items,
        }
    }
    pub fn items(&self) -> impl Iterator<Item = &Url> {
        self.ordered_items.iter()
    }
}

impl ToJld for OrderedCollection {
    fn get_type(&self) -> Type {
        Type::OrderedCollection
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                               Jld                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Newtype "proving" that the caller produced JSON-LD
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Jld(String);

impl Jld {
    pub fn new<T: ToJld>(value: &T, context: Option<Context>) -> Result<Jld> {
        let json_value = serde_json::to_value(value).context(JsonSerSnafu)?;
        let context = context.unwrap_or_default();
        let ctx = serde_json::to_value(context).context(JsonSerSnafu)?;
        match (json_value, ctx) {
            (Value::Object(mut val_map), Value::Object(mut ctx_map)) => {
                val_map.append(&mut ctx_map);
                val_map.insert(
                    "type".to_owned(),
                    Value::String(format!("{}", value.get_type())),
                );
                Value::Object(val_map)
                    .pipe(|v| serde_json::to_string(&v))
                    .context(JsonSerSnafu)?
                    .pipe(Jld)
                    .pipe(Ok)
            }
            _ => JsonTypeMismatchSnafu.fail(),
        }
    }
}

impl Display for Jld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deref for Jld {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl AsRef<str> for Jld {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl From<Jld> for reqwest::Body {
    fn from(value: Jld) -> Self {
        value.0.into()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_accept_mastodon() {
        let accept = serde_json::from_str::<Accept>(r##"{
  "type": "Accept",
  "signature": {
    "type": "RsaSignature2017",
    "signatureValue": "rBzK4Kqhd4g7HDS8WE5oRbWQb2R+HF/6awbUuMWhgru/xCODT0SJWSri0qWqEO4fPcpoUyz2d25cw6o+iy9wiozQb3hQNnu69AR+H5Mytc06+g10KCHexbGhbAEAw/7IzmeXELHUbaqeduaDIbdt1zw4RkwLXdqgQcGXTJ6ND1wM3WMHXQCK1m0flasIXFoBxpliPAGiElV8s0+Ltuh562GvflG3kB3WO+j+NaR0ZfG5G9N88xMj9UQlCKit5gpAE5p6syUsCU2WGBHywTumv73i3OVTIFfq+P9AdMsRuzw1r7zoKEsthW4aOzLQDi01ZjvdBz8zH6JnjDU7SMN/Ig==",
    "creator": "http://mastodon.example.org/users/admin#main-key",
    "created": "2018-02-17T14:36:41Z"
  },
  "object": {
    "type": "Follow",
    "object": "http://mastodon.example.org/users/admin",
    "id": "http://localtesting.pleroma.lol/users/lain#follows/4",
    "actor": "http://localtesting.pleroma.lol/users/lain"
  },
  "nickname": "lain",
  "id": "http://mastodon.example.org/users/admin#accepts/follows/4",
  "actor": "http://mastodon.example.org/users/admin",
  "@context": [
    "https://www.w3.org/ns/activitystreams",
    "https://w3id.org/security/v1",
    {
      "toot": "http://joinmastodon.org/ns#",
      "sensitive": "as:sensitive",
      "ostatus": "http://ostatus.org#",
      "movedTo": "as:movedTo",
      "manuallyApprovesFollowers": "as:manuallyApprovesFollowers",
      "inReplyToAtomUri": "ostatus:inReplyToAtomUri",
      "conversation": "ostatus:conversation",
      "atomUri": "ostatus:atomUri",
      "Hashtag": "as:Hashtag",
      "Emoji": "toot:Emoji"
    }
  ]
}"##).unwrap();
        assert_eq!(
            accept.actor().id().as_str(),
            "http://mastodon.example.org/users/admin"
        );
        match accept.object() {
            ObjectField::Inline(EmbeddedObject::Follow(follow)) => assert_eq!(
                follow.actor_id().as_str(),
                "http://localtesting.pleroma.lol/users/lain"
            ),
            _ => panic!("Expected an inline Follow"),
        }
    }

    #[test]
    fn test_follow_mastodon() {
        let follow = serde_json::from_str::<FollowAcceptOrUndo>(
            r##"{
  "@context": "https://www.w3.org/ns/activitystreams",
  "id": "https://mastodon.social/0c30e6bd-8b84-4f6b-b48c-1c49f6ec5f1a",
  "type": "Follow",
  "actor": "https://mastodon.social/users/sp1ff",
  "object": "https://social.example/users/alice"
}"##,
        )
        .unwrap();
        match follow {
            FollowAcceptOrUndo::Follow(follow) => {
                assert_eq!(follow.actor_id().as_str(), "https://mastodon.social/users/sp1ff");
                assert_eq!(follow.object().as_str(), "https://social.example/users/alice");
            }
            _ => panic!("Expected a Follow"),
        }
    }

    #[test]
    fn test_follow_inline_actor() {
        // Some implementations (hubzilla, osada) send the full actor document
        let follow = serde_json::from_str::<Follow>(
            r##"{
  "id": "https://osada.example/follow/1",
  "type": "Follow",
  "actor": {
    "type": "Person",
    "id": "https://osada.example/channel/bob",
    "preferredUsername": "bob",
    "name": "Bob",
    "inbox": "https://osada.example/inbox/bob",
    "endpoints": { "sharedInbox": "https://osada.example/inbox" }
  },
  "object": "https://social.example/users/alice"
}"##,
        )
        .unwrap();
        let actor = follow.actor().inline().unwrap();
        assert_eq!(actor.inbox().as_str(), "https://osada.example/inbox/bob");
        assert_eq!(
            actor.shared_inbox().map(|u| u.as_str()),
            Some("https://osada.example/inbox")
        );
        assert_eq!(actor.display_name(), Some("Bob"));

        // while others send only the ID, inline
        let follow = serde_json::from_str::<Follow>(
            r##"{
  "id": "https://other.example/follow/1",
  "type": "Follow",
  "actor": { "id": "https://other.example/users/carol" },
  "object": "https://social.example/users/alice"
}"##,
        )
        .unwrap();
        assert!(follow.actor().inline().is_none());
        assert_eq!(follow.actor_id().as_str(), "https://other.example/users/carol");
    }

    #[test]
    fn test_undo_like_is_rejected() {
        assert!(serde_json::from_str::<FollowAcceptOrUndo>(
            r##"{
  "id": "https://mastodon.social/users/sp1ff#likes/1/undo",
  "type": "Undo",
  "actor": "https://mastodon.social/users/sp1ff",
  "object": {
    "id": "https://mastodon.social/users/sp1ff#likes/1",
    "type": "Like",
    "actor": "https://mastodon.social/users/sp1ff",
    "object": "https://social.example/users/alice/posts/1"
  }
}"##
        )
        .is_err());
        assert!(serde_json::from_str::<FollowAcceptOrUndo>(
            r##"{"type": "Like", "id": "https://a.example/1", "actor": "https://a.example/u", "object": "https://b.example/p"}"##
        )
        .is_err());
    }

    #[test]
    fn test_jld() {
        let follow = Follow::new(
            Url::parse("https://social.example/users/alice").unwrap(),
            Url::parse("https://remote.example/follows/1").unwrap(),
            Url::parse("https://remote.example/users/bob").unwrap(),
        );
        let accept =
            Accept::for_follow(&Url::parse("https://social.example/users/alice").unwrap(), follow)
                .unwrap();
        let a = Jld::new(&accept, None).unwrap();
        let b = Jld::new(&accept, None).unwrap();
        assert_eq!(a, b);

        let value = serde_json::from_str::<Value>(&a).unwrap();
        assert_eq!(value["type"], "Accept");
        assert_eq!(value["object"]["type"], "Follow");
        assert_eq!(value["object"]["actor"], "https://remote.example/users/bob");
        assert_eq!(value["@context"][0], "https://www.w3.org/ns/activitystreams");

        // & what we send, we should be able to read back
        let parsed = serde_json::from_str::<FollowAcceptOrUndo>(&a).unwrap();
        assert_eq!(parsed, FollowAcceptOrUndo::Accept(accept));
    }

    #[test]
    fn test_ordered_collection() {
        let coll = OrderedCollection::new(
            Url::parse("https://social.example/users/alice/followers").unwrap(),
            vec![
                Url::parse("https://a.example/users/1").unwrap(),
                Url::parse("https://b.example/users/2").unwrap(),
            ],
        );
        let value = serde_json::from_str::<Value>(&Jld::new(&coll, None).unwrap()).unwrap();
        assert_eq!(value["type"], "OrderedCollection");
        assert_eq!(value["totalItems"], 2);
        assert_eq!(value["orderedItems"][1], "https://b.example/users/2");
    }
}
