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

//! # dynamodb
//!
//! [Backend] implementation for DynamoDB (or anything speaking its API, such as ScyllaDB's
//! Alternator interface).
//!
//! Three tables, each with a string hash key named `pk`:
//!
//! - `solofed_users`: a single item, with `pk` "local", holding the local user
//! - `follow_heads`: one item per ([Direction], actor) key holding the most recent relationship
//!   for that key, active or not
//! - `follow_history`: every relationship ever recorded, with range key `id`
//!
//! The uniqueness of the active relationship is enforced by a condition on the write to
//! `follow_heads`. Every write goes to both the head & history tables in a single transaction, so
//! that a tombstone is always in the history before its head can be overwritten.
//!
//! [Backend]: crate::storage::Backend

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, Region};
use aws_sdk_dynamodb::{
    config::{http::HttpResponse, Credentials as AwsCredentials},
    error::{BuildError, SdkError},
    operation::{
        create_table::CreateTableError, put_item::PutItemError,
        transact_write_items::TransactWriteItemsError,
    },
    types::{
        AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType, Put,
        ScalarAttributeType, TransactWriteItem, Update,
    },
};
use chrono::Utc;
use secrecy::SecretString;
use serde::Deserialize;
use serde_dynamo::aws_sdk_dynamodb_1::{from_item, from_items, to_attribute_value, to_item};
use snafu::{prelude::*, Backtrace};
use tap::Pipe;
use tracing::{debug, info};
use url::Url;

use crate::{
    entities::{Direction, FollowKey, FollowRelationship, FollowState, LocalUser, RelationshipId},
    storage::{self, Backend, Inserted},
};

const USERS: &str = "solofed_users";
const HEADS: &str = "follow_heads";
const HISTORY: &str = "follow_history";

/// The `pk` of the one item in [USERS]
const LOCAL_USER_PK: &str = "local";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to build a DynamoDB request: {source}"))]
    Build {
        source: BuildError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to create table {table}: {source}"))]
    CreateTable {
        table: &'static str,
        source: SdkError<CreateTableError, HttpResponse>,
        backtrace: Backtrace,
    },
    #[snafu(display("Can't move a follow relationship from {from} to {to}"))]
    IllegalTransition {
        from: FollowState,
        to: FollowState,
        backtrace: Backtrace,
    },
    #[snafu(display("No endpoint URLs specified"))]
    NoEndpoints { backtrace: Backtrace },
    #[snafu(display("New relationships must be pending; {id} is {state}"))]
    NotPending {
        id: RelationshipId,
        state: FollowState,
        backtrace: Backtrace,
    },
    #[snafu(display("The local user was set up, but can't be read back"))]
    Vanished { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

/// Where to find DynamoDB
#[derive(Clone, Debug, Deserialize)]
pub enum Location {
    /// An AWS region name, like "us-west-2"
    Region(String),
    /// One or more endpoint URLs; only the first is currently used
    Endpoints(Vec<Url>),
}

/// AWS-style credentials
// Nb. deserialize-only, since these are secrets
#[derive(Clone, Debug, Deserialize)]
pub struct Credentials {
    #[serde(rename = "key-id")]
    pub key_id: SecretString,
    pub secret: SecretString,
}

pub struct Client {
    client: ::aws_sdk_dynamodb::Client,
}

/// True if `err` is a transaction cancelled because one of its conditions failed
fn is_condition_failure(err: &SdkError<TransactWriteItemsError, HttpResponse>) -> bool {
    match err {
        SdkError::ServiceError(inner) => match inner.err() {
            TransactWriteItemsError::TransactionCanceledException(exc) => exc
                .cancellation_reasons()
                .iter()
                .any(|reason| reason.code() == Some("ConditionalCheckFailed")),
            _ => false,
        },
        _ => false,
    }
}

fn item_for(
    rel: &FollowRelationship,
) -> std::result::Result<HashMap<String, AttributeValue>, storage::Error> {
    let mut item: HashMap<String, AttributeValue> = to_item(rel).map_err(storage::Error::new)?;
    item.insert("pk".to_owned(), AttributeValue::S(rel.key().to_string()));
    Ok(item)
}

fn attr<T: serde::Serialize>(value: T) -> std::result::Result<AttributeValue, storage::Error> {
    to_attribute_value(value).map_err(storage::Error::new)
}

impl Client {
    pub async fn new(location: &Location, credentials: &Option<Credentials>) -> Result<Client> {
        use secrecy::ExposeSecret;
        let creds = credentials.as_ref().map(|creds| {
            AwsCredentials::new(
                creds.key_id.expose_secret(),
                creds.secret.expose_secret(),
                None,
                None,
                "solofed",
            )
        });

        let config = match location {
            Location::Region(region) => {
                let region_provider =
                    RegionProviderChain::first_try(Some(Region::new(region.clone())))
                        .or_default_provider()
                        .or_else(Region::new("us-west-2"));
                let mut loader = aws_config::from_env().region(region_provider);
                if let Some(creds) = creds {
                    loader = loader.credentials_provider(creds);
                }
                loader.load().await
            }
            Location::Endpoints(endpoints) => {
                let ep_url = endpoints.first().context(NoEndpointsSnafu)?;
                let region_provider =
                    RegionProviderChain::default_provider().or_else(Region::new("us-west-2"));
                let mut loader = aws_config::defaults(BehaviorVersion::latest())
                    .region(region_provider)
                    .endpoint_url(ep_url.as_str());
                if let Some(creds) = creds {
                    loader = loader.credentials_provider(creds);
                }
                loader.load().await
            }
        };
        Ok(Client {
            client: ::aws_sdk_dynamodb::Client::new(&config),
        })
    }

    /// Create any of solofed's tables that don't already exist
    pub async fn create_tables(&self) -> Result<()> {
        for (table, range_key) in [(USERS, None), (HEADS, None), (HISTORY, Some("id"))] {
            let mut builder = self
                .client
                .create_table()
                .table_name(table)
                .billing_mode(BillingMode::PayPerRequest)
                .key_schema(
                    KeySchemaElement::builder()
                        .attribute_name("pk")
                        .key_type(KeyType::Hash)
                        .build()
                        .context(BuildSnafu)?,
                )
                .attribute_definitions(
                    AttributeDefinition::builder()
                        .attribute_name("pk")
                        .attribute_type(ScalarAttributeType::S)
                        .build()
                        .context(BuildSnafu)?,
                );
            if let Some(range_key) = range_key {
                builder = builder
                    .key_schema(
                        KeySchemaElement::builder()
                            .attribute_name(range_key)
                            .key_type(KeyType::Range)
                            .build()
                            .context(BuildSnafu)?,
                    )
                    .attribute_definitions(
                        AttributeDefinition::builder()
                            .attribute_name(range_key)
                            .attribute_type(ScalarAttributeType::S)
                            .build()
                            .context(BuildSnafu)?,
                    );
            }
            match builder.send().await {
                Ok(_) => info!("Created table {}", table),
                Err(SdkError::ServiceError(inner))
                    if matches!(inner.err(), CreateTableError::ResourceInUseException(_)) =>
                {
                    debug!("Table {} already exists", table)
                }
                Err(err) => return Err(err).context(CreateTableSnafu { table }),
            }
        }
        Ok(())
    }

    async fn head(
        &self,
        key: &FollowKey,
    ) -> std::result::Result<Option<FollowRelationship>, storage::Error> {
        self.client
            .get_item()
            .table_name(HEADS)
            .key("pk", AttributeValue::S(key.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(storage::Error::new)?
            .item
            .map(from_item)
            .transpose()
            .map_err(storage::Error::new)
    }
}

#[async_trait]
impl Backend for Client {
    async fn local_user(&self) -> std::result::Result<Option<LocalUser>, storage::Error> {
        self.client
            .get_item()
            .table_name(USERS)
            .key("pk", AttributeValue::S(LOCAL_USER_PK.to_owned()))
            .consistent_read(true)
            .send()
            .await
            .map_err(storage::Error::new)?
            .item
            .map(from_item)
            .transpose()
            .map_err(storage::Error::new)
    }

    async fn setup_local_user(
        &self,
        user: &LocalUser,
    ) -> std::result::Result<LocalUser, storage::Error> {
        let mut item: HashMap<String, AttributeValue> =
            to_item(user).map_err(storage::Error::new)?;
        item.insert("pk".to_owned(), AttributeValue::S(LOCAL_USER_PK.to_owned()));
        match self
            .client
            .put_item()
            .table_name(USERS)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(pk)")
            .send()
            .await
        {
            Ok(_) => {
                info!("Set up {} as the local user", user.username());
                Ok(user.clone())
            }
            Err(SdkError::ServiceError(inner))
                if matches!(inner.err(), PutItemError::ConditionalCheckFailedException(_)) =>
            {
                self.local_user()
                    .await?
                    .context(VanishedSnafu)
                    .map_err(storage::Error::new)
            }
            Err(err) => Err(storage::Error::new(err)),
        }
    }

    async fn lookup(
        &self,
        direction: Direction,
        actor: &Url,
    ) -> std::result::Result<Option<FollowRelationship>, storage::Error> {
        Ok(self
            .head(&FollowKey::new(direction, actor))
            .await?
            .filter(|rel| rel.is_active()))
    }

    async fn insert_or_fetch(
        &self,
        rel: &FollowRelationship,
    ) -> std::result::Result<Inserted, storage::Error> {
        if rel.state() != FollowState::Pending {
            return Err(storage::Error::new(
                NotPendingSnafu {
                    id: rel.id(),
                    state: rel.state(),
                }
                .build(),
            ));
        }
        let item = item_for(rel)?;
        let head = Put::builder()
            .table_name(HEADS)
            .set_item(Some(item.clone()))
            .condition_expression("attribute_not_exists(pk) OR #state = :removed")
            .expression_attribute_names("#state", "state")
            .expression_attribute_values(":removed", attr(FollowState::Removed)?)
            .build()
            .map_err(storage::Error::new)?;
        let history = Put::builder()
            .table_name(HISTORY)
            .set_item(Some(item))
            .build()
            .map_err(storage::Error::new)?;
        match self
            .client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().put(head).build())
            .transact_items(TransactWriteItem::builder().put(history).build())
            .send()
            .await
        {
            Ok(_) => {
                debug!("Recorded new relationship {} ({})", rel.id(), rel.key());
                Ok(Inserted::Created(rel.clone()))
            }
            Err(err) if is_condition_failure(&err) => {
                // There's an active relationship for this key; unless it was removed in the
                // meantime, that's our answer.
                self.head(&rel.key())
                    .await?
                    .filter(|current| current.is_active())
                    .map_or(Inserted::Raced, Inserted::Existing)
                    .pipe(Ok)
            }
            Err(err) => Err(storage::Error::new(err)),
        }
    }

    async fn transition(
        &self,
        direction: Direction,
        actor: &Url,
        id: &RelationshipId,
        from: FollowState,
        to: FollowState,
    ) -> std::result::Result<bool, storage::Error> {
        if !from.can_become(to) {
            return Err(storage::Error::new(
                IllegalTransitionSnafu { from, to }.build(),
            ));
        }
        let key = FollowKey::new(direction, actor).to_string();
        let now = attr(Utc::now())?;
        let update = |table: &str,
                      range_key: bool|
         -> std::result::Result<Update, storage::Error> {
            let mut builder = Update::builder()
                .table_name(table)
                .key("pk", AttributeValue::S(key.clone()))
                .update_expression("SET #state = :to, #updated = :now")
                .condition_expression("#id = :id AND #state = :from")
                .expression_attribute_names("#state", "state")
                .expression_attribute_names("#updated", "updated")
                .expression_attribute_names("#id", "id")
                .expression_attribute_values(":to", attr(to)?)
                .expression_attribute_values(":from", attr(from)?)
                .expression_attribute_values(":now", now.clone())
                .expression_attribute_values(":id", attr(id)?);
            if range_key {
                builder = builder.key("id", attr(id)?);
            }
            builder.build().map_err(storage::Error::new)
        };
        let head = update(HEADS, false)?;
        let history = update(HISTORY, true)?;
        match self
            .client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().update(head).build())
            .transact_items(TransactWriteItem::builder().update(history).build())
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_condition_failure(&err) => {
                debug!("Relationship {} ({}) is no longer {}", id, key, from);
                Ok(false)
            }
            Err(err) => Err(storage::Error::new(err)),
        }
    }

    async fn enumerate_active(
        &self,
        direction: Direction,
    ) -> std::result::Result<Vec<FollowRelationship>, storage::Error> {
        let mut items = Vec::new();
        let mut start = None;
        loop {
            let out = self
                .client
                .scan()
                .table_name(HEADS)
                .filter_expression("#direction = :direction AND #state <> :removed")
                .expression_attribute_names("#direction", "direction")
                .expression_attribute_names("#state", "state")
                .expression_attribute_values(":direction", attr(direction)?)
                .expression_attribute_values(":removed", attr(FollowState::Removed)?)
                .consistent_read(true)
                .set_exclusive_start_key(start)
                .send()
                .await
                .map_err(storage::Error::new)?;
            items.extend(out.items.unwrap_or_default());
            match out.last_evaluated_key {
                Some(key) => start = Some(key),
                None => break,
            }
        }
        let mut active: Vec<FollowRelationship> = from_items(items).map_err(storage::Error::new)?;
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
    ) -> std::result::Result<Vec<FollowRelationship>, storage::Error> {
        let key = FollowKey::new(direction, actor).to_string();
        let mut items = Vec::new();
        let mut start = None;
        loop {
            let out = self
                .client
                .query()
                .table_name(HISTORY)
                .key_condition_expression("pk = :pk")
                .expression_attribute_values(":pk", AttributeValue::S(key.clone()))
                .consistent_read(true)
                .set_exclusive_start_key(start)
                .send()
                .await
                .map_err(storage::Error::new)?;
            items.extend(out.items.unwrap_or_default());
            match out.last_evaluated_key {
                Some(key) => start = Some(key),
                None => break,
            }
        }
        let mut history: Vec<FollowRelationship> =
            from_items(items).map_err(storage::Error::new)?;
        history.sort_by_key(|rel| rel.created());
        Ok(history)
    }
}
