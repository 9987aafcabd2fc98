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

//! # Delivery
//!
//! Getting [Outbound] activities to their recipients. The follow graph never waits on a remote
//! server: handlers hand their outbound activities to a [Sender] & move on. [Queue] is the
//! production [Sender]; a bounded channel drained by a background worker which resolves the
//! recipient's inbox (if we don't already know it) & POSTs the activity. Each delivery runs as a
//! [tower] service wrapped in a [RetryLayer] with exponential backoff, and no more than
//! `max-concurrent-deliveries` of them are in flight at once. While the worker is at that limit it
//! stops reading from the channel, so a slow peer eventually shows up to callers as
//! [Error::QueueFull]. Failures are logged & counted, but never reported back to whomever sent the
//! original activity.
//!
//! Requests are not signed here; solofed expects to sit behind something that does that.

use std::{ops::Deref, sync::Arc, time::Duration};

use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use serde::Deserialize;
use snafu::{prelude::*, Backtrace};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        Mutex,
    },
    task::{JoinError, JoinHandle, JoinSet},
    time::error::Elapsed,
};
use tower::{
    retry::{
        backoff::{Backoff, ExponentialBackoff, ExponentialBackoffMaker, MakeBackoff},
        Policy, RetryLayer,
    },
    ServiceBuilder, ServiceExt,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    ap_entities::fetch_actor,
    counter_add,
    emitter::Outbound,
    http::ACTIVITY_JSON,
    metrics::{self, Instruments},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid backoff parameters: {source}"))]
    Backoff {
        source: tower::retry::backoff::InvalidBackoff,
        backtrace: Backtrace,
    },
    #[snafu(display("The delivery queue has shut down"))]
    Closed { backtrace: Backtrace },
    #[snafu(display("{min:?} - {max:?} is not a valid backoff range"))]
    DurationRange {
        min: Duration,
        max: Duration,
        backtrace: Backtrace,
    },
    #[snafu(display("{value} is not a valid jitter; it must be in [0, 100)"))]
    Jitter { value: f64, backtrace: Backtrace },
    #[snafu(display("Failed to POST to {inbox}: {source}"))]
    Post {
        inbox: Url,
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("The delivery queue is full; dropping an activity for {actor}"))]
    QueueFull { actor: Url, backtrace: Backtrace },
    #[snafu(display("Failed to resolve {actor} to an inbox: {source}"))]
    Resolve {
        actor: Url,
        #[snafu(source(from(crate::ap_entities::Error, Box::new)))]
        source: Box<crate::ap_entities::Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

inventory::submit! { metrics::Registration::new("delivery.successes") }
inventory::submit! { metrics::Registration::new("delivery.failures") }

/// Anything to which [Outbound] activities may be handed-off
#[async_trait]
pub trait Sender {
    /// Accept `outbound` for delivery; this shouldn't wait on the delivery itself.
    async fn send(&self, outbound: Outbound) -> Result<()>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         configuration                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A pair of [Duration]s, the first no greater than the second, the second non-zero
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DurationRange {
    min: Duration,
    max: Duration,
}

impl DurationRange {
    pub fn new(min: Duration, max: Duration) -> Result<DurationRange> {
        if min > max || max == Duration::from_millis(0) {
            DurationRangeSnafu { min, max }.fail()
        } else {
            Ok(DurationRange { min, max })
        }
    }
    pub fn lower(&self) -> &Duration {
        &self.min
    }
    pub fn upper(&self) -> &Duration {
        &self.max
    }
}

/// A refinement of [f64] that is finite & in the range [0, 100)
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct Jitter(f64);

impl Default for Jitter {
    fn default() -> Self {
        Jitter(0.0)
    }
}

impl std::fmt::Display for Jitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{Jitter {}%}}", self.0)
    }
}

impl TryFrom<f64> for Jitter {
    type Error = Error;

    fn try_from(value: f64) -> std::result::Result<Self, Self::Error> {
        if !value.is_finite() || !(0.0..100.0).contains(&value) {
            JitterSnafu { value }.fail()
        } else {
            Ok(Jitter(value))
        }
    }
}

impl Deref for Jitter {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<f64> for Jitter {
    fn as_ref(&self) -> &f64 {
        self.deref()
    }
}

/// Parameters for the exponential backoff between delivery attempts
///
/// `num-attempts` counts retries; an activity that never gets through is POSTed `num-attempts + 1`
/// times.
#[derive(Clone, Debug, Deserialize)]
pub struct BackoffParameters {
    durations: DurationRange,
    jitter: Jitter,
    #[serde(rename = "num-attempts")]
    num_attempts: usize,
}

impl BackoffParameters {
    pub fn new(durations: DurationRange, jitter: Jitter, num_attempts: usize) -> BackoffParameters {
        BackoffParameters {
            durations,
            jitter,
            num_attempts,
        }
    }
    pub fn jitter(&self) -> f64 {
        *self.jitter.as_ref()
    }
    pub fn lower(&self) -> &Duration {
        self.durations.lower()
    }
    pub fn num_attempts(&self) -> usize {
        self.num_attempts
    }
    pub fn upper(&self) -> &Duration {
        self.durations.upper()
    }
}

impl Default for BackoffParameters {
    fn default() -> Self {
        BackoffParameters {
            durations: DurationRange::new(Duration::from_secs(1), Duration::from_secs(64)).unwrap(/* known good */),
            jitter: Jitter::try_from(10.0).unwrap(/* known good */),
            num_attempts: 5,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// The number of activities that may be waiting for delivery at any one time
    #[serde(rename = "queue-depth")]
    pub queue_depth: usize,
    /// The maximum number of deliveries to drive concurrently
    #[serde(rename = "max-concurrent-deliveries")]
    pub max_concurrent_deliveries: usize,
    /// Upper bound on the time spent delivering any one activity, retries included
    #[serde(rename = "delivery-timeout")]
    pub delivery_timeout: Duration,
    /// Amount of time to wait for in-flight deliveries on shutdown
    #[serde(rename = "shutdown-timeout")]
    pub shutdown_timeout: Duration,
    pub backoff: BackoffParameters,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            queue_depth: 256,
            max_concurrent_deliveries: 16,
            delivery_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(5),
            backoff: BackoffParameters::default(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          retry policy                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Retry failed deliveries with exponential backoff, up to a fixed number of times
///
/// Each delivery works on its own clone, so the retry budget is per-activity.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    backoff: ExponentialBackoff,
    num_attempts: usize,
}

impl RetryPolicy {
    pub fn new(params: &BackoffParameters) -> Result<RetryPolicy> {
        Ok(RetryPolicy {
            backoff: ExponentialBackoffMaker::new(
                *params.lower(),
                *params.upper(),
                params.jitter(),
                tower::util::rng::HasherRng::new(),
            )
            .context(BackoffSnafu)?
            .make_backoff(),
            num_attempts: params.num_attempts(),
        })
    }
}

impl Policy<Outbound, (), Error> for RetryPolicy {
    type Future = <ExponentialBackoff as Backoff>::Future;

    // `None` means give up (or that there's nothing to retry), `Some(F)` means try again once `F`
    // resolves.
    fn retry(
        &mut self,
        outbound: &mut Outbound,
        result: &mut std::result::Result<(), Error>,
    ) -> Option<Self::Future> {
        match result {
            Ok(_) => None,
            Err(err) => {
                if self.num_attempts > 0 {
                    warn!(
                        "Delivery to {} failed ({}); {} retries left",
                        outbound.actor(),
                        err,
                        self.num_attempts
                    );
                    self.num_attempts -= 1;
                    Some(self.backoff.next_backoff())
                } else {
                    None
                }
            }
        }
    }

    fn clone_request(&mut self, outbound: &Outbound) -> Option<Outbound> {
        Some(outbound.clone())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Queue                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A [Sender] backed by a bounded queue & a background worker
#[derive(Clone, Debug)]
pub struct Queue {
    tx: mpsc::Sender<Outbound>,
}

impl Queue {
    /// Create a new [Queue], spawning its worker; must be called from within a tokio runtime
    ///
    /// The worker runs until every [Queue] clone has been dropped, then waits up to
    /// `shutdown-timeout` for deliveries still in flight.
    pub fn new(
        config: &Configuration,
        client: reqwest::Client,
        instruments: Arc<Instruments>,
    ) -> Result<(Queue, JoinHandle<()>)> {
        let policy = RetryPolicy::new(&config.backoff)?;
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let worker = tokio::spawn(worker(rx, config.clone(), policy, client, instruments));
        Ok((Queue { tx }, worker))
    }
}

#[async_trait]
impl Sender for Queue {
    async fn send(&self, outbound: Outbound) -> Result<()> {
        match self.tx.try_send(outbound) {
            Ok(_) => Ok(()),
            Err(TrySendError::Full(outbound)) => QueueFullSnafu {
                actor: outbound.actor().clone(),
            }
            .fail(),
            Err(TrySendError::Closed(_)) => ClosedSnafu.fail(),
        }
    }
}

/// A [Sender] that just holds on to whatever it's handed
///
/// Handy in testing, and for running an instance that shouldn't talk to anyone.
#[derive(Debug, Default)]
pub struct Recorder {
    sent: Mutex<Vec<Outbound>>,
}

impl Recorder {
    pub fn new() -> Recorder {
        Recorder::default()
    }
    /// Remove & return everything sent so far
    pub async fn take(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.sent.lock().await)
    }
}

#[async_trait]
impl Sender for Recorder {
    async fn send(&self, outbound: Outbound) -> Result<()> {
        debug!("Recording an activity for {}", outbound.actor());
        self.sent.lock().await.push(outbound);
        Ok(())
    }
}

type Finished = std::result::Result<std::result::Result<Result<()>, Elapsed>, JoinError>;

fn tally(finished: Finished, instruments: &Instruments) {
    match finished {
        Ok(Ok(Ok(_))) => {
            counter_add!(instruments, "delivery.successes", 1, &[]);
        }
        Ok(Ok(Err(err))) => {
            warn!("Giving up on a delivery: {}", err);
            counter_add!(instruments, "delivery.failures", 1, &[]);
        }
        Ok(Err(_)) => {
            warn!("A delivery timed-out");
            counter_add!(instruments, "delivery.failures", 1, &[]);
        }
        Err(err) => {
            warn!("A delivery task failed: {}", err);
            counter_add!(instruments, "delivery.failures", 1, &[]);
        }
    }
}

async fn worker(
    mut rx: mpsc::Receiver<Outbound>,
    config: Configuration,
    policy: RetryPolicy,
    client: reqwest::Client,
    instruments: Arc<Instruments>,
) {
    debug!("Delivery worker starting.");
    let max_concurrent = config.max_concurrent_deliveries.max(1);
    let mut inflight = JoinSet::new();
    loop {
        tokio::select! {
            // Only pull more work off the queue while we're under the concurrency limit
            next = rx.recv(), if inflight.len() < max_concurrent => match next {
                Some(outbound) => {
                    inflight.spawn(tokio::time::timeout(
                        config.delivery_timeout,
                        deliver(outbound, policy.clone(), client.clone()),
                    ));
                }
                None => break,
            },
            Some(finished) = inflight.join_next() => tally(finished, &instruments),
        }
    }

    info!(
        "Delivery queue closed; waiting on {} in-flight deliveries.",
        inflight.len()
    );
    let drain = async {
        while let Some(finished) = inflight.join_next().await {
            tally(finished, &instruments);
        }
    };
    if tokio::time::timeout(config.shutdown_timeout, drain)
        .await
        .is_err()
    {
        warn!(
            "Abandoning {} deliveries still in flight at shutdown.",
            inflight.len()
        );
    }
    info!("Delivery worker exiting.");
}

/// Make one attempt at delivering `outbound`; if we don't know the recipient's inbox, resolve it
/// first.
async fn attempt(outbound: Outbound, client: reqwest::Client) -> Result<()> {
    let inbox = match outbound.inbox() {
        Some(inbox) => inbox.clone(),
        None => fetch_actor(outbound.actor(), &client)
            .await
            .context(ResolveSnafu {
                actor: outbound.actor().clone(),
            })?
            .inbox()
            .clone(),
    };
    client
        .post(inbox.clone())
        .header(CONTENT_TYPE, ACTIVITY_JSON)
        .body(outbound.activity().clone())
        .send()
        .await
        .and_then(|rsp| rsp.error_for_status())
        .context(PostSnafu { inbox })?;
    debug!("Delivered an activity to {}", outbound.actor());
    Ok(())
}

/// Deliver `outbound`, retrying according to `policy`
async fn deliver(outbound: Outbound, policy: RetryPolicy, client: reqwest::Client) -> Result<()> {
    ServiceBuilder::new()
        .layer(RetryLayer::new(policy))
        .service_fn(move |outbound: Outbound| attempt(outbound, client.clone()))
        .oneshot(outbound)
        .await
}

#[cfg(test)]
mod test {
    use super::*;

    use chrono::Utc;
    use serde_json::json;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use crate::{
        emitter::accept_for,
        entities::{
            Direction, FollowRelationship, FollowState, LocalUser, RelationshipId, RemoteActor,
            Username,
        },
        origin::Origin,
    };

    fn outbound(actor: &str, inbox: Option<String>) -> Outbound {
        let user = LocalUser::new(
            Username::new("alice").unwrap(),
            "Alice",
            "https://social.example".parse::<Origin>().unwrap(),
            Utc::now(),
        )
        .unwrap();
        let mut rel = FollowRelationship::new(
            RelationshipId::new(),
            Direction::Incoming,
            RemoteActor::new(Url::parse(actor).unwrap())
                .with_inbox(inbox.map(|s| Url::parse(&s).unwrap())),
            Url::parse("https://remote.example/follows/1").unwrap(),
            Utc::now(),
        );
        rel.set_state(FollowState::Accepted, Utc::now());
        accept_for(&user, &rel).unwrap()
    }

    fn config(queue_depth: usize, max_concurrent_deliveries: usize) -> Configuration {
        Configuration {
            queue_depth,
            max_concurrent_deliveries,
            delivery_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
            backoff: BackoffParameters::new(
                DurationRange::new(Duration::from_millis(10), Duration::from_millis(40)).unwrap(),
                Jitter::default(),
                2,
            ),
        }
    }

    /// Wait (a bit) for `server` to have seen `n` requests
    async fn wait_for(server: &MockServer, n: usize) -> usize {
        let mut seen = 0;
        for _ in 0..200 {
            seen = server
                .received_requests()
                .await
                .map(|x| x.len())
                .unwrap_or(0);
            if seen >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        seen
    }

    #[test]
    fn parameters() {
        assert!(DurationRange::new(Duration::from_secs(2), Duration::from_secs(1)).is_err());
        assert!(DurationRange::new(Duration::ZERO, Duration::ZERO).is_err());
        assert!(Jitter::try_from(100.0).is_err());
        assert!(Jitter::try_from(f64::NAN).is_err());
        assert_eq!(format!("{}", Jitter::try_from(10.0).unwrap()), "{Jitter 10%}");
        assert!(RetryPolicy::new(&BackoffParameters::default()).is_ok());
    }

    #[tokio::test]
    async fn delivers_and_retries() {
        let server = MockServer::start().await;
        let actor = format!("{}/users/bob", server.uri());
        Mock::given(method("GET"))
            .and(path("/users/bob"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": actor.as_str(),
                "type": "Person",
                "inbox": format!("{}/good", server.uri()),
            })))
            .expect(1)
            .mount(&server)
            .await;
        // Once with a known inbox, once after resolving it
        Mock::given(method("POST"))
            .and(path("/good"))
            .respond_with(ResponseTemplate::new(202))
            .expect(2)
            .mount(&server)
            .await;
        // Two retries after the first failure, then give up
        Mock::given(method("POST"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let (queue, worker) = Queue::new(
            &config(8, 4),
            reqwest::Client::new(),
            Arc::new(Instruments::new("solofed-test")),
        )
        .unwrap();

        queue
            .send(outbound(&actor, Some(format!("{}/good", server.uri()))))
            .await
            .unwrap();
        queue.send(outbound(&actor, None)).await.unwrap();
        queue
            .send(outbound(&actor, Some(format!("{}/bad", server.uri()))))
            .await
            .unwrap();

        assert_eq!(wait_for(&server, 6).await, 6);
        // Give a runaway retry loop the chance to show itself
        tokio::time::sleep(Duration::from_millis(200)).await;
        server.verify().await;

        drop(queue);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn stops_reading_while_at_the_concurrency_limit() {
        let server = MockServer::start().await;
        let actor = format!("{}/users/bob", server.uri());
        let inbox = format!("{}/slow", server.uri());
        Mock::given(method("POST"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(202).set_delay(Duration::from_millis(500)))
            .expect(2)
            .mount(&server)
            .await;

        let (queue, worker) = Queue::new(
            &config(1, 1),
            reqwest::Client::new(),
            Arc::new(Instruments::new("solofed-test")),
        )
        .unwrap();

        // The worker picks this one up & is then at its limit...
        queue
            .send(outbound(&actor, Some(inbox.clone())))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // so this one sits in the queue...
        queue
            .send(outbound(&actor, Some(inbox.clone())))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // & there's no room for a third.
        assert!(matches!(
            queue.send(outbound(&actor, Some(inbox.clone()))).await,
            Err(Error::QueueFull { .. })
        ));

        // Closing the queue lets the worker finish what it has, then exit
        drop(queue);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
        server.verify().await;
    }

    #[tokio::test]
    async fn times_out_slow_deliveries() {
        let server = MockServer::start().await;
        let actor = format!("{}/users/bob", server.uri());
        Mock::given(method("POST"))
            .and(path("/stuck"))
            .respond_with(ResponseTemplate::new(202).set_delay(Duration::from_secs(2)))
            .expect(1)
            .mount(&server)
            .await;

        let mut cfg = config(1, 1);
        cfg.delivery_timeout = Duration::from_millis(100);
        let (queue, worker) = Queue::new(
            &cfg,
            reqwest::Client::new(),
            Arc::new(Instruments::new("solofed-test")),
        )
        .unwrap();
        queue
            .send(outbound(&actor, Some(format!("{}/stuck", server.uri()))))
            .await
            .unwrap();
        assert_eq!(wait_for(&server, 1).await, 1);
        // The stuck delivery is abandoned well before the peer would have answered
        drop(queue);
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .unwrap()
            .unwrap();
    }
}
