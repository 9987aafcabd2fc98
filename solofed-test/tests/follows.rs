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

// Run the follow-graph suite against every configured storage backend. Rather than one test binary
// per backend, this program iterates over a list of fixtures, running every registered test in
// each.

use std::{io, process::ExitCode, sync::Arc};

use futures::future::{BoxFuture, FutureExt};
use itertools::Itertools;
use libtest_mimic::{Arguments, Conclusion, Trial};
use snafu::{ResultExt, Snafu};
use tokio::runtime::Runtime;
use tracing::debug;
use tracing_subscriber::{
    filter::{Directive, ParseError},
    fmt,
    layer::SubscriberExt,
    EnvFilter, Registry,
};

use solofed::{memory, storage::Backend};

use solofed_test::follows::{
    concurrent_follow_and_undo, duplicate_follows, insert_and_transition, local_user_setup,
    outgoing_lifecycle, refollow, stray_accept, stray_undo,
};

use common::{Configuration, Test};

mod common;

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Failed to create a DynamoDB client: {source}"))]
    Client { source: solofed::dynamodb::Error },
    #[snafu(display("Error obtaining test configuration: {source}"))]
    Configuration { source: common::Error },
    #[snafu(display("Failed to create the solofed tables: {source}"))]
    CreateTables { source: solofed::dynamodb::Error },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    Filter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to parse log level {level}: {source}"))]
    Level {
        level: String,
        source: ParseError,
    },
    #[snafu(display("Failed to set the global tracing subscriber: {source}"))]
    SetGlobalDefault {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to build a tokio runtime: {source}"))]
    TokioRuntime { source: std::io::Error },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

type MaybeBackend = Option<Arc<dyn Backend + Send + Sync>>;

struct TestFixture {
    pub name: &'static str,
    /// Produce the backend for this fixture, or `None` if it's not configured
    pub mk_backend: fn(&Configuration) -> BoxFuture<'static, Result<MaybeBackend>>,
}

inventory::collect!(TestFixture);

inventory::submit!(TestFixture {
    name: "memory",
    mk_backend: |_| -> BoxFuture<'static, Result<MaybeBackend>> {
        async move {
            Ok(Some(
                Arc::new(memory::Store::new()) as Arc<dyn Backend + Send + Sync>
            ))
        }
        .boxed()
    }
});

inventory::submit!(TestFixture {
    name: "dynamodb",
    mk_backend: |cfg| -> BoxFuture<'static, Result<MaybeBackend>> {
        let dynamo = cfg.dynamo.clone();
        async move {
            let dynamo = match dynamo {
                Some(dynamo) => dynamo,
                None => return Ok(None),
            };
            let client = solofed::dynamodb::Client::new(&dynamo.location, &dynamo.credentials)
                .await
                .context(ClientSnafu)?;
            if dynamo.create_tables {
                client.create_tables().await.context(CreateTablesSnafu)?;
            }
            Ok(Some(Arc::new(client) as Arc<dyn Backend + Send + Sync>))
        }
        .boxed()
    }
});

inventory::submit!(Test {
    name: "concurrent_follow_and_undo",
    test_fn: |rt, storage| rt.block_on(concurrent_follow_and_undo(storage)),
});

inventory::submit!(Test {
    name: "duplicate_follows",
    test_fn: |rt, storage| rt.block_on(duplicate_follows(storage)),
});

inventory::submit!(Test {
    name: "insert_and_transition",
    test_fn: |rt, storage| rt.block_on(insert_and_transition(storage)),
});

inventory::submit!(Test {
    name: "local_user_setup",
    test_fn: |rt, storage| rt.block_on(local_user_setup(storage)),
});

inventory::submit!(Test {
    name: "outgoing_lifecycle",
    test_fn: |rt, storage| rt.block_on(outgoing_lifecycle(storage)),
});

inventory::submit!(Test {
    name: "refollow",
    test_fn: |rt, storage| rt.block_on(refollow(storage)),
});

inventory::submit!(Test {
    name: "stray_accept",
    test_fn: |rt, storage| rt.block_on(stray_accept(storage)),
});

inventory::submit!(Test {
    name: "stray_undo",
    test_fn: |rt, storage| rt.block_on(stray_undo(storage)),
});

fn run_fixture(
    fix: &TestFixture,
    args: &Arguments,
    config: &Configuration,
    rt: Arc<Runtime>,
) -> Result<Option<Conclusion>> {
    let backend = match rt.block_on((fix.mk_backend)(config))? {
        Some(backend) => backend,
        None => {
            eprintln!("The {} fixture isn't configured; skipping it.", fix.name);
            return Ok(None);
        }
    };

    debug!("Backend {} created; executing tests.", fix.name);

    let conclusion = libtest_mimic::run(
        args,
        inventory::iter::<Test>
            .into_iter()
            .sorted_by_key(|t| t.name)
            .map(|test| {
                Trial::test(format!("{}::{}", fix.name, test.name), {
                    let rt = rt.clone();
                    let backend = backend.clone();
                    move || (test.test_fn)(rt, backend)
                })
            })
            .collect(),
    );

    debug!("Fixture {} complete; returning {conclusion:?}", fix.name);

    Ok(Some(conclusion))
}

// Exits with status zero on success, 101 on test failure & 1 on error.
fn main() -> Result<ExitCode> {
    // libtest-mimic wants synchronous test functions, so we build the runtime ourselves & hand it
    // to each test.
    let rt = Arc::new(Runtime::new().context(TokioRuntimeSnafu)?);

    // We have no way to augment the set of command-line arguments this program will accept, so
    // we'll examine an environment variable to determine where to get our configuration:
    let config = Configuration::new().context(ConfigurationSnafu)?;

    if config.logging {
        let level = config.log_level.parse::<Directive>().context(LevelSnafu {
            level: config.log_level.clone(),
        })?;
        let filter = EnvFilter::builder()
            .with_default_directive(level)
            .from_env()
            .context(FilterSnafu)?;
        tracing::subscriber::set_global_default(
            Registry::default()
                .with(fmt::Layer::default().compact().with_writer(io::stdout))
                .with(filter),
        )
        .context(SetGlobalDefaultSnafu)?;
    }

    debug!("Logging configured.");

    let args = Arguments::from_args();

    if inventory::iter::<TestFixture>
        .into_iter()
        .sorted_by_key(|fix| fix.name)
        .map(|fix| run_fixture(fix, &args, &config, rt.clone()))
        .collect::<StdResult<Vec<Option<Conclusion>>, _>>()?
        .into_iter()
        .flatten()
        .any(|c| c.has_failed())
    {
        Ok(ExitCode::from(101))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
