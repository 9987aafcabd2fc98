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

use std::{env, fs, sync::Arc};

use libtest_mimic::Failed;
use serde::Deserialize;
use snafu::{prelude::*, IntoError};
use tap::Pipe;
use tokio::runtime::Runtime;

use solofed::{
    dynamodb::{Credentials, Location},
    storage::Backend,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to parse {pth}: {source}"))]
    De {
        pth: String,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to read SOLOFED_TEST_CONFIG: {source}"))]
    Env { source: std::env::VarError },
    #[snafu(display("Failed to read {pth}: {source}"))]
    Read { pth: String, source: std::io::Error },
}

type Result<T> = std::result::Result<T, Error>;

/// Where to find the DynamoDB instance to test against
#[derive(Clone, Debug, Deserialize)]
pub struct DynamoConfig {
    pub location: Location,
    pub credentials: Option<Credentials>,
    /// Create the solofed tables before running any tests
    #[serde(rename = "create-tables", default)]
    pub create_tables: bool,
}

/// Common test configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    pub logging: bool,
    pub log_level: String,
    /// If absent, the DynamoDB fixture is skipped
    pub dynamo: Option<DynamoConfig>,
}

impl Configuration {
    /// Obtain a [Configuration]
    ///
    /// Check the `SOLOFED_TEST_CONFIG` environment variable; if defined, attempt to parse a
    /// [Configuration] from the file named therein; else return a default instance.
    pub fn new() -> Result<Configuration> {
        match env::var("SOLOFED_TEST_CONFIG") {
            Ok(f) => fs::read_to_string(&f)
                .context(ReadSnafu { pth: f.clone() })?
                .pipe(|s| toml::from_str::<Configuration>(&s))
                .context(DeSnafu { pth: f.clone() }),
            Err(env::VarError::NotPresent) => Ok(Configuration::default()),
            Err(err) => Err(EnvSnafu.into_error(err)),
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            logging: false,
            log_level: "info".to_owned(),
            dynamo: None,
        }
    }
}

#[derive(Debug)]
pub struct Test {
    pub name: &'static str,
    pub test_fn:
        fn(Arc<Runtime>, Arc<dyn Backend + Send + Sync>) -> std::result::Result<(), Failed>,
}

inventory::collect!(Test);
