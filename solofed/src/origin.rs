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

//! The public origin of a solofed instance
//!
//! solofed needs to form URLs naming the local actor, its inbox, its collections & the follows it
//! sends. All of them hang off the scheme, host & optional port at which the instance can be
//! reached from the public internet. [url::Origin] would almost do, but it admits opaque origins &
//! arbitrary schemes, neither of which make sense here. This is a narrower type: http or https, a
//! host, and maybe a port.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};
use url::Url;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{text} results in an opaque origin"))]
    OpaqueOrigin { text: String, backtrace: Backtrace },
    #[snafu(display("Failed to parse {text} as an URL: {source}"))]
    OriginUrl {
        text: String,
        source: url::ParseError,
        backtrace: Backtrace,
    },
    #[snafu(display("An origin may not carry a path, query or fragment; got {text}"))]
    Path { text: String, backtrace: Backtrace },
    #[snafu(display("{text} can't be interepreted as a protocol"))]
    Protocol { text: String, backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            protocol                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Protocol {
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "https")]
    Https,
}

impl Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Protocol::Http => "http",
                Protocol::Https => "https",
            }
        )
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            _ => ProtocolSnafu { text: s.to_owned() }.fail(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Origin                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// [solofed] Origin
///
/// Serializes to, and deserializes from, its textual form ("https://social.example:8443") so that
/// it can be written naturally in the configuration file.
///
/// [solofed]: crate
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Origin {
    scheme: Protocol,
    host: url::Host<String>,
    port: Option<u16>,
}

impl Origin {
    pub fn scheme(&self) -> Protocol {
        self.scheme
    }
    pub fn host(&self) -> &url::Host<String> {
        &self.host
    }
    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

impl Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}://{}:{}", self.scheme, self.host, port),
            None => write!(f, "{}://{}", self.scheme, self.host),
        }
    }
}

impl FromStr for Origin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let url = Url::parse(s).context(OriginUrlSnafu { text: s.to_owned() })?;
        // "https://example.com" parses with a path of "/"; anything more is a mistake.
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return PathSnafu { text: s.to_owned() }.fail();
        }
        url.try_into()
    }
}

impl TryFrom<Url> for Origin {
    type Error = Error;

    fn try_from(value: Url) -> Result<Self> {
        match value.origin() {
            url::Origin::Opaque(_) => OpaqueOriginSnafu {
                text: value.as_str().to_owned(),
            }
            .fail(),
            url::Origin::Tuple(scheme, host, _) => Ok(Origin {
                scheme: scheme.parse::<Protocol>()?,
                host,
                // `Url::port()` is None when the port is the scheme's default; that's just what I
                // want for display purposes.
                port: value.port(),
            }),
        }
    }
}

impl TryFrom<String> for Origin {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Origin::from_str(&value)
    }
}

impl From<Origin> for String {
    fn from(value: Origin) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn origin_round_trips_through_text() {
        let origin = "https://social.example".parse::<Origin>().unwrap();
        assert_eq!(origin.scheme(), Protocol::Https);
        assert_eq!(origin.port(), None);
        assert_eq!(origin.to_string(), "https://social.example");

        let origin = "http://localhost:20679".parse::<Origin>().unwrap();
        assert_eq!(origin.port(), Some(20679));
        assert_eq!(origin.to_string(), "http://localhost:20679");
    }

    #[test]
    fn origin_rejects_junk() {
        assert!("ftp://social.example".parse::<Origin>().is_err());
        assert!("https://social.example/users".parse::<Origin>().is_err());
        assert!("not an url".parse::<Origin>().is_err());
    }

    #[test]
    fn origin_deserializes_from_a_string() {
        #[derive(Deserialize)]
        struct Cfg {
            origin: Origin,
        }
        let cfg: Cfg = toml::from_str(r#"origin = "https://social.example:8443""#).unwrap();
        assert_eq!(cfg.origin.to_string(), "https://social.example:8443");
    }
}
