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

//! HTTP utilities shared between the public & private listeners

use axum::{
    http::{header::CONTENT_TYPE, HeaderValue},
    Json,
};
use serde::{Deserialize, Serialize};

/// A serializable struct for use in HTTP error responses
///
/// This is intended to be used in the [IntoResponse] implementations for whatever error type
/// an axum handler is using, so that every error solofed returns carries a JSON body of the same
/// shape.
///
/// [IntoResponse]: https://docs.rs/axum/latest/axum/response/trait.IntoResponse.html
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponseBody {
    pub error: String,
}

impl axum::response::IntoResponse for ErrorResponseBody {
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

/// The media type for ActivityPub documents
pub const ACTIVITY_JSON: &str = "application/activity+json";

/// Replace the Content-Type on `rsp` with "application/activity+json"
pub fn patch_content_type(mut rsp: axum::response::Response) -> axum::response::Response {
    rsp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(ACTIVITY_JSON));
    rsp
}
