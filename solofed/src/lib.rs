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

//! # solofed
//!
//! The follow-relationship core of a single-user ActivityPub server. Inbound activities are
//! normalized by [inbox], applied to the follow graph by [follows] (which keeps its state in a
//! [storage::Backend]), and any replies built by [emitter] are handed to [delivery].
pub mod actor;
pub mod admin;
#[path = "ap-entities.rs"]
pub mod ap_entities;
pub mod delivery;
pub mod dynamodb;
pub mod emitter;
pub mod entities;
pub mod follows;
pub mod http;
pub mod inbox;
pub mod memory;
pub mod metrics;
pub mod origin;
pub mod solofed;
pub mod storage;
