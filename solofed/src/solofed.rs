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

use std::sync::Arc;

use opentelemetry_prometheus_text_exporter::PrometheusExporter;

use crate::{delivery::Sender, entities::LocalUser, follows::FollowManager, metrics::Instruments};

/// Application state available to all handlers
pub struct Solofed {
    /// The local user, resolved once at startup
    pub user: LocalUser,
    pub follows: FollowManager,
    /// Where outbound activities go
    pub sender: Arc<dyn Sender + Send + Sync>,
    pub exporter: PrometheusExporter,
    pub instruments: Arc<Instruments>,
}
