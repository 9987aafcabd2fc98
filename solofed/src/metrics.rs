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

//! # solofed metrics
//!
//! solofed counts things with [OpenTelemetry] counters. OTel asks that instruments be built once &
//! re-used, which raises the question of where to keep them. This module answers it: each site that
//! counts something registers the metric's name with [inventory]:
//!
//! [OpenTelemetry]: https://docs.rs/opentelemetry/latest/opentelemetry/index.html
//!
//! ```ignore
//! inventory::submit!(metrics::Registration::new("inbox.follows"));
//! // ...
//! metrics::counter_add!(state.instruments, "inbox.follows", 1, &[]);
//! ```
//!
//! and a single [Instruments] instance, built at startup & shared through the application state,
//! pre-builds a counter for every registered name. Two registrations of the same name are a logic
//! error & will panic at startup, as will counting against a name that was never registered.

use std::collections::{hash_map::Entry, HashMap, HashSet};

use opentelemetry::{global, metrics::Counter, KeyValue};

/// The type of thing being inventoried
///
/// Register a counter by name using
///
/// ```ignore
/// inventory::submit!{metrics::Registration::new("delivery.successes")}
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Registration {
    name: &'static str,
}

impl Registration {
    pub const fn new(name: &'static str) -> Registration {
        Registration { name }
    }
    pub fn name(&self) -> &'static str {
        self.name
    }
}

inventory::collect!(Registration);

/// Return the name of the first metric registered twice, if any
pub fn check_metric_registrations() -> Option<&'static str> {
    let mut names: HashSet<&'static str> = HashSet::new();
    IntoIterator::into_iter(inventory::iter::<Registration>)
        .find(|reg| !names.insert(reg.name()))
        .map(|reg| reg.name())
}

/// Container for OTel instruments
pub struct Instruments {
    map: HashMap<&'static str, Counter<u64>>,
}

impl Instruments {
    pub fn new(prefix: &'static str) -> Instruments {
        let meter = global::meter(prefix);
        let mut map = HashMap::new();
        IntoIterator::into_iter(inventory::iter::<Registration>).for_each(|reg| {
            match map.entry(reg.name()) {
                Entry::Occupied(_) => panic!("The metric name {} was used twice", reg.name()),
                Entry::Vacant(vacant_entry) => {
                    vacant_entry.insert(meter.u64_counter(reg.name()).build());
                }
            }
        });
        Instruments { map }
    }
    /// The names of all registered counters, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = self.map.keys().copied().collect::<Vec<&'static str>>();
        names.sort();
        names
    }
    // panics if `name` doesn't name a counter
    pub fn add(&self, name: &str, count: u64, attributes: &[KeyValue]) {
        match self.map.get(name) {
            Some(counter) => counter.add(count, attributes),
            None => panic!("{} does not name a counter", name),
        }
    }
}

impl std::fmt::Debug for Instruments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instruments")
            .field("counters", &self.names())
            .finish()
    }
}

#[macro_export]
macro_rules! counter_add {
    ($instr:expr, $name:expr, $count:expr, $attrs:expr) => {
        $instr.add($name, $count, $attrs);
    };
}
