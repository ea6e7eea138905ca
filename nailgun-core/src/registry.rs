// Copyright 2024 Nailgun contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The nail registry is the embedding interface between the session
//! engine and whatever maps a command name to a handler. The engine
//! treats it as an opaque external collaborator; this module also
//! ships a minimal in-memory implementation so the crate is runnable
//! end to end.

use std::{collections::HashMap, time::Duration};

use nailgun_protocol::{NailId, DEFAULT_HEARTBEAT_TIMEOUT};

use crate::nail::Nail;

/// Callbacks and lookups the session engine needs from whatever is
/// providing nails. Implementations must be `Send + Sync`: nail
/// resolution and the start/finish hooks are invoked from worker
/// threads running concurrently.
///
/// `nail_started`/`nail_finished` are invoked inline on the worker
/// thread serving the session, so implementations MUST NOT block for
/// extended periods. If you need to do slow work in response to these
/// hooks, hand it off to a background thread.
pub trait NailRegistry: Send + Sync {
    /// Resolve a short alias (the raw command name a client sent) to a
    /// fully qualified nail identifier, if one is registered under
    /// that alias.
    fn resolve_alias(&self, name: &str) -> Option<NailId>;

    /// Whether a command name that isn't a registered alias may be
    /// used directly as a `NailId` if a nail happens to be registered
    /// under that exact identifier.
    fn allows_raw_identifiers(&self) -> bool {
        true
    }

    /// The nail to dispatch to when a client sends an empty command.
    fn default_nail(&self) -> Option<NailId> {
        None
    }

    /// How long a session may go without client activity before it is
    /// treated as disconnected.
    fn heartbeat_timeout(&self) -> Duration {
        DEFAULT_HEARTBEAT_TIMEOUT
    }

    /// Called just before a resolved nail is invoked.
    fn nail_started(&self, _id: &NailId) {}

    /// Called after a resolved nail returns, panics, or raises an
    /// exit signal.
    fn nail_finished(&self, _id: &NailId) {}

    /// Look up the handler registered under a fully qualified nail
    /// identifier.
    fn lookup(&self, id: &NailId) -> Option<Nail>;
}

/// A simple, fixed-at-construction-time registry: an alias table plus
/// a map of identifier to handler. Good enough for the CLI binary;
/// anything dynamic (hot reload, RPC-backed registries, ...) is left
/// to embedders.
#[derive(Default)]
pub struct StaticRegistry {
    aliases: HashMap<String, NailId>,
    nails: HashMap<NailId, Nail>,
    default: Option<NailId>,
    allow_raw: bool,
    heartbeat_timeout: Duration,
}

impl StaticRegistry {
    pub fn new() -> Self {
        StaticRegistry {
            aliases: HashMap::new(),
            nails: HashMap::new(),
            default: None,
            allow_raw: true,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
        }
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_allow_raw_identifiers(mut self, allow: bool) -> Self {
        self.allow_raw = allow;
        self
    }

    pub fn with_default_nail(mut self, id: Option<NailId>) -> Self {
        self.default = id;
        self
    }

    /// Register a nail under its canonical identifier.
    pub fn register(&mut self, id: impl Into<NailId>, nail: Nail) -> &mut Self {
        self.nails.insert(id.into(), nail);
        self
    }

    /// Register an additional short alias for an already-registered
    /// (or yet-to-be-registered) identifier.
    pub fn alias(&mut self, alias: impl Into<String>, id: impl Into<NailId>) -> &mut Self {
        self.aliases.insert(alias.into(), id.into());
        self
    }
}

impl NailRegistry for StaticRegistry {
    fn resolve_alias(&self, name: &str) -> Option<NailId> {
        self.aliases.get(name).cloned()
    }

    fn allows_raw_identifiers(&self) -> bool {
        self.allow_raw
    }

    fn default_nail(&self) -> Option<NailId> {
        self.default.clone()
    }

    fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    fn lookup(&self, id: &NailId) -> Option<Nail> {
        self.nails.get(id).cloned()
    }
}
