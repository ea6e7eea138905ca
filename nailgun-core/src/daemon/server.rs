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

use std::{
    io,
    net::TcpListener,
    sync::{atomic::AtomicBool, atomic::Ordering, Arc},
    time::Duration,
};

use tracing::{error, info, instrument};

use crate::{config, consts, daemon::pool::Pool, registry::NailRegistry};

pub struct Server {
    pool: Arc<Pool>,
    shutting_down: Arc<AtomicBool>,
}

impl Server {
    #[instrument(skip_all)]
    pub fn new(config: config::Manager, registry: Arc<dyn NailRegistry>, shutting_down: Arc<AtomicBool>) -> anyhow::Result<Arc<Self>> {
        let cfg = config.get();
        let capacity = cfg.pool_capacity.unwrap_or(consts::DEFAULT_POOL_CAPACITY);
        let high_water_mark = cfg.pool_high_water_mark.unwrap_or(consts::DEFAULT_POOL_HIGH_WATER_MARK);
        let registry: Arc<dyn NailRegistry> = match cfg.heartbeat_timeout_ms {
            Some(ms) => Arc::new(HeartbeatOverride { inner: registry, timeout: Duration::from_millis(ms) }),
            None => registry,
        };
        let pool = Pool::new(capacity, high_water_mark, registry, Arc::clone(&shutting_down));
        Ok(Arc::new(Server { pool, shutting_down }))
    }

    /// Accepts connections until told to shut down, handing each one
    /// to the pool as soon as it arrives. The listener is polled
    /// non-blockingly so the accept loop notices the shutdown flag
    /// promptly instead of sitting in a blocking `accept` forever.
    #[instrument(skip_all)]
    pub fn serve(server: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        listener.set_nonblocking(true)?;

        loop {
            if server.shutting_down.load(Ordering::SeqCst) {
                info!("shutdown requested, no longer accepting connections");
                server.pool.shutdown();
                return Ok(());
            }

            match listener.accept() {
                Ok((conn, addr)) => {
                    info!("accepted connection from {}", addr);
                    if let Err(conn) = server.pool.dispatch(conn) {
                        drop(conn);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(consts::SOCK_STREAM_TIMEOUT);
                }
                Err(e) => {
                    error!("accepting connection: {:?}", e);
                }
            }
        }
    }
}

/// Wraps an embedder-supplied registry so the config file's
/// `heartbeat_timeout_ms`, if set, takes precedence over whatever the
/// registry itself would have returned.
struct HeartbeatOverride {
    inner: Arc<dyn NailRegistry>,
    timeout: Duration,
}

impl NailRegistry for HeartbeatOverride {
    fn resolve_alias(&self, name: &str) -> Option<nailgun_protocol::NailId> {
        self.inner.resolve_alias(name)
    }

    fn allows_raw_identifiers(&self) -> bool {
        self.inner.allows_raw_identifiers()
    }

    fn default_nail(&self) -> Option<nailgun_protocol::NailId> {
        self.inner.default_nail()
    }

    fn heartbeat_timeout(&self) -> Duration {
        self.timeout
    }

    fn nail_started(&self, id: &nailgun_protocol::NailId) {
        self.inner.nail_started(id)
    }

    fn nail_finished(&self, id: &nailgun_protocol::NailId) {
        self.inner.nail_finished(id)
    }

    fn lookup(&self, id: &nailgun_protocol::NailId) -> Option<crate::nail::Nail> {
        self.inner.lookup(id)
    }
}
