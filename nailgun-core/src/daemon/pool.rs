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

//! The session pool: a bounded set of reusable worker threads, each
//! blocked on the shared job channel when idle. `capacity` is the
//! number of workers the pool tries to keep alive; beyond that, up to
//! `high_water_mark` total workers are allowed to exist at once to
//! absorb a burst. At `give()` time (a worker finishing a session and
//! trying to return to idle), the check is against the *idle* count,
//! not total live workers: a worker is only torn down instead of kept
//! warm once the idle set alone has already reached the high-water
//! mark, regardless of how many other workers are still in-flight.

use std::{
    net::TcpStream,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use tracing::{info, warn};

use crate::{daemon::worker, registry::NailRegistry};

pub struct Pool {
    tx: crossbeam_channel::Sender<TcpStream>,
    rx: crossbeam_channel::Receiver<TcpStream>,
    registry: Arc<dyn NailRegistry>,
    idle: AtomicUsize,
    total: AtomicUsize,
    high_water_mark: usize,
    shutting_down: Arc<AtomicBool>,
}

impl Pool {
    pub fn new(
        capacity: usize,
        high_water_mark: usize,
        registry: Arc<dyn NailRegistry>,
        shutting_down: Arc<AtomicBool>,
    ) -> Arc<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let pool = Arc::new(Pool {
            tx,
            rx,
            registry,
            idle: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            high_water_mark: high_water_mark.max(capacity),
            shutting_down,
        });
        for _ in 0..capacity {
            pool.spawn_worker();
        }
        pool
    }

    fn spawn_worker(self: &Arc<Self>) {
        self.total.fetch_add(1, Ordering::SeqCst);
        self.idle.fetch_add(1, Ordering::SeqCst);

        let pool = Arc::clone(self);
        let rx = self.rx.clone();
        let registry = Arc::clone(&self.registry);
        thread::spawn(move || {
            for conn in rx.iter() {
                pool.idle.fetch_sub(1, Ordering::SeqCst);
                if let Err(e) = worker::serve(conn, Arc::clone(&registry)) {
                    warn!("session worker error: {:?}", e);
                }
                if !pool.return_to_idle() {
                    break;
                }
            }
            pool.total.fetch_sub(1, Ordering::SeqCst);
        });
    }

    fn return_to_idle(&self) -> bool {
        if self.shutting_down.load(Ordering::SeqCst) {
            return false;
        }
        if self.idle.load(Ordering::SeqCst) >= self.high_water_mark {
            return false;
        }
        self.idle.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Hands a connection off to an idle worker, lazily spawning an
    /// overflow worker (up to `high_water_mark`) if none is idle.
    /// Returns the connection back to the caller if the pool is
    /// shutting down or already at its hard maximum.
    pub fn dispatch(self: &Arc<Self>, conn: TcpStream) -> Result<(), TcpStream> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(conn);
        }
        if self.idle.load(Ordering::SeqCst) == 0 {
            if self.total.load(Ordering::SeqCst) >= self.high_water_mark {
                warn!("pool overflow: all {} workers busy, dropping connection", self.high_water_mark);
                return Err(conn);
            }
            self.spawn_worker();
        }
        self.tx.send(conn).map_err(|e| e.into_inner())
    }

    /// Stops handing returning workers back to the idle set. Workers
    /// already serving a session finish normally; the pool just
    /// drains down to zero instead of staying warm.
    pub fn shutdown(&self) {
        info!("pool shutting down, draining in-flight sessions");
        self.shutting_down.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::StaticRegistry;

    #[test]
    fn new_pool_spawns_capacity_idle_workers() {
        let pool = Pool::new(3, 3, Arc::new(StaticRegistry::new()), Arc::new(AtomicBool::new(false)));
        // give the spawned threads a moment to park on recv()
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(pool.idle.load(Ordering::SeqCst), 3);
        assert_eq!(pool.total.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn return_to_idle_checks_idle_count_not_total_live_workers() {
        let pool = Pool::new(0, 2, Arc::new(StaticRegistry::new()), Arc::new(AtomicBool::new(false)));

        // a burst of in-flight sessions pushes total well above the
        // high-water mark, but as long as the idle set itself is
        // below the mark a returning worker should still be kept warm.
        pool.total.store(10, Ordering::SeqCst);
        pool.idle.store(1, Ordering::SeqCst);
        assert!(pool.return_to_idle());
        assert_eq!(pool.idle.load(Ordering::SeqCst), 2);

        // now the idle set alone has reached the high-water mark, so
        // the next returning worker is torn down even though total
        // hasn't changed.
        assert!(!pool.return_to_idle());
        assert_eq!(pool.idle.load(Ordering::SeqCst), 2);
    }
}
