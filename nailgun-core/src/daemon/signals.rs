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
    sync::{atomic::AtomicBool, Arc},
    thread,
};

use anyhow::Context;
use signal_hook::{consts::TERM_SIGNALS, flag, iterator::Signals};
use tracing::info;

pub struct Handler;

impl Handler {
    pub fn new() -> Self {
        Handler
    }

    /// Spawns the signal handling thread and returns the shared flag
    /// it sets. The first TERM/INT tells the accept loop and pool to
    /// drain: stop accepting new connections, let in-flight sessions
    /// finish on their own. A second signal forces an immediate exit,
    /// the same escape hatch any daemon needs for a client that's
    /// wedged badly enough that graceful shutdown never completes.
    pub fn spawn(self) -> anyhow::Result<Arc<AtomicBool>> {
        info!("spawning signal handler thread");

        let shutting_down = Arc::new(AtomicBool::new(false));
        for sig in TERM_SIGNALS {
            // Second signal: shutting_down is already true, so this
            // terminates immediately with exit code 1.
            flag::register_conditional_shutdown(*sig, 1, Arc::clone(&shutting_down))?;
            // First signal: arms the above by flipping the flag, and
            // is also what the accept loop/pool observe to start
            // draining.
            flag::register(*sig, Arc::clone(&shutting_down))?;
        }

        let mut signals = Signals::new(TERM_SIGNALS).context("creating signal iterator")?;
        thread::spawn(move || {
            for signal in &mut signals {
                assert!(TERM_SIGNALS.contains(&signal));
                info!("received signal {}, draining", signal);
            }
        });

        Ok(shutting_down)
    }
}
