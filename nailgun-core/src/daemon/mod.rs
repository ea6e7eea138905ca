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

use std::{env, net::TcpListener, sync::Arc};

use anyhow::Context;
use tracing::{info, instrument};

use crate::{config, consts, registry::NailRegistry};

mod pool;
mod server;
mod signals;
mod worker;

#[instrument(skip_all)]
pub fn run(config_manager: config::Manager, registry: Arc<dyn NailRegistry>) -> anyhow::Result<()> {
    if let Ok(daemonize) = env::var(consts::AUTODAEMONIZE_VAR) {
        if daemonize == "true" {
            env::remove_var(consts::AUTODAEMONIZE_VAR); // avoid looping
            info!("autodaemonizing");
            daemonize::Daemonize::new().start().context("daemonizing")?;
        }
    }

    info!("\n\n======================== STARTING DAEMON ============================\n\n");

    let bind_addr = config_manager.get().bind_addr;
    let listener = TcpListener::bind(&bind_addr).with_context(|| format!("binding to {bind_addr}"))?;
    info!("listening on {}", bind_addr);

    let shutting_down = signals::Handler::new().spawn()?;
    let server = server::Server::new(config_manager, registry, shutting_down)?;

    server::Server::serve(server, listener)
}
