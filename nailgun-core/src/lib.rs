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

use std::{fs, io, sync::Arc, sync::Mutex};

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::fmt::format::FmtSpan;

pub mod codec;
mod consts;
pub mod daemon;
pub mod error;
pub mod nail;
pub mod registry;
pub mod router;
pub mod stream;

pub use nail::{Nail, NailContext};
pub use nailgun_protocol::NailId;
pub use registry::{NailRegistry, StaticRegistry};

pub mod config;

/// The command line arguments nailgun expects. Can be parsed directly
/// with clap, or constructed manually if you're embedding the engine
/// behind some other interface.
///
/// NOTE: check `version()` and handle it yourself; clap's automatic
/// version support doesn't play well with a library crate like this
/// one.
#[derive(Parser, Debug)]
#[clap(author, about)]
pub struct Args {
    #[clap(short, long, action, help = "The file to write logs to (defaults to stderr)")]
    pub log_file: Option<String>,

    #[clap(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Show more in logs, may be provided multiple times",
    )]
    pub verbose: u8,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[clap(about = "Print version")]
    Version,

    #[clap(about = "Starts the daemon that holds a pool of session workers")]
    Serve {
        #[clap(
            short,
            long,
            action,
            long_help = "Address to bind the session listener to

Defaults to 127.0.0.1:2113, or the value from the config file if one is
set there and this flag is not provided."
        )]
        bind_addr: Option<String>,

        #[clap(short, long, action, help = "a toml file containing configuration")]
        config_file: Option<String>,
    },
}

impl Args {
    /// Version indicates if the wrapping binary must display the
    /// version then exit.
    pub fn version(&self) -> bool {
        matches!(self.command, Commands::Version)
    }
}

/// Run nailgun with the given arguments. `registry` supplies the
/// nails that `serve` will dispatch to; if `None`, an empty
/// `StaticRegistry` is used (every command will resolve to "no such
/// command").
pub fn run(args: Args, registry: Option<Arc<dyn NailRegistry>>) -> anyhow::Result<()> {
    let trace_level = if args.verbose == 0 {
        tracing::Level::INFO
    } else if args.verbose == 1 {
        tracing::Level::DEBUG
    } else {
        tracing::Level::TRACE
    };
    if let Some(log_file) = args.log_file.clone() {
        let file = fs::File::create(log_file)?;
        tracing_subscriber::fmt()
            .with_max_level(trace_level)
            .with_thread_ids(true)
            .with_target(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(Mutex::new(file))
            .init();
    } else if let Commands::Serve { .. } = args.command {
        tracing_subscriber::fmt()
            .with_max_level(trace_level)
            .with_thread_ids(true)
            .with_target(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(io::stderr)
            .init();
    }

    let res: anyhow::Result<()> = match args.command {
        Commands::Version => return Err(anyhow!("wrapper binary must handle version")),
        Commands::Serve { bind_addr, config_file } => {
            let mut cfg = config::read_config(&config_file)?;
            if let Some(bind_addr) = bind_addr {
                cfg.bind_addr = bind_addr;
            }
            let config_manager = config::Manager::new(cfg);
            let registry = registry.unwrap_or_else(|| Arc::new(StaticRegistry::new()));
            daemon::run(config_manager, registry)
        }
    };

    if let Err(err) = res {
        error!("{:?}", err);
        std::process::exit(1);
    }

    Ok(())
}
