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

use std::time::Duration;

pub use nailgun_protocol::{
    DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_MAX_HEADER_CHUNK, DEFAULT_MAX_STDIN_CHUNK, EXCEPTION_STATUS,
    NO_SUCH_COMMAND_STATUS,
};

/// How long a connection may sit idle before we bother checking for
/// a shutdown request.
pub const SOCK_STREAM_TIMEOUT: Duration = Duration::from_millis(200);

/// Size of the buffer used to batch bytes into chunks on the output
/// side of a session.
pub const OUTPUT_BLOCK_SIZE: usize = 1024 * 64;

/// Default number of idle workers the pool will keep on hand.
pub const DEFAULT_POOL_CAPACITY: usize = 8;

/// Default high-water mark: once more than this many workers exist
/// (idle + in-flight), idle workers returned to the pool are torn down
/// instead of retained.
pub const DEFAULT_POOL_HIGH_WATER_MARK: usize = 32;

/// If set to "true", the daemon will autodaemonize after launch.
pub const AUTODAEMONIZE_VAR: &str = "NAILGUN__INTERNAL__AUTODAEMONIZE";
