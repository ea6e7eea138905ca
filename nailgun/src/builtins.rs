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

//! A handful of demonstration nails, registered under short aliases,
//! so the daemon is runnable end to end without an embedder supplying
//! its own registry.

#[allow(unused_imports)] // trait methods resolve on the `dyn Read`/`dyn Write` fields without this, kept for clarity
use std::io::{Read, Write};

use nailgun_core::{nail::NailContext, registry::StaticRegistry, router, Nail};

/// `echo`: writes its arguments, space separated, to the routed
/// stdout. Exercises the `Static` handler shape and the thread-local
/// stdio router.
fn echo(args: Vec<String>) -> i32 {
    let mut line = args.join(" ");
    line.push('\n');
    let _ = router::write_stdout(line.as_bytes());
    0
}

/// `boom`: panics unconditionally, so a client can see a misbehaving
/// nail turn into an ordinary exception status instead of taking the
/// daemon down with it.
fn boom(_args: Vec<String>) -> i32 {
    panic!("boom nail always panics");
}

/// `env`: writes the session's environment (sorted, for determinism)
/// and working directory to stdout. Exercises the `Contextual` shape.
fn env(ctx: &mut NailContext) -> anyhow::Result<i32> {
    let mut pairs: Vec<_> = ctx.env.iter().collect();
    pairs.sort();
    for (k, v) in pairs {
        writeln!(ctx.stdout, "{k}={v}")?;
    }
    if let Some(cwd) = &ctx.cwd {
        writeln!(ctx.stdout, "cwd={}", cwd.display())?;
    }
    Ok(0)
}

/// `cat`: reads stdin to EOF and writes it back out to stdout.
/// Exercises the client's stdin-then-EOF path.
fn cat(ctx: &mut NailContext) -> anyhow::Result<i32> {
    let mut buf = Vec::new();
    ctx.stdin.read_to_end(&mut buf)?;
    ctx.stdout.write_all(&buf)?;
    Ok(0)
}

/// `exit-with`: calls `ctx.exit` with the status given as its first
/// argument, to exercise the exit sentinel over the wire. Defaults to
/// 0 if no argument, or the argument doesn't parse as an integer.
fn exit_with(ctx: &mut NailContext) -> anyhow::Result<i32> {
    let status = ctx.args.first().and_then(|s| s.parse().ok()).unwrap_or(0);
    ctx.exit(status)
}

pub fn registry() -> StaticRegistry {
    let mut reg = StaticRegistry::new();
    reg.register("tools.Echo", Nail::Static(echo));
    reg.register("tools.Boom", Nail::Static(boom));
    reg.register("tools.Env", Nail::Contextual(env));
    reg.register("tools.Cat", Nail::Contextual(cat));
    reg.register("tools.ExitWith", Nail::Contextual(exit_with));

    reg.alias("echo", "tools.Echo");
    reg.alias("boom", "tools.Boom");
    reg.alias("env", "tools.Env");
    reg.alias("cat", "tools.Cat");
    reg.alias("exit-with", "tools.ExitWith");

    reg
}
