//! Upper-bound calculator
//!
//! Prints the comma-separated sequence of per-generation point-count
//! ceilings starting from a given set size: a set of `n` points yields
//! `b = 3n(n−1)/2` objects and at most `b(b−1)` intersection points.
//!
//! Usage: `upper_bound <start_count> <generations>`

#![forbid(unsafe_code)]

use std::env;

use anyhow::{bail, Context as _};
use rug::Integer;

use constructible::bound;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let (start, generations) = match (args.get(1), args.get(2)) {
        (Some(start), Some(generations)) => (start, generations),
        _ => bail!("usage: upper_bound <start_count> <generations>"),
    };

    let start: Integer = start
        .parse()
        .ok()
        .with_context(|| format!("start_count must be an integer, got `{start}`"))?;
    let generations: usize = generations
        .parse()
        .with_context(|| format!("generations must be a count, got `{generations}`"))?;

    let sequence = bound::bound_sequence(start, generations);
    let rendered: Vec<String> = sequence.iter().map(Integer::to_string).collect();
    println!("{}", rendered.join(","));

    Ok(())
}
