//! Crate root: constructible-point enumeration over a shared work store
//!
//! This crate enumerates **constructible points** — the closure of a seed
//! point set under straightedge-and-compass construction — up to a
//! configured generation depth, sharded across cooperating worker processes
//! that coordinate through a relational store.
//!
//! Two engines sit at the heart of the enumeration:
//!
//! - the **exact-arithmetic geometry kernel** ([`scalar`], [`point`],
//!   [`line`], [`circle`]): arbitrary-precision line/line, circle/line, and
//!   circle/circle intersection plus the ε-tolerant equality the
//!   deduplication rests on;
//! - the **iteration coordinator** ([`scheduler`] over [`store`]): how the
//!   expanding point set is partitioned into tasks, leased to workers,
//!   deduplicated ([`cache`]), and promoted between generations behind a
//!   strict barrier.
//!
//! ## Invariants
//!
//! - One mantissa width and one ε per run, fixed at startup and carried by
//!   a [`scalar::Ctx`]; equality is *never* exact.
//! - Point identity is the canonical fingerprint ([`point::PointKey`]):
//!   zero-snapped, fixed-width decimal renderings of both coordinates. The
//!   store's `(xd, yd)` uniqueness constraint is the ultimate guard against
//!   double-counting.
//! - Generations are separated by a strict barrier: the root worker rolls
//!   a generation over only when every task of the previous one is done.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// High-precision scalar context (mantissa width, ε, fingerprint digits).
pub mod scalar;

/// Points, fingerprints, distance, and intersection results.
pub mod point;

/// Infinite lines and line × line intersection.
pub mod line;

/// Circles and circle × line / circle × circle intersection.
pub mod circle;

/// In-process dedup cache with flush-on-overflow.
pub mod cache;

/// Store records, the storage seam, and the in-memory store.
pub mod store;

/// MySQL-backed store.
pub mod db;

/// Configuration file loading.
pub mod config;

/// Seed-point file reader.
pub mod seed;

/// Combinatorial upper bound on a generation's point count.
pub mod bound;

/// Worker loops, generation rollover, and the expansion driver.
pub mod scheduler;

/// The client id carrying root privileges: only this worker seeds the
/// campaign, promotes known → working, and emits new generations' tasks.
pub const ROOT_CLIENT_ID: i16 = 0;

pub use cache::{Offer, PointCache};
pub use config::Config;
pub use point::{Intersections, Point, PointKey};
pub use scalar::Ctx;
pub use scheduler::{Outcome, RunSettings, Worker};
pub use store::{BatchStatus, MemoryStore, StoreError, Task, WorkStore};
