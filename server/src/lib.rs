//! # Chat Server Library
//!
//! Server side of the NUL-framed TCP chat: it accepts an arbitrary number of
//! long-lived connections, decodes their messages, and rebroadcasts every
//! message to all connected clients (sender included). The chat semantics
//! are trivial on purpose; the substance is the connection core, which this
//! crate implements twice behind one scheduling seam.
//!
//! ## Concurrency Strategies
//!
//! ### Thread Pool (`hardware`)
//! One dedicated reader task per connection, with the pool bounded by the
//! machine's hardware parallelism. Simple ownership story: each reader is
//! the sole driver of its socket, and the acceptor reaps finished readers
//! before taking new connections. Connection count is capped by the pool
//! bound; clients beyond it are dropped at accept.
//!
//! ### Sharded Poll (`async`)
//! A fixed set of workers, each owning a shard of up to 32 connections that
//! it polls for readability on a 50ms cadence. Thread count is decoupled
//! from connection count. Shard membership is guarded per shard, and the
//! cross-shard fan-out is serialized by a broadcast-wide lock.
//!
//! Both strategies share the framing reader, the broadcast router, and the
//! error taxonomy: transient readiness misses are retried, per-connection
//! faults tear down that one connection, and only listener-level faults end
//! the server.
//!
//! ## Module Organization
//!
//! - [`connection`]: one accepted socket, its lifecycle status, chunked
//!   non-blocking reads and frame writes.
//! - [`broadcast`]: sender-tagged line formatting and the fan-out itself.
//! - [`scheduler`]: the [`scheduler::ConnectionScheduler`] seam plus the
//!   backoff constants both strategies observe.
//! - [`thread_pool`] / [`sharded`]: the two scheduling policies.

pub mod broadcast;
pub mod connection;
pub mod scheduler;
pub mod sharded;
pub mod thread_pool;
pub mod utils;
