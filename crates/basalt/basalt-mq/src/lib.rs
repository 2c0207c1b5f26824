//! `basalt-mq`: descriptor-bound shared-memory message queues.
//!
//! This crate provides a lock-free, single-producer / single-reader byte ring
//! mapped over shared memory, for zero-copy message passing between two
//! cooperating processes on one host:
//!
//! - Fixed-width records move FIFO through a ring named by an out-of-band
//!   descriptor
//! - Neither side enters the kernel on the fast path
//! - All operations are non-blocking: they complete or refuse immediately
//!
//! # Core Components
//!
//! - [`QueueDescriptor`]: names the shared-memory regions making up a queue
//! - [`MessageQueue`]: one process's endpoint, typed over the record
//! - [`QueueConfig`]: settings for processes that provision queues
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   read ptr │ write ptr │ data ring   ┌──────────────┐
//! │   writer     │ ─────────── shared memory ─────────► │   reader     │
//! │ (Process A)  │    regions named by a descriptor     │ (Process B)  │
//! └──────────────┘                                      └──────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use basalt_mq::{MessageQueue, provision};
//!
//! // First endpoint (typically in one process)
//! let desc = provision::create("/tmp/queue.bin", 4096, 4)?;
//! let mut writer = MessageQueue::<u32>::bind(desc);
//! writer.write(&42);
//!
//! // Peer endpoint (can be in another process)
//! let mut reader = MessageQueue::<u32>::join(provision::open("/tmp/queue.bin", 4)?);
//! let mut value = 0;
//! if reader.read(&mut value) {
//!     println!("Received: {value}");
//! }
//! ```
//!
//! # Internal Modules
//!
//! - `descriptor`: grantor table, native handle and bind-time validation
//! - `ring`: position arithmetic and the two-run transaction split
//! - `queue`: the endpoint and its acquire/release counter protocol
//! - `config`: TOML settings for provisioning processes
//! - `provision`: descriptor construction over a file-backed object

mod config;
mod descriptor;
mod queue;
mod ring;

pub mod provision;

pub use config::{ConfigError, QueueConfig};
pub use descriptor::{
    COUNTER_EXTENT, DescriptorError, Grantor, MIN_GRANTOR_COUNT, NativeHandle, QueueDescriptor,
    Region,
};
pub use queue::MessageQueue;
