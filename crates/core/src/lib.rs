//! Domain logic for probabilistic micropayment channels.
//!
//! This crate is deliberately synchronous and free of runtime dependencies:
//! it holds the commitment hash-chain math, the ticket model and win check,
//! the channel state machine, and the key-value persistence contract that
//! the async node components build on.

pub mod channel;
pub mod commitment;
pub mod error;
pub mod hash;
pub mod keys;
pub mod kv;
pub mod ticket;
pub mod types;
pub mod validator;

pub use channel::{Channel, ChannelStatus};
pub use commitment::{ChainStep, GeneratedChain, CHECKPOINT_STRIDE, TOTAL_ITERATIONS};
pub use error::CoreError;
pub use hash::keccak256;
pub use kv::{KvError, KvStore, MemoryKv, WriteBatch};
pub use ticket::{AcknowledgedTicket, Ticket, WIN_PROB_ALWAYS, WIN_PROB_NEVER};
pub use types::{channel_id, Address, Balance, ChannelId, Hash32};
pub use validator::{check_acknowledged_ticket, is_winning, RejectReason};
