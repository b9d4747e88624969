// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire protocol for the trigger workflow host.
//!
//! This crate provides the transport-facing half of the host:
//!
//! - **Envelope**: the JSON frame format (correlated requests/responses)
//! - **Channel**: a framed duplex channel abstraction with a WebSocket
//!   implementation (bearer auth, ping heartbeat, close surfacing)
//! - **Connection**: session semantics over a dialer — a stable session id
//!   across reconnects and the user-close/involuntary-close distinction
//! - **RPC**: schema-validated bidirectional request/response correlation
//!   with per-method typed payloads
//! - **Methods**: the two directional method catalogues
//! - **Testing**: an in-memory channel pair and scripted dialer
//!
//! The host crate builds the run executor and context API on top of this.

pub mod channel;
pub mod connection;
pub mod envelope;
pub mod methods;
pub mod rpc;
pub mod testing;

pub use channel::{ChannelError, ChannelEvent, ChannelHandle, Dial, WsDialer};
pub use connection::HostConnection;
pub use envelope::{Envelope, FrameError};
pub use rpc::{CloseInfo, DEFAULT_RPC_TIMEOUT_MS, Rpc, RpcError};
