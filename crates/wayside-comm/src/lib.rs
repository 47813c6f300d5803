// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # wayside-comm
//!
//! Concrete [`Messenger`](wayside_core::Messenger) implementations:
//!
//! - [`TcpMessenger`]: TCP sockets via `tokio::net`
//! - [`SerialMessenger`]: serial ports via `tokio-serial`
//! - [`ModemMessenger`]: dial-up lines checked out of a shared [`ModemPool`]
//!
//! [`MessengerFactory`] turns a link URI into the right messenger.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod factory;
pub mod modem;
pub mod serial;
pub mod stream;
pub mod tcp;

pub use factory::{LinkUri, MessengerFactory, UriError};
pub use modem::{LineConnector, ModemLease, ModemMessenger, ModemPool, ModemSpec, SerialLineConnector};
pub use serial::{DataBits, Parity, SerialMessenger, SerialSettings, StopBits};
pub use stream::IoStream;
pub use tcp::{TcpMessenger, TcpSettings};
