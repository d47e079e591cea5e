// Copyright 2022 Ryan Seipp
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

#![deny(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(test(attr(deny(warnings))))]

//! A single-threaded, readiness-based reactor that multiplexes listeners,
//! outbound clients, accepted peers, and externally-owned descriptors
//! across four wire protocols: raw TCP byte streams, a length-prefixed
//! JSON-framed packet protocol, HTTP/1.1, and WebSocket.
//!
//! The [`service::Api`] façade is the single entry point: it owns the
//! [`reactor::Reactor`], the per-connection [`connection::ConnectionRecord`]
//! table, and translates OS-level readiness into the role/protocol-aware
//! events described in `callback::Reason`. A caller drives the whole thing
//! by registering [`endpoint::Endpoint`]s and calling
//! [`service::Api::service`] in a loop.
//!
//! ## Example
//!
//! ```no_run
//! use xapi::{
//!     callback::{Ctx, Disposition, Reason},
//!     endpoint::{Endpoint, Protocol},
//!     service::Api,
//! };
//!
//! let mut api = Api::new(Box::new(|_api: &mut Api, ctx: Ctx| -> Disposition {
//!     match ctx.reason {
//!         Reason::Closed => Disposition::Continue,
//!         _ => Disposition::Continue,
//!     }
//! }))
//! .expect("reactor init");
//!
//! api.listen(Endpoint::server("127.0.0.1", 6969, Protocol::Http))
//!     .expect("listen");
//!
//! loop {
//!     if api.service(Some(1000)).is_err() {
//!         break;
//!     }
//! #   break;
//! }
//! ```

pub mod buffer;
pub mod callback;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod net;
pub mod packet;
pub mod reactor;
pub mod service;
pub mod ws;

pub use error::{Error, Result};
