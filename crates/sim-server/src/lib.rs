//! Network front end and scheduler for tickit device simulations.
//!
//! - [`runner`] - update loop standing in for the simulation host
//! - [`rest`] - SIMPLON REST routing for the Eiger
//! - [`http`] - hyper server around the REST adapter
//! - [`push`] - stream push adapters and transports
//! - [`component`] - launches a complete Eiger simulation

pub mod component;
pub mod http;
pub mod push;
pub mod rest;
pub mod runner;

pub use component::{EigerComponent, EigerComponentConfig};
pub use http::{HttpServerHandle, start_http_server};
pub use push::{Batch, DEFAULT_HIGH_WATER_MARK, ChannelTransport, PushTransport, StreamPushAdapter, TcpPushServer, read_batch};
pub use rest::{EigerRestAdapter, RestReply};
pub use runner::{AfterUpdate, DeviceRunner, InputHandle, Interrupt, RunnerHandle, SharedDevice};
