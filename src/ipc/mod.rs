//! Framed Unix-socket IPC between `sdstore` clients and the daemon.
//!
//! Frames are length-delimited bincode; the serialized enum discriminant
//! doubles as the frame kind. [`server`] demultiplexes client requests
//! into scheduler events, [`client`] is the CLI side of the same wire.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::DaemonClient;
pub use server::IpcServer;
