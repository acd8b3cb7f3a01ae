//! HTTP API for the playback engine
//!
//! **Module Structure:**
//! - `server.rs`: router construction and the serve loop
//! - `handlers.rs`: REST endpoints over [`crate::EngineHandle`]
//! - `sse.rs`: engine events as a Server-Sent Events stream

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{create_router, run, AppContext};
