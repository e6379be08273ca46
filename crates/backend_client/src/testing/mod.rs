//! In-process stand-ins for candidate backends.

mod memory;
mod server;

pub use memory::{
    Faults,
    InMemoryBackend,
    Isolation,
};
pub use server::{
    serve,
    TestServer,
};
