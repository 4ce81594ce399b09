// MIT License - Copyright (c) 2026 Peter Wright
// Byte stream, framing and JSON-RPC session

pub mod direct;
pub mod framer;
pub mod session;

pub use direct::DirectTransport;
pub use framer::{MessageBuffer, find_message_end};
pub use session::RpcSession;
