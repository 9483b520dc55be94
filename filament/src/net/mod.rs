//! Non-blocking networking.
//!
//! These types suspend the calling fiber instead of its thread and should
//! be used instead of `std::net` sockets inside fibers.

mod tcp;

pub use tcp::listener::TcpListener;
pub use tcp::stream::{ReadHalf, TcpStream, WriteHalf};
