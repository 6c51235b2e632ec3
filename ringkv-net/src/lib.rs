mod codec;
mod message;
mod transport;

pub use codec::{decode, encode};
pub use message::{Body, Message};
pub use transport::{reply_on, send_and_await, Inbound, SendOutcome, Transport};
