// Blocking transport (§5): one TCP connection per message. The sender
// connects, writes the encoded message, shuts down its write half to signal
// EOF, and reads back at most one reply on the same connection before
// closing it. The listener side mirrors this: accept, read to EOF, decode,
// hand the message to the caller.
//
// Every failure mode below (connect refused, timed out, peer went away
// mid-read, garbled reply) collapses to SendOutcome::TimedOut rather than a
// hard Err -- the dispatch loop treats an unreachable peer exactly like a
// slow one (§4.3), and only a successfully-received-but-unparseable message
// is a genuine MalformedMessage error.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, Shutdown, TcpListener, TcpStream};
use std::time::Duration;

use ringkv_base::{err_kind, Kind, Result};
use tracing::{debug, warn};

use crate::codec;
use crate::message::Message;

pub enum Inbound {
    /// A decoded request plus the still-open connection it arrived on, so
    /// the caller can write a reply back on the same socket.
    Message(Message, TcpStream),
    Timeout,
}

#[derive(Debug)]
pub enum SendOutcome {
    Reply(Message),
    NoReply,
    TimedOut,
}

pub struct Transport {
    listener: TcpListener,
}

impl Transport {
    pub fn bind(address: Ipv4Addr, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((address, port))
            .map_err(|e| err_kind(Kind::Other, format!("bind {address}:{port}: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| err_kind(Kind::Other, e.to_string()))?;
        Ok(Transport { listener })
    }

    /// Poll for one inbound connection, blocking up to `timeout` by sleeping
    /// between non-blocking accept attempts. Returns `Inbound::Timeout` if
    /// nothing arrived, and folds a connection that failed mid-read into
    /// `Inbound::Timeout` too -- the caller can't distinguish "nobody called"
    /// from "somebody called and gave up".
    pub fn listen_once(&self, timeout: Duration) -> Result<Inbound> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    debug!(%peer_addr, "accepted connection");
                    return read_message(stream, timeout);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if std::time::Instant::now() >= deadline {
                        return Ok(Inbound::Timeout);
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => return Err(err_kind(Kind::Other, format!("accept: {e}"))),
            }
        }
    }
}

fn read_message(mut stream: TcpStream, timeout: Duration) -> Result<Inbound> {
    if stream.set_nonblocking(false).is_err() {
        return Ok(Inbound::Timeout);
    }
    if stream.set_read_timeout(Some(timeout)).is_err() {
        return Ok(Inbound::Timeout);
    }
    let mut text = String::new();
    if stream.read_to_string(&mut text).is_err() {
        return Ok(Inbound::Timeout);
    }
    if text.is_empty() {
        return Ok(Inbound::Timeout);
    }
    codec::decode(&text).map(|m| Inbound::Message(m, stream))
}

/// Connect to `address:port`, send `msg`, and wait up to `timeout` for a
/// single reply on the same connection.
pub fn send_and_await(
    address: Ipv4Addr,
    port: u16,
    msg: &Message,
    timeout: Duration,
) -> Result<SendOutcome> {
    let mut stream = match TcpStream::connect_timeout(&(address, port).into(), timeout) {
        Ok(s) => s,
        Err(e) => {
            warn!(%address, port, %e, "connect failed");
            return Ok(SendOutcome::TimedOut);
        }
    };
    if stream.set_read_timeout(Some(timeout)).is_err() || stream.set_write_timeout(Some(timeout)).is_err() {
        return Ok(SendOutcome::TimedOut);
    }

    let text = codec::encode(msg);
    if stream.write_all(text.as_bytes()).is_err() {
        return Ok(SendOutcome::TimedOut);
    }
    if stream.shutdown(Shutdown::Write).is_err() {
        return Ok(SendOutcome::TimedOut);
    }

    let mut reply = String::new();
    match stream.read_to_string(&mut reply) {
        Ok(0) => Ok(SendOutcome::NoReply),
        Ok(_) => match codec::decode(&reply) {
            Ok(m) => Ok(SendOutcome::Reply(m)),
            Err(e) if e.kind() == Kind::MalformedMessage => Err(e),
            Err(_) => Ok(SendOutcome::TimedOut),
        },
        Err(_) => Ok(SendOutcome::TimedOut),
    }
}

/// Write a reply on an already-accepted connection. Used by the listener
/// side right after `listen_once` hands back a request.
pub fn reply_on(mut stream: TcpStream, msg: &Message) -> Result<()> {
    let text = codec::encode(msg);
    stream
        .write_all(text.as_bytes())
        .map_err(|e| err_kind(Kind::Other, e.to_string()))?;
    stream
        .shutdown(Shutdown::Write)
        .map_err(|e| err_kind(Kind::Other, e.to_string()))
}
