// Newline-delimited FIELD:VALUE wire codec (§4.1). Decoding reads lines
// sequentially and splits each on the first ':'; a header that can't be
// parsed this way, or an unrecognized TYPE, is a MalformedMessage.

use std::net::Ipv4Addr;

use memchr::memchr;
use ringkv_base::{err_kind, Error, Kind, Result};
use ringkv_membership::{Peer, Status};

#[cfg(test)]
use test_log::test;

use crate::message::{Body, Message};

fn malformed(msg: impl Into<String>) -> Error {
    err_kind(Kind::MalformedMessage, msg.into())
}

struct LineReader<'a> {
    lines: std::str::Lines<'a>,
}

impl<'a> LineReader<'a> {
    fn new(text: &'a str) -> Self {
        LineReader { lines: text.lines() }
    }

    fn next_field(&mut self) -> Result<(String, String)> {
        let line = self
            .lines
            .next()
            .ok_or_else(|| malformed("unexpected end of message"))?;
        let idx = memchr(b':', line.as_bytes())
            .ok_or_else(|| malformed(format!("missing ':' in line {line:?}")))?;
        let field = line[..idx].trim().to_string();
        let value = line[idx + 1..].trim().to_string();
        Ok((field, value))
    }

    fn expect_field(&mut self, name: &str) -> Result<String> {
        let (field, value) = self.next_field()?;
        if field != name {
            return Err(malformed(format!("expected field {name}, got {field}")));
        }
        Ok(value)
    }
}

pub fn encode(msg: &Message) -> String {
    let mut out = String::new();
    out.push_str(&format!("SOURCE:{}\n", msg.source));
    out.push_str(&format!("DESTINATION:{}\n", msg.destination));
    out.push_str(&format!("TYPE:{}\n", msg.body.type_name()));
    out.push_str(&format!("SOURCE-ID:{}\n", msg.source_id));
    match &msg.network {
        None => out.push_str("NODE-COUNT:-1\n"),
        Some(peers) => {
            out.push_str(&format!("NODE-COUNT:{}\n", peers.len()));
            for p in peers {
                out.push_str(&format!("ID:{}\n", p.id));
                out.push_str(&format!("STATUS:{}\n", p.status.as_wire_str()));
                out.push_str(&format!("ADDRESS:{}\n", p.address));
                out.push_str(&format!("IS-DOWN:{}\n", if p.is_down { 1 } else { 0 }));
                out.push_str(&format!("LAST-UPDATED:{}\n", p.last_updated));
            }
        }
    }
    encode_body(&mut out, &msg.body);
    out
}

fn encode_body(out: &mut String, body: &Body) {
    match body {
        Body::ClientReadRequest { key } => out.push_str(&format!("KEY:{key}\n")),
        Body::ClientReadResponse {
            key,
            value,
            timestamp,
        } => {
            out.push_str(&format!("KEY:{key}\n"));
            out.push_str(&format!("VALUE:{value}\n"));
            out.push_str(&format!("TIMESTAMP:{timestamp}\n"));
        }
        Body::ClientWriteRequest { key, value } => {
            out.push_str(&format!("KEY:{key}\n"));
            out.push_str(&format!("VALUE:{value}\n"));
        }
        Body::ClientWriteResponse { key, value } => {
            out.push_str(&format!("KEY:{key}\n"));
            out.push_str(&format!("VALUE:{value}\n"));
        }
        Body::ClientDeleteRequest { key } => out.push_str(&format!("KEY:{key}\n")),
        Body::KeyRequest { key } => out.push_str(&format!("KEY:{key}\n")),
        Body::KeyAcknowledgement { key, timestamp } => {
            out.push_str(&format!("KEY:{key}\n"));
            out.push_str(&format!("TIMESTAMP:{timestamp}\n"));
        }
        Body::KeyQuery { key } => out.push_str(&format!("KEY:{key}\n")),
        Body::ValueResponse {
            key,
            value,
            timestamp,
        } => {
            out.push_str(&format!("KEY:{key}\n"));
            out.push_str(&format!("VALUE:{value}\n"));
            out.push_str(&format!("TIMESTAMP:{timestamp}\n"));
        }
        Body::WriteRequest { key, value } => {
            out.push_str(&format!("KEY:{key}\n"));
            out.push_str(&format!("VALUE:{value}\n"));
        }
        Body::WriteAcknowledgement { key } => out.push_str(&format!("KEY:{key}\n")),
        Body::DeleteRequest { key } => out.push_str(&format!("KEY:{key}\n")),
        Body::DeleteAcknowledgement { key } => out.push_str(&format!("KEY:{key}\n")),
        Body::Ping => {}
        Body::JoinRequest => {}
        Body::JoinResponse { new_id } => out.push_str(&format!("NEW-ID:{new_id}\n")),
        Body::JoinIntroduction { new_id, hop_count } => {
            out.push_str(&format!("NEW-ID:{new_id}\n"));
            out.push_str(&format!("HOP-COUNT:{hop_count}\n"));
        }
        Body::FailureIndication { reason } => out.push_str(&format!("FAILED:{reason}\n")),
    }
}

pub fn decode(text: &str) -> Result<Message> {
    let mut r = LineReader::new(text);
    let source: Ipv4Addr = r
        .expect_field("SOURCE")?
        .parse()
        .map_err(|_| malformed("bad SOURCE address"))?;
    let destination: Ipv4Addr = r
        .expect_field("DESTINATION")?
        .parse()
        .map_err(|_| malformed("bad DESTINATION address"))?;
    let type_name = r.expect_field("TYPE")?;
    let source_id: i64 = r
        .expect_field("SOURCE-ID")?
        .parse()
        .map_err(|_| malformed("bad SOURCE-ID"))?;
    let node_count: i64 = r
        .expect_field("NODE-COUNT")?
        .parse()
        .map_err(|_| malformed("bad NODE-COUNT"))?;

    let network = if node_count < 0 {
        None
    } else {
        let mut peers = Vec::with_capacity(node_count as usize);
        for _ in 0..node_count {
            let id: i64 = r
                .expect_field("ID")?
                .parse()
                .map_err(|_| malformed("bad ID"))?;
            let status_str = r.expect_field("STATUS")?;
            let status = Status::from_wire_str(&status_str)
                .ok_or_else(|| malformed(format!("bad STATUS {status_str}")))?;
            let address: Ipv4Addr = r
                .expect_field("ADDRESS")?
                .parse()
                .map_err(|_| malformed("bad ADDRESS"))?;
            let is_down = r.expect_field("IS-DOWN")? == "1";
            let last_updated: i64 = r
                .expect_field("LAST-UPDATED")?
                .parse()
                .map_err(|_| malformed("bad LAST-UPDATED"))?;
            peers.push(Peer {
                id,
                address,
                status,
                is_down,
                last_updated,
            });
        }
        Some(peers)
    };

    let body = decode_body(&type_name, &mut r)?;
    Ok(Message {
        source,
        destination,
        source_id,
        network,
        body,
    })
}

fn decode_body(type_name: &str, r: &mut LineReader) -> Result<Body> {
    Ok(match type_name {
        "ClientReadRequest" => Body::ClientReadRequest {
            key: r.expect_field("KEY")?,
        },
        "ClientReadResponse" => {
            let key = r.expect_field("KEY")?;
            let value = r.expect_field("VALUE")?;
            let timestamp = r
                .expect_field("TIMESTAMP")?
                .parse()
                .map_err(|_| malformed("bad TIMESTAMP"))?;
            Body::ClientReadResponse {
                key,
                value,
                timestamp,
            }
        }
        "ClientWriteRequest" => {
            let key = r.expect_field("KEY")?;
            let value = r.expect_field("VALUE")?;
            Body::ClientWriteRequest { key, value }
        }
        "ClientWriteResponse" => {
            let key = r.expect_field("KEY")?;
            let value = r.expect_field("VALUE")?;
            Body::ClientWriteResponse { key, value }
        }
        "ClientDeleteRequest" => Body::ClientDeleteRequest {
            key: r.expect_field("KEY")?,
        },
        "KeyRequest" => Body::KeyRequest {
            key: r.expect_field("KEY")?,
        },
        "KeyAcknowledgement" => {
            let key = r.expect_field("KEY")?;
            let timestamp = r
                .expect_field("TIMESTAMP")?
                .parse()
                .map_err(|_| malformed("bad TIMESTAMP"))?;
            Body::KeyAcknowledgement { key, timestamp }
        }
        "KeyQuery" => Body::KeyQuery {
            key: r.expect_field("KEY")?,
        },
        "ValueResponse" => {
            let key = r.expect_field("KEY")?;
            let value = r.expect_field("VALUE")?;
            let timestamp = r
                .expect_field("TIMESTAMP")?
                .parse()
                .map_err(|_| malformed("bad TIMESTAMP"))?;
            Body::ValueResponse {
                key,
                value,
                timestamp,
            }
        }
        "WriteRequest" => {
            let key = r.expect_field("KEY")?;
            let value = r.expect_field("VALUE")?;
            Body::WriteRequest { key, value }
        }
        "WriteAcknowledgement" => Body::WriteAcknowledgement {
            key: r.expect_field("KEY")?,
        },
        "DeleteRequest" => Body::DeleteRequest {
            key: r.expect_field("KEY")?,
        },
        "DeleteAcknowledgement" => Body::DeleteAcknowledgement {
            key: r.expect_field("KEY")?,
        },
        "Ping" => Body::Ping,
        "JoinRequest" => Body::JoinRequest,
        "JoinResponse" => {
            let new_id = r
                .expect_field("NEW-ID")?
                .parse()
                .map_err(|_| malformed("bad NEW-ID"))?;
            Body::JoinResponse { new_id }
        }
        "JoinIntroduction" => {
            let new_id = r
                .expect_field("NEW-ID")?
                .parse()
                .map_err(|_| malformed("bad NEW-ID"))?;
            let hop_count = r
                .expect_field("HOP-COUNT")?
                .parse()
                .map_err(|_| malformed("bad HOP-COUNT"))?;
            Body::JoinIntroduction { new_id, hop_count }
        }
        "FailureIndication" => Body::FailureIndication {
            reason: r.expect_field("FAILED")?,
        },
        other => return Err(malformed(format!("unknown TYPE {other}"))),
    })
}

#[test]
fn roundtrip_write_request_with_network() {
    let msg = Message {
        source: Ipv4Addr::new(127, 0, 0, 1),
        destination: Ipv4Addr::new(127, 0, 0, 2),
        source_id: 0,
        network: Some(vec![Peer {
            id: 1,
            address: Ipv4Addr::new(127, 0, 0, 3),
            status: Status::Node,
            is_down: true,
            last_updated: 42,
        }]),
        body: Body::WriteRequest {
            key: "A".into(),
            value: "hello".into(),
        },
    };
    let text = encode(&msg);
    let back = decode(&text).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn roundtrip_no_network_info() {
    let msg = Message::new(
        Ipv4Addr::new(127, 0, 0, 1),
        Ipv4Addr::new(127, 0, 0, 2),
        -1,
        Body::Ping,
    );
    let text = encode(&msg);
    assert!(text.contains("NODE-COUNT:-1"));
    let back = decode(&text).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn roundtrip_failure_indication() {
    let msg = Message::new(
        Ipv4Addr::new(127, 0, 0, 1),
        Ipv4Addr::new(127, 0, 0, 2),
        0,
        Body::FailureIndication {
            reason: "Key does not exist".into(),
        },
    );
    let text = encode(&msg);
    let back = decode(&text).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn missing_type_header_is_malformed() {
    let text = "SOURCE:127.0.0.1\nDESTINATION:127.0.0.1\nSOURCE-ID:0\nNODE-COUNT:-1\n";
    let err = decode(text).unwrap_err();
    assert_eq!(err.kind(), Kind::MalformedMessage);
}

#[test]
fn unknown_type_is_malformed() {
    let text = "SOURCE:127.0.0.1\nDESTINATION:127.0.0.1\nTYPE:Bogus\nSOURCE-ID:0\nNODE-COUNT:-1\n";
    let err = decode(text).unwrap_err();
    assert_eq!(err.kind(), Kind::MalformedMessage);
}
