//! Parley wire format — the line protocol and the discovery datagram.
//!
//! Everything on the wire is UTF-8 text. TCP links carry
//! newline-delimited lines; discovery carries single UDP datagrams.
//! There is no escaping and no length framing: a payload that itself
//! contains a newline byte is delivered as multiple lines on the far
//! side. That is a property of the format. Do not special-case it.

// ── Protocol constants ───────────────────────────────────────────────────────

/// IPv4 multicast group for peer announcements.
pub const MULTICAST_GROUP: &str = "230.0.0.1";

/// UDP port for peer announcements.
pub const DISCOVERY_PORT: u16 = 4446;

/// Maximum discovery datagram size in bytes.
pub const MAX_DATAGRAM: usize = 512;

/// Seconds between announcement datagrams.
pub const ANNOUNCE_INTERVAL_SECS: u64 = 3;

/// Seconds an outbound dial may spend connecting before it fails.
pub const DIAL_TIMEOUT_SECS: u64 = 3;

// ── TCP line frames ──────────────────────────────────────────────────────────

/// One decoded line from a TCP link.
///
/// Decoding never fails: a line that matches neither prefix is carried
/// verbatim as [`Frame::Raw`] and displayed as-is, attributed to the
/// sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `HELLO <name>` — the sender's display name. The name is the
    /// remainder of the line after the first space; it may contain
    /// further spaces and may be empty.
    Hello(String),
    /// `MSG <text>` — a chat payload. Everything after the 4-byte
    /// prefix, spaces included; may be empty.
    Msg(String),
    /// Anything else, passed through untouched.
    Raw(String),
}

impl Frame {
    /// Classify one line. The caller strips the trailing newline.
    pub fn decode(line: &str) -> Frame {
        if let Some(name) = line.strip_prefix("HELLO ") {
            Frame::Hello(name.to_string())
        } else if let Some(text) = line.strip_prefix("MSG ") {
            Frame::Msg(text.to_string())
        } else {
            Frame::Raw(line.to_string())
        }
    }

    /// Produce the wire line, without the trailing newline.
    pub fn encode(&self) -> String {
        match self {
            Frame::Hello(name) => format!("HELLO {name}"),
            Frame::Msg(text) => format!("MSG {text}"),
            Frame::Raw(line) => line.clone(),
        }
    }
}

// ── Discovery datagram ───────────────────────────────────────────────────────

/// A parsed `DISCOVER <name> <tcpPort>` announcement.
///
/// The datagram is whitespace-tokenized and must carry exactly three
/// tokens with a numeric port. Anything else parses to `None` and is
/// dropped by the listener — discovery is best-effort and a malformed
/// announcement from a peer must never become an error here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announce {
    pub name: String,
    pub tcp_port: u16,
}

impl Announce {
    pub fn new(name: impl Into<String>, tcp_port: u16) -> Self {
        Self {
            name: name.into(),
            tcp_port,
        }
    }

    /// Parse a received datagram payload.
    pub fn parse(payload: &str) -> Option<Announce> {
        let mut tokens = payload.split_whitespace();
        if tokens.next() != Some("DISCOVER") {
            return None;
        }
        let name = tokens.next()?;
        let port: u16 = tokens.next()?.parse().ok()?;
        if tokens.next().is_some() {
            return None;
        }
        Some(Announce {
            name: name.to_string(),
            tcp_port: port,
        })
    }

    /// Produce the datagram payload.
    pub fn encode(&self) -> String {
        format!("DISCOVER {} {}", self.name, self.tcp_port)
    }
}

/// Canonical `host:port` key used to deduplicate dial attempts.
pub fn endpoint_key(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

/// Endpoint key for a resolved socket address.
pub fn endpoint_key_of(addr: &std::net::SocketAddr) -> String {
    endpoint_key(&addr.ip().to_string(), addr.port())
}

// ── Tests ────────────────────────────────────────────────────────────────────
