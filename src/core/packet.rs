//! Normalized packet view
//!
//! The handoff type between the decoder and the detectors. Everything
//! downstream of the decoder consumes `PacketView` only; no component other
//! than `core::parser` is allowed to interpret wire formats.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Transport protocol of a decoded packet.
///
/// `Dns` replaces `Udp` when the UDP body parses as a DNS message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Dns,
    Other,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Icmp => write!(f, "ICMP"),
            Protocol::Dns => write!(f, "DNS"),
            Protocol::Other => write!(f, "OTHER"),
        }
    }
}

/// TCP flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
    pub ece: bool,
    pub cwr: bool,
}

impl TcpFlags {
    pub fn from_u8(flags: u8) -> Self {
        Self {
            fin: flags & 0x01 != 0,
            syn: flags & 0x02 != 0,
            rst: flags & 0x04 != 0,
            psh: flags & 0x08 != 0,
            ack: flags & 0x10 != 0,
            urg: flags & 0x20 != 0,
            ece: flags & 0x40 != 0,
            cwr: flags & 0x80 != 0,
        }
    }

    /// No flag bits set (NULL scan signature).
    pub fn is_empty(&self) -> bool {
        !(self.fin
            || self.syn
            || self.rst
            || self.psh
            || self.ack
            || self.urg
            || self.ece
            || self.cwr)
    }

    /// Exactly SYN, nothing else.
    pub fn is_syn_only(&self) -> bool {
        self.syn
            && !(self.fin || self.rst || self.psh || self.ack || self.urg || self.ece || self.cwr)
    }

    /// Whether the flag named by `letter` (one of `FSRPAUEC`) is set.
    pub fn has(&self, letter: char) -> bool {
        match letter {
            'F' => self.fin,
            'S' => self.syn,
            'R' => self.rst,
            'P' => self.psh,
            'A' => self.ack,
            'U' => self.urg,
            'E' => self.ece,
            'C' => self.cwr,
            _ => false,
        }
    }
}

impl std::fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.fin {
            write!(f, "F")?;
        }
        if self.syn {
            write!(f, "S")?;
        }
        if self.rst {
            write!(f, "R")?;
        }
        if self.psh {
            write!(f, "P")?;
        }
        if self.ack {
            write!(f, "A")?;
        }
        if self.urg {
            write!(f, "U")?;
        }
        if self.ece {
            write!(f, "E")?;
        }
        if self.cwr {
            write!(f, "C")?;
        }
        Ok(())
    }
}

/// Normalized view of one captured packet.
#[derive(Debug, Clone)]
pub struct PacketView {
    /// Capture timestamp, monotonic seconds. Read once per packet and reused
    /// by every detector so all window comparisons within one evaluation see
    /// the same clock.
    pub ts: f64,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub proto: Protocol,
    /// Source port; 0 for ICMP.
    pub sport: u16,
    /// Destination port; 0 for ICMP.
    pub dport: u16,
    /// TCP flag set; zeroed for non-TCP packets.
    pub flags: TcpFlags,
    /// Raw application-layer bytes of a TCP packet; empty otherwise.
    pub payload: Vec<u8>,
    /// Decoded DNS question name when the packet is a DNS query.
    pub dns_qname: Option<String>,
}

impl PacketView {
    pub fn new(ts: f64, src_ip: IpAddr, dst_ip: IpAddr, proto: Protocol) -> Self {
        Self {
            ts,
            src_ip,
            dst_ip,
            proto,
            sport: 0,
            dport: 0,
            flags: TcpFlags::default(),
            payload: Vec::new(),
            dns_qname: None,
        }
    }

    pub fn with_ports(mut self, sport: u16, dport: u16) -> Self {
        self.sport = sport;
        self.dport = dport;
        self
    }

    pub fn with_flags(mut self, flags: TcpFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_qname(mut self, qname: impl Into<String>) -> Self {
        self.dns_qname = Some(qname.into());
        self
    }
}
