//! Packet capture
//!
//! Pluggable frame sources behind the [`PacketCapture`] trait. Two
//! implementations: a promiscuous live capture on an interface and offline
//! replay of a pcap file. The core is agnostic to which one feeds it.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Capture method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMethod {
    /// Live capture on a network interface (requires elevated privileges).
    Live,
    /// Offline pcap file replay.
    File,
}

impl Default for CaptureMethod {
    fn default() -> Self {
        CaptureMethod::Live
    }
}

/// Capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Capture method.
    #[serde(default)]
    pub method: CaptureMethod,
    /// Interface name for live capture; autodetected when unset.
    #[serde(default)]
    pub interface: Option<String>,
    /// Pcap file path for replay.
    #[serde(default)]
    pub pcap_file: Option<String>,
    /// Snapshot length.
    #[serde(default = "default_snaplen")]
    pub snaplen: i32,
    /// Read timeout in milliseconds; bounds how long shutdown can lag.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i32,
    /// Promiscuous mode for live capture.
    #[serde(default = "default_true")]
    pub promiscuous: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            method: CaptureMethod::default(),
            interface: None,
            pcap_file: None,
            snaplen: default_snaplen(),
            timeout_ms: default_timeout_ms(),
            promiscuous: default_true(),
        }
    }
}

fn default_snaplen() -> i32 {
    65535
}

fn default_timeout_ms() -> i32 {
    200
}

fn default_true() -> bool {
    true
}

/// One raw link-layer frame with its capture timestamp.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Capture timestamp, seconds.
    pub ts: f64,
    pub data: Vec<u8>,
}

/// Outcome of one read from a capture source.
#[derive(Debug)]
pub enum FrameRead {
    Frame(RawFrame),
    /// Live read timeout; poll the shutdown flag and try again.
    TimedOut,
    /// Replay reached end of file.
    Finished,
}

/// Capture statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStats {
    /// Frames handed to the decoder.
    pub received: u64,
}

/// Trait for packet capture implementations.
pub trait PacketCapture: Send {
    /// Read the next frame. `Err` means the source failed and the pipeline
    /// should shut down.
    fn next_frame(&mut self) -> Result<FrameRead>;

    fn stats(&self) -> CaptureStats;
}

/// Open a capture source based on configuration.
pub fn open(config: &CaptureConfig) -> Result<Box<dyn PacketCapture>> {
    match config.method {
        CaptureMethod::Live => Ok(Box::new(LiveCapture::open(config)?)),
        CaptureMethod::File => Ok(Box::new(FileCapture::open(config)?)),
    }
}

fn frame_ts(header: &pcap::PacketHeader) -> f64 {
    header.ts.tv_sec as f64 + header.ts.tv_usec as f64 / 1_000_000.0
}

/// Promiscuous live capture on an interface.
pub struct LiveCapture {
    cap: pcap::Capture<pcap::Active>,
    stats: CaptureStats,
}

impl LiveCapture {
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let cap = match &config.interface {
            Some(name) => {
                info!(interface = %name, "opening live capture");
                pcap::Capture::from_device(name.as_str())
                    .map_err(|e| Error::Source(format!("cannot open interface '{}': {}", name, e)))?
            }
            None => {
                let device = pcap::Device::lookup()
                    .map_err(|e| Error::Source(format!("device lookup failed: {}", e)))?
                    .ok_or_else(|| Error::Source("no capture device found".to_string()))?;
                info!(interface = %device.name, "opening live capture on default device");
                pcap::Capture::from_device(device)
                    .map_err(|e| Error::Source(format!("cannot open default device: {}", e)))?
            }
        };

        let cap = cap
            .promisc(config.promiscuous)
            .snaplen(config.snaplen)
            .timeout(config.timeout_ms)
            .open()
            .map_err(|e| Error::Source(format!("cannot start capture: {}", e)))?;

        Ok(Self {
            cap,
            stats: CaptureStats::default(),
        })
    }
}

impl PacketCapture for LiveCapture {
    fn next_frame(&mut self) -> Result<FrameRead> {
        match self.cap.next_packet() {
            Ok(pkt) => {
                self.stats.received += 1;
                Ok(FrameRead::Frame(RawFrame {
                    ts: frame_ts(pkt.header),
                    data: pkt.data.to_vec(),
                }))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(FrameRead::TimedOut),
            Err(e) => Err(Error::Source(e.to_string())),
        }
    }

    fn stats(&self) -> CaptureStats {
        self.stats
    }
}

/// Offline pcap file replay.
pub struct FileCapture {
    cap: pcap::Capture<pcap::Offline>,
    stats: CaptureStats,
}

impl FileCapture {
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let path = config
            .pcap_file
            .as_ref()
            .ok_or_else(|| Error::Source("pcap file path required for replay".to_string()))?;
        info!(file = %path, "replaying capture file");
        let cap = pcap::Capture::from_file(path)
            .map_err(|e| Error::Source(format!("cannot open pcap file '{}': {}", path, e)))?;
        Ok(Self {
            cap,
            stats: CaptureStats::default(),
        })
    }
}

impl PacketCapture for FileCapture {
    fn next_frame(&mut self) -> Result<FrameRead> {
        match self.cap.next_packet() {
            Ok(pkt) => {
                self.stats.received += 1;
                Ok(FrameRead::Frame(RawFrame {
                    ts: frame_ts(pkt.header),
                    data: pkt.data.to_vec(),
                }))
            }
            Err(pcap::Error::NoMorePackets) => Ok(FrameRead::Finished),
            Err(e) => Err(Error::Source(e.to_string())),
        }
    }

    fn stats(&self) -> CaptureStats {
        self.stats
    }
}
