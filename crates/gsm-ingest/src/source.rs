//! Frame sources.
//!
//! Uniform pull interface over the two capture backends: a live UDP socket on
//! the GSMTAP port of a named radio interface, and pcap capture-file replay.
//! Both yield dissected [`Frame`]s; per-frame dissection faults are logged
//! and skipped, and only a backend failure ends the stream.

use anyhow::{bail, Context, Result};
use pcap_file::pcap::PcapReader;
use pcap_file::DataLink;
use socket2::{Domain, Protocol, Socket, Type};
use std::fs::File;
use std::io::BufReader;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

use crate::frame::Frame;
use crate::gsmtap::{self, DissectError, LinkLayer, GSMTAP_PORT};

/// Which capture backend to pull frames from.
#[derive(Debug, Clone)]
pub enum SourceConfig {
    /// Live capture from the named radio/network interface.
    Live { interface: String },
    /// Replay from a GSMTAP-bearing pcap file.
    File { path: PathBuf },
}

/// A lazy sequence of dissected frames.
pub enum FrameSource {
    Live(LiveSource),
    File(FileSource),
}

impl FrameSource {
    /// Open the configured backend. `cancel` lets a blocked live source give
    /// up when the pipeline shuts down.
    pub fn open(config: &SourceConfig, cancel: Arc<AtomicBool>) -> Result<Self> {
        match config {
            SourceConfig::Live { interface } => {
                Ok(FrameSource::Live(LiveSource::open(interface, cancel)?))
            }
            SourceConfig::File { path } => Ok(FrameSource::File(FileSource::open(path)?)),
        }
    }

    /// Next frame, or `None` at end of stream (file exhausted, source
    /// cancelled, or backend failure).
    pub fn next(&mut self) -> Option<Frame> {
        match self {
            FrameSource::Live(source) => source.next(),
            FrameSource::File(source) => source.next(),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, FrameSource::Live(_))
    }
}

// ---------------------------------------------------------------------------
// Live capture
// ---------------------------------------------------------------------------

/// How often a blocked live receive wakes up to check for cancellation.
const RECV_POLL: Duration = Duration::from_secs(1);

/// GSMTAP datagrams from a UDP socket bound to the capture interface.
pub struct LiveSource {
    socket: UdpSocket,
    cancel: Arc<AtomicBool>,
    number: u64,
    buf: Vec<u8>,
}

impl LiveSource {
    pub fn open(interface: &str, cancel: Arc<AtomicBool>) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        let iface_addr = resolve_interface_addr(interface)?;
        let bind_addr = SocketAddrV4::new(iface_addr, GSMTAP_PORT);
        socket
            .bind(&bind_addr.into())
            .with_context(|| format!("failed to bind {}", bind_addr))?;

        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(RECV_POLL))?;

        info!("listening for GSMTAP on {} ({})", bind_addr, interface);
        Ok(Self { socket, cancel, number: 0, buf: vec![0u8; 2048] })
    }

    fn next(&mut self) -> Option<Frame> {
        loop {
            if self.cancel.load(Relaxed) {
                return None;
            }
            match self.socket.recv(&mut self.buf) {
                Ok(n) => {
                    self.number += 1;
                    let ts = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs_f64();
                    match gsmtap::dissect(&self.buf[..n], self.number, ts) {
                        Ok(frame) => return Some(frame),
                        Err(e) => {
                            warn!("frame {}: dissection failed: {}", self.number, e);
                        }
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    error!("radio socket error: {}", e);
                    return None;
                }
            }
        }
    }
}

/// IPv4 address of a named interface, via getifaddrs.
fn resolve_interface_addr(interface: &str) -> Result<Ipv4Addr> {
    #[cfg(target_os = "linux")]
    {
        use std::ffi::CStr;
        use std::ptr::null_mut;
        unsafe {
            let mut addrs: *mut libc::ifaddrs = null_mut();
            if libc::getifaddrs(&mut addrs) != 0 {
                bail!("getifaddrs failed");
            }
            let mut current = addrs;
            while !current.is_null() {
                let ifa = &*current;
                if !ifa.ifa_name.is_null() && !ifa.ifa_addr.is_null() {
                    let name = CStr::from_ptr(ifa.ifa_name).to_str().unwrap_or("");
                    if name == interface
                        && (*ifa.ifa_addr).sa_family == libc::AF_INET as libc::sa_family_t
                    {
                        let sin = &*(ifa.ifa_addr as *const libc::sockaddr_in);
                        let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
                        libc::freeifaddrs(addrs);
                        return Ok(ip);
                    }
                }
                current = ifa.ifa_next;
            }
            libc::freeifaddrs(addrs);
        }
        bail!("interface {} not found or has no IPv4 address", interface);
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = interface;
        Ok(Ipv4Addr::UNSPECIFIED)
    }
}

// ---------------------------------------------------------------------------
// File replay
// ---------------------------------------------------------------------------

/// Frames read back from a pcap file, in file order. Finite; a fresh pass
/// means a fresh `FileSource`.
pub struct FileSource {
    reader: PcapReader<BufReader<File>>,
    link: LinkLayer,
    number: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open capture file {}", path.display()))?;
        let reader = PcapReader::new(BufReader::new(file))
            .with_context(|| format!("failed to read pcap header of {}", path.display()))?;

        let link = match reader.header().datalink {
            DataLink::ETHERNET => LinkLayer::Ethernet,
            DataLink::LINUX_SLL => LinkLayer::LinuxSll,
            DataLink::RAW => LinkLayer::RawIp,
            other => bail!("unsupported capture link type {:?}", other),
        };

        info!("replaying capture file {}", path.display());
        Ok(Self { reader, link, number: 0 })
    }

    fn next(&mut self) -> Option<Frame> {
        while let Some(packet) = self.reader.next_packet() {
            let packet = match packet {
                Ok(p) => p,
                Err(e) => {
                    // A mangled packet record poisons everything after it.
                    error!("capture file read error: {}", e);
                    return None;
                }
            };
            self.number += 1;
            let ts = packet.timestamp.as_secs_f64();

            let payload = match gsmtap::udp_payload(self.link, &packet.data) {
                Ok(p) => p,
                Err(DissectError::NotUdp) => {
                    // Unrelated traffic interleaved in the capture.
                    debug!("frame {}: skipping non-GSMTAP packet", self.number);
                    continue;
                }
                Err(e) => {
                    warn!("frame {}: {}", self.number, e);
                    continue;
                }
            };

            match gsmtap::dissect(payload, self.number, ts) {
                Ok(frame) => return Some(frame),
                Err(e) => {
                    warn!("frame {}: dissection failed: {}", self.number, e);
                    continue;
                }
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
