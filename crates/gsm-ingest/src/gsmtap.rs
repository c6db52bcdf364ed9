//! GSMTAP dissection.
//!
//! Takes the raw bytes of a GSMTAP-encapsulated GSM Um message (the payload
//! of a UDP datagram on port 4729, as emitted by gr-gsm and friends) and
//! projects them into a [`Frame`] with string-valued field views, one layer
//! per protocol. Also knows how to peel the link/IP/UDP envelope off a
//! capture-file packet to reach that payload.
//!
//! Only the downlink signalling subset the detection rules feed on is given
//! a named layer: common-channel blocks (paging) become `gsm_a.ccch` and
//! dedicated/associated-channel blocks (system information) become
//! `gsm_a.dtap`. Everything else stays a bare `gsmtap` frame and is stored
//! as a generic packet.

use thiserror::Error;

use crate::frame::{Frame, Layer};

// ---------------------------------------------------------------------------
// GSMTAP v2 header layout (osmocom gsmtap.h)
//
//   Byte   0       = version (2)
//   Byte   1       = header length in 32-bit words (4 ⇒ 16 bytes)
//   Byte   2       = payload type (1 = GSM Um air interface)
//   Byte   3       = timeslot
//   Bytes  4 ..  6 = ARFCN (u16 BE); bit 15 = PCS band, bit 14 = uplink
//   Byte   6       = signal level (i8, dBm)
//   Byte   7       = signal/noise ratio (i8, dB)
//   Bytes  8 .. 12 = GSM frame number (u32 BE)
//   Byte  12       = logical channel type (GSMTAP_CHANNEL_*)
//   Byte  13       = antenna number
//   Byte  14       = sub-slot
//   Byte  15       = reserved
//
// The Um payload follows the header. Its framing depends on the channel
// type:
//   BCCH/CCCH/AGCH/PCH — 23-byte downlink block, L2 pseudo-length octet
//                        first, L3 from byte 1;
//   SACCH (ACCH flag)  — 2-byte L1 header, 3-byte LAPDm header, L3 from
//                        byte 5;
//   SDCCH              — 3-byte LAPDm header, L3 from byte 3.
// ---------------------------------------------------------------------------

const GSMTAP_HDR_MIN: usize = 16;
const GSMTAP_TYPE_UM: u8 = 1;

const VERSION_OFF: usize = 0;
const HDR_LEN_OFF: usize = 1;
const TYPE_OFF: usize = 2;
const ARFCN_OFF: usize = 4;
const SIGNAL_OFF: usize = 6;
const FRAME_NR_OFF: usize = 8;
const CHAN_TYPE_OFF: usize = 12;

/// PCS-band and uplink flags ride in the top bits of the ARFCN field.
const ARFCN_MASK: u16 = 0x3fff;

/// Default UDP port for GSMTAP streams.
pub const GSMTAP_PORT: u16 = 4729;

// GSMTAP_CHANNEL_* values (channel type byte).
const CHAN_BCCH: u8 = 1;
const CHAN_CCCH: u8 = 2;
const CHAN_AGCH: u8 = 4;
const CHAN_PCH: u8 = 5;
const CHAN_SDCCH: u8 = 6;
const CHAN_SDCCH4: u8 = 7;
const CHAN_SDCCH8: u8 = 8;
/// Set for the slow/fast associated control channel of any dedicated channel.
const CHAN_ACCH_FLAG: u8 = 0x80;

// GSM 44.018 radio-resource L3 constants.
const PD_RR: u8 = 0x06;
const RR_SYSTEM_INFO_6: u8 = 0x1e; // 30
const RR_PAGING_REQUEST_1: u8 = 0x21; // 33

/// Per-frame dissection failure. The frame is skipped; the stream continues.
#[derive(Debug, Error)]
pub enum DissectError {
    #[error("truncated packet ({0} bytes)")]
    Truncated(usize),
    #[error("not an IPv4/UDP datagram")]
    NotUdp,
    #[error("unsupported GSMTAP version {0}")]
    BadVersion(u8),
    #[error("unsupported GSMTAP payload type {0}")]
    BadPayloadType(u8),
}

// ---------------------------------------------------------------------------
// Envelope stripping (capture-file path)
// ---------------------------------------------------------------------------

/// Link-layer framing of a capture file, from the pcap global header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    /// Linux cooked capture (SLL), 16-byte pseudo-header.
    LinuxSll,
    /// Packets start directly at the IP header.
    RawIp,
}

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;
const IPPROTO_UDP: u8 = 17;

/// Strip link, IPv4 and UDP headers, returning the UDP payload.
///
/// Non-IPv4 and non-UDP packets report [`DissectError::NotUdp`] so callers
/// can skip unrelated traffic interleaved in a capture without noise.
pub fn udp_payload(link: LinkLayer, data: &[u8]) -> Result<&[u8], DissectError> {
    let ip = match link {
        LinkLayer::Ethernet => {
            if data.len() < 14 {
                return Err(DissectError::Truncated(data.len()));
            }
            let ethertype = u16::from_be_bytes([data[12], data[13]]);
            match ethertype {
                ETHERTYPE_IPV4 => &data[14..],
                ETHERTYPE_VLAN => {
                    if data.len() < 18 {
                        return Err(DissectError::Truncated(data.len()));
                    }
                    let inner = u16::from_be_bytes([data[16], data[17]]);
                    if inner != ETHERTYPE_IPV4 {
                        return Err(DissectError::NotUdp);
                    }
                    &data[18..]
                }
                _ => return Err(DissectError::NotUdp),
            }
        }
        LinkLayer::LinuxSll => {
            if data.len() < 16 {
                return Err(DissectError::Truncated(data.len()));
            }
            let proto = u16::from_be_bytes([data[14], data[15]]);
            if proto != ETHERTYPE_IPV4 {
                return Err(DissectError::NotUdp);
            }
            &data[16..]
        }
        LinkLayer::RawIp => data,
    };
    ipv4_udp_payload(ip)
}

fn ipv4_udp_payload(ip: &[u8]) -> Result<&[u8], DissectError> {
    if ip.len() < 20 {
        return Err(DissectError::Truncated(ip.len()));
    }
    if ip[0] >> 4 != 4 {
        return Err(DissectError::NotUdp);
    }
    let ihl = (ip[0] & 0x0f) as usize * 4;
    if ihl < 20 || ip.len() < ihl + 8 {
        return Err(DissectError::Truncated(ip.len()));
    }
    if ip[9] != IPPROTO_UDP {
        return Err(DissectError::NotUdp);
    }
    let udp = &ip[ihl..];
    let udp_len = u16::from_be_bytes([udp[4], udp[5]]) as usize;
    if udp_len < 8 || udp.len() < udp_len {
        return Err(DissectError::Truncated(udp.len()));
    }
    // udp_len bounds the payload; Ethernet padding past it is dropped here.
    Ok(&udp[8..udp_len])
}

// ---------------------------------------------------------------------------
// GSMTAP header + Um payload
// ---------------------------------------------------------------------------

/// Dissect one GSMTAP datagram into a [`Frame`].
///
/// `number` is the 1-based capture ordinal; `sniff_timestamp` the wall-clock
/// receive time in epoch seconds. The returned frame always carries a
/// `gsmtap` layer; a `gsm_a.ccch` or `gsm_a.dtap` layer is stacked on top
/// when the Um payload parses as a recognized RR message.
pub fn dissect(data: &[u8], number: u64, sniff_timestamp: f64) -> Result<Frame, DissectError> {
    if data.len() < GSMTAP_HDR_MIN {
        return Err(DissectError::Truncated(data.len()));
    }
    let version = data[VERSION_OFF];
    if version != 2 && version != 3 {
        return Err(DissectError::BadVersion(version));
    }
    let hdr_len = data[HDR_LEN_OFF] as usize * 4;
    if hdr_len < GSMTAP_HDR_MIN || data.len() < hdr_len {
        return Err(DissectError::Truncated(data.len()));
    }
    if data[TYPE_OFF] != GSMTAP_TYPE_UM {
        return Err(DissectError::BadPayloadType(data[TYPE_OFF]));
    }

    let arfcn =
        u16::from_be_bytes([data[ARFCN_OFF], data[ARFCN_OFF + 1]]) & ARFCN_MASK;
    let signal_dbm = data[SIGNAL_OFF] as i8;
    let frame_nr = u32::from_be_bytes(
        data[FRAME_NR_OFF..FRAME_NR_OFF + 4].try_into().unwrap(),
    );
    let chan_type = data[CHAN_TYPE_OFF];

    let mut gsmtap = Layer::new("gsmtap");
    gsmtap.push("frame_nr", frame_nr.to_string());
    gsmtap.push("chan_type", chan_type.to_string());
    gsmtap.push("signal_dbm", signal_dbm.to_string());
    gsmtap.push("arfcn", arfcn.to_string());

    let mut frame = Frame::new(number, sniff_timestamp);
    frame.push_layer(gsmtap);

    if let Some((layer, info)) = parse_um_payload(chan_type, &data[hdr_len..]) {
        frame.push_layer(layer);
        frame.set_info(info);
    }
    Ok(frame)
}

/// Locate the L3 message inside the Um block and parse it if it is an RR
/// message we recognize. `None` leaves the frame as a bare GSMTAP packet.
fn parse_um_payload(chan_type: u8, block: &[u8]) -> Option<(Layer, String)> {
    if chan_type & CHAN_ACCH_FLAG != 0 {
        // SACCH downlink: 2-byte L1 header (power/TA), then LAPDm.
        return parse_rr_l3("gsm_a.dtap", block.get(5..)?);
    }
    match chan_type {
        CHAN_BCCH | CHAN_CCCH | CHAN_AGCH | CHAN_PCH => {
            // Downlink CCCH block: L2 pseudo-length octet first.
            parse_rr_l3("gsm_a.ccch", block.get(1..)?)
        }
        CHAN_SDCCH | CHAN_SDCCH4 | CHAN_SDCCH8 => {
            // LAPDm header: address, control, length.
            parse_rr_l3("gsm_a.dtap", block.get(3..)?)
        }
        _ => None,
    }
}

/// Parse an RR L3 message. Field extraction is tolerant of short messages:
/// whatever parses is exposed, and the decoder's required-field checks catch
/// the rest downstream.
fn parse_rr_l3(layer_name: &'static str, l3: &[u8]) -> Option<(Layer, String)> {
    let pd = l3.first()? & 0x0f;
    if pd != PD_RR {
        return None;
    }
    let msg_type = *l3.get(1)?;

    let mut layer = Layer::new(layer_name);
    layer.push("gsm_a_dtap_msg_rr_type", msg_type.to_string());

    let info = match (layer_name, msg_type) {
        ("gsm_a.ccch", RR_PAGING_REQUEST_1) => {
            parse_paging_request(&mut layer, &l3[2..]);
            "Paging Request Type 1"
        }
        ("gsm_a.dtap", RR_SYSTEM_INFO_6) => {
            parse_system_info(&mut layer, &l3[2..]);
            "System Information Type 6"
        }
        _ => "",
    };
    Some((layer, info.to_string()))
}

/// Paging Request Type 1 (44.018 §9.1.22), after the message type octet:
///   octet 0          = channels needed (bits 8-5: ch2 then ch1) and
///                      page mode (bits 2-1)
///   octet 1..        = Mobile Identity 1 IE (LV); identity type lives in
///                      bits 3-1 of the first identity octet
fn parse_paging_request(layer: &mut Layer, rest: &[u8]) {
    if let Some(&modes) = rest.first() {
        layer.push("gsm_a_rr_page_mode", (modes & 0x03).to_string());
        layer.push("gsm_a_rr_chnl_needed_ch1", ((modes >> 4) & 0x03).to_string());
        layer.push("gsm_a_rr_chnl_needed_ch2", ((modes >> 6) & 0x03).to_string());
    }
    if let Some(&id_len) = rest.get(1) {
        if let Some(ident) = rest.get(2..2 + id_len as usize) {
            if let Some(&first) = ident.first() {
                layer.push("gsm_a_ie_mobileid_type", (first & 0x07).to_string());
            }
        }
    }
}

/// System Information Type 6 (44.018 §9.1.40), after the message type octet:
///   octets 0..2      = Cell Identity (u16 BE)
///   octets 2..7      = Location Area Identification; the LAC is the last
///                      two octets (u16 BE), after the three BCD MCC/MNC
///                      octets
fn parse_system_info(layer: &mut Layer, rest: &[u8]) {
    if let Some(ci) = rest.get(0..2) {
        let ci = u16::from_be_bytes([ci[0], ci[1]]);
        layer.push("gsm_a_bssmap_cell_ci", ci.to_string());
    }
    if let Some(lac) = rest.get(5..7) {
        let lac = u16::from_be_bytes([lac[0], lac[1]]);
        layer.push("gsm_a_lac", lac.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test frame builders, shared with the source module's tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    pub struct GsmtapFrame {
        pub chan_type: u8,
        pub arfcn: u16,
        pub signal_dbm: i8,
        pub frame_nr: u32,
        pub payload: Vec<u8>,
    }

    impl GsmtapFrame {
        pub fn to_bytes(&self) -> Vec<u8> {
            let mut buf = vec![0u8; GSMTAP_HDR_MIN];
            buf[VERSION_OFF] = 2;
            buf[HDR_LEN_OFF] = 4;
            buf[TYPE_OFF] = GSMTAP_TYPE_UM;
            buf[ARFCN_OFF..ARFCN_OFF + 2].copy_from_slice(&self.arfcn.to_be_bytes());
            buf[SIGNAL_OFF] = self.signal_dbm as u8;
            buf[FRAME_NR_OFF..FRAME_NR_OFF + 4]
                .copy_from_slice(&self.frame_nr.to_be_bytes());
            buf[CHAN_TYPE_OFF] = self.chan_type;
            buf.extend_from_slice(&self.payload);
            buf
        }
    }

    /// 23-byte CCCH block carrying a Paging Request Type 1 for a TMSI.
    pub fn paging_block(page_mode: u8, ch1: u8, ch2: u8, id_type: u8) -> Vec<u8> {
        let mut block = vec![0u8; 23];
        block[0] = (21 << 2) | 0x01; // L2 pseudo-length
        block[1] = PD_RR;
        block[2] = RR_PAGING_REQUEST_1;
        block[3] = (ch2 << 6) | (ch1 << 4) | (page_mode & 0x03);
        block[4] = 5; // Mobile Identity length
        block[5] = id_type & 0x07;
        block
    }

    /// SACCH block carrying a System Information Type 6 with the given
    /// cell identity and location area code.
    pub fn si6_block(ci: u16, lac: u16) -> Vec<u8> {
        let mut block = vec![0u8; 23];
        // L1 header + LAPDm (address, control, length).
        block[2] = 0x03;
        block[3] = 0x03;
        block[4] = 0x01;
        block[5] = PD_RR;
        block[6] = RR_SYSTEM_INFO_6;
        block[7..9].copy_from_slice(&ci.to_be_bytes());
        // LAI: MCC/MNC BCD octets then the LAC.
        block[9] = 0x13;
        block[10] = 0x00;
        block[11] = 0x13;
        block[12..14].copy_from_slice(&lac.to_be_bytes());
        block
    }

    /// Paging frame as it appears on the wire (CCCH, downlink PCH).
    pub fn paging_datagram(arfcn: u16, frame_nr: u32) -> Vec<u8> {
        GsmtapFrame {
            chan_type: CHAN_CCCH,
            arfcn,
            signal_dbm: -63,
            frame_nr,
            payload: paging_block(0, 0, 1, 4),
        }
        .to_bytes()
    }

    /// System-information frame as it appears on the wire (SACCH).
    pub fn si6_datagram(arfcn: u16, frame_nr: u32, ci: u16, lac: u16) -> Vec<u8> {
        GsmtapFrame {
            chan_type: CHAN_ACCH_FLAG | 9, // SACCH/TCH-F
            arfcn,
            signal_dbm: -71,
            frame_nr,
            payload: si6_block(ci, lac),
        }
        .to_bytes()
    }

    /// Wrap a GSMTAP payload in Ethernet + IPv4 + UDP headers.
    pub fn ethernet_frame(payload: &[u8]) -> Vec<u8> {
        let udp_len = (8 + payload.len()) as u16;
        let ip_total = (20 + 8 + payload.len()) as u16;

        let mut frame = Vec::with_capacity(14 + ip_total as usize);
        frame.extend_from_slice(&[0u8; 12]); // MACs
        frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

        frame.extend_from_slice(&[0x45, 0x00]);
        frame.extend_from_slice(&ip_total.to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0, 0, 64, IPPROTO_UDP, 0, 0]);
        frame.extend_from_slice(&[127, 0, 0, 1]);
        frame.extend_from_slice(&[127, 0, 0, 1]);

        frame.extend_from_slice(&GSMTAP_PORT.to_be_bytes());
        frame.extend_from_slice(&GSMTAP_PORT.to_be_bytes());
        frame.extend_from_slice(&udp_len.to_be_bytes());
        frame.extend_from_slice(&[0, 0]);

        frame.extend_from_slice(payload);
        frame
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
