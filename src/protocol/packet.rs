//! Packet framing
//!
//! The 20-byte packet header, its flag-driven optional-header block, the
//! fragment section, and the composite checksum that covers all of it.
//! Ingress validation is strict: bad lengths, unknown flag shapes, and
//! checksum failures reject the datagram (the session layer drops and
//! counts it); egress building is infallible once a packet is well-formed.

use bitflags::bitflags;

use crate::codec::buffer::{align4, WireReader, WireWriter};
use crate::crypto::{hash32, CHECKSUM_SENTINEL};
use crate::error::{CodecError, ProtocolError};
use crate::protocol::fragment::{Fragment, FragmentHeader, FRAGMENT_HEADER_SIZE};
use crate::protocol::handshake::{ConnectRequest, CONNECT_REQUEST_SIZE};

/// Packet header size in bytes
pub const HEADER_SIZE: usize = 20;

/// Largest datagram either side will emit
pub const MAX_PACKET_SIZE: usize = 1024;

/// Fixed value of the header iteration field
pub const ITERATION: u16 = 0x0001;

bitflags! {
    /// Packet header flags; each bit with a body drives one optional-header
    /// section, parsed in ascending bit order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PacketFlags: u32 {
        const RETRANSMISSION = 0x0000_0001;
        const ENCRYPTED_CHECKSUM = 0x0000_0002;
        const BLOB_FRAGMENTS = 0x0000_0004;
        const SERVER_SWITCH = 0x0000_0100;
        const REQUEST_RETRANSMIT = 0x0000_1000;
        const REJECT_RETRANSMIT = 0x0000_2000;
        const ACK_SEQUENCE = 0x0000_4000;
        const DISCONNECT = 0x0000_8000;
        const LOGIN_REQUEST = 0x0001_0000;
        const WORLD_LOGIN_REQUEST = 0x0002_0000;
        const CONNECT_REQUEST = 0x0004_0000;
        const CONNECT_RESPONSE = 0x0008_0000;
        const CICMD = 0x0040_0000;
        const TIME_SYNC = 0x0100_0000;
        const ECHO_REQUEST = 0x0200_0000;
        const ECHO_RESPONSE = 0x0400_0000;
        const FLOW = 0x0800_0000;
    }
}

impl PacketFlags {
    /// Flags only legal before the handshake completes
    pub fn is_handshake(self) -> bool {
        self.intersects(
            PacketFlags::LOGIN_REQUEST
                | PacketFlags::WORLD_LOGIN_REQUEST
                | PacketFlags::CONNECT_REQUEST
                | PacketFlags::CONNECT_RESPONSE,
        )
    }
}

/// Fixed 20-byte packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub sequence: u32,
    pub flags: PacketFlags,
    pub checksum: u32,
    pub client_id: u16,
    pub time: u16,
    pub size: u16,
    pub iteration: u16,
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            sequence: 0,
            flags: PacketFlags::empty(),
            checksum: 0,
            client_id: 0,
            time: 0,
            size: 0,
            iteration: ITERATION,
        }
    }
}

impl PacketHeader {
    pub fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            sequence: r.read_u32("header.sequence")?,
            flags: PacketFlags::from_bits_retain(r.read_u32("header.flags")?),
            checksum: r.read_u32("header.checksum")?,
            client_id: r.read_u16("header.client_id")?,
            time: r.read_u16("header.time")?,
            size: r.read_u16("header.size")?,
            iteration: r.read_u16("header.iteration")?,
        })
    }

    pub fn write(&self, w: &mut WireWriter) {
        w.write_u32(self.sequence);
        w.write_u32(self.flags.bits());
        w.write_u32(self.checksum);
        w.write_u16(self.client_id);
        w.write_u16(self.time);
        w.write_u16(self.size);
        w.write_u16(self.iteration);
    }

    /// Hash of the header with the checksum field replaced by the sentinel.
    pub fn header_hash(&self) -> u32 {
        let mut copy = *self;
        copy.checksum = CHECKSUM_SENTINEL;
        let mut w = WireWriter::with_capacity(HEADER_SIZE);
        copy.write(&mut w);
        hash32(w.as_bytes())
    }
}

/// Server-switch notice (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSwitch {
    pub sequence: u32,
    pub kind: u32,
}

/// Echo reply timing (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EchoResponse {
    pub client_time: f32,
    pub holding_time: f32,
}

/// Peer-imposed throughput bound (6 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControl {
    /// Allowed outbound bytes per interval
    pub bytes: u32,
    /// Interval length in half-seconds
    pub interval: u16,
}

/// Control command (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CICmd {
    pub command: u32,
    pub argument: u32,
}

/// The flag-driven optional-header block
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OptionalHeaders {
    pub server_switch: Option<ServerSwitch>,
    pub request_retransmit: Option<Vec<u32>>,
    pub reject_retransmit: Option<Vec<u32>>,
    pub ack_sequence: Option<u32>,
    pub login_request: Option<Vec<u8>>,
    pub world_login_request: Option<Vec<u8>>,
    pub connect_request: Option<ConnectRequest>,
    pub connect_response: Option<u64>,
    pub cicmd: Option<CICmd>,
    pub time_sync: Option<f64>,
    pub echo_request: Option<f32>,
    pub echo_response: Option<EchoResponse>,
    pub flow: Option<FlowControl>,
}

impl OptionalHeaders {
    /// Flag bits implied by the populated sections
    pub fn flag_bits(&self) -> PacketFlags {
        let mut flags = PacketFlags::empty();
        if self.server_switch.is_some() {
            flags |= PacketFlags::SERVER_SWITCH;
        }
        if self.request_retransmit.is_some() {
            flags |= PacketFlags::REQUEST_RETRANSMIT;
        }
        if self.reject_retransmit.is_some() {
            flags |= PacketFlags::REJECT_RETRANSMIT;
        }
        if self.ack_sequence.is_some() {
            flags |= PacketFlags::ACK_SEQUENCE;
        }
        if self.login_request.is_some() {
            flags |= PacketFlags::LOGIN_REQUEST;
        }
        if self.world_login_request.is_some() {
            flags |= PacketFlags::WORLD_LOGIN_REQUEST;
        }
        if self.connect_request.is_some() {
            flags |= PacketFlags::CONNECT_REQUEST;
        }
        if self.connect_response.is_some() {
            flags |= PacketFlags::CONNECT_RESPONSE;
        }
        if self.cicmd.is_some() {
            flags |= PacketFlags::CICMD;
        }
        if self.time_sync.is_some() {
            flags |= PacketFlags::TIME_SYNC;
        }
        if self.echo_request.is_some() {
            flags |= PacketFlags::ECHO_REQUEST;
        }
        if self.echo_response.is_some() {
            flags |= PacketFlags::ECHO_RESPONSE;
        }
        if self.flow.is_some() {
            flags |= PacketFlags::FLOW;
        }
        flags
    }

    /// Parse the optional sections named by `flags`, in canonical order.
    fn parse(flags: PacketFlags, r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let mut opt = OptionalHeaders::default();

        if flags.contains(PacketFlags::SERVER_SWITCH) {
            opt.server_switch = Some(ServerSwitch {
                sequence: r.read_u32("server_switch.sequence")?,
                kind: r.read_u32("server_switch.kind")?,
            });
        }
        if flags.contains(PacketFlags::REQUEST_RETRANSMIT) {
            opt.request_retransmit = Some(read_sequence_list(r, "request_retransmit")?);
        }
        if flags.contains(PacketFlags::REJECT_RETRANSMIT) {
            opt.reject_retransmit = Some(read_sequence_list(r, "reject_retransmit")?);
        }
        if flags.contains(PacketFlags::ACK_SEQUENCE) {
            opt.ack_sequence = Some(r.read_u32("ack_sequence")?);
        }
        if flags.contains(PacketFlags::LOGIN_REQUEST) {
            // Login bodies run to the end of the payload.
            opt.login_request = Some(r.rest().to_vec());
            r.skip("login_request", r.remaining())?;
        }
        if flags.contains(PacketFlags::WORLD_LOGIN_REQUEST) {
            opt.world_login_request = Some(r.rest().to_vec());
            r.skip("world_login_request", r.remaining())?;
        }
        if flags.contains(PacketFlags::CONNECT_REQUEST) {
            opt.connect_request = Some(ConnectRequest::read(r)?);
        }
        if flags.contains(PacketFlags::CONNECT_RESPONSE) {
            opt.connect_response = Some(r.read_u64("connect_response.cookie")?);
        }
        if flags.contains(PacketFlags::CICMD) {
            opt.cicmd = Some(CICmd {
                command: r.read_u32("cicmd.command")?,
                argument: r.read_u32("cicmd.argument")?,
            });
        }
        if flags.contains(PacketFlags::TIME_SYNC) {
            opt.time_sync = Some(r.read_f64("time_sync")?);
        }
        if flags.contains(PacketFlags::ECHO_REQUEST) {
            opt.echo_request = Some(r.read_f32("echo_request")?);
        }
        if flags.contains(PacketFlags::ECHO_RESPONSE) {
            opt.echo_response = Some(EchoResponse {
                client_time: r.read_f32("echo_response.client_time")?,
                holding_time: r.read_f32("echo_response.holding_time")?,
            });
        }
        if flags.contains(PacketFlags::FLOW) {
            opt.flow = Some(FlowControl {
                bytes: r.read_u32("flow.bytes")?,
                interval: r.read_u16("flow.interval")?,
            });
        }

        Ok(opt)
    }

    /// Serialize the populated sections in canonical order.
    fn write(&self, w: &mut WireWriter) {
        if let Some(ss) = &self.server_switch {
            w.write_u32(ss.sequence);
            w.write_u32(ss.kind);
        }
        if let Some(list) = &self.request_retransmit {
            write_sequence_list(w, list);
        }
        if let Some(list) = &self.reject_retransmit {
            write_sequence_list(w, list);
        }
        if let Some(ack) = self.ack_sequence {
            w.write_u32(ack);
        }
        if let Some(body) = &self.login_request {
            w.write_bytes(body);
        }
        if let Some(body) = &self.world_login_request {
            w.write_bytes(body);
        }
        if let Some(cr) = &self.connect_request {
            cr.write(w);
        }
        if let Some(cookie) = self.connect_response {
            w.write_u64(cookie);
        }
        if let Some(cmd) = &self.cicmd {
            w.write_u32(cmd.command);
            w.write_u32(cmd.argument);
        }
        if let Some(ts) = self.time_sync {
            w.write_f64(ts);
        }
        if let Some(t) = self.echo_request {
            w.write_f32(t);
        }
        if let Some(er) = &self.echo_response {
            w.write_f32(er.client_time);
            w.write_f32(er.holding_time);
        }
        if let Some(fc) = &self.flow {
            w.write_u32(fc.bytes);
            w.write_u16(fc.interval);
        }
    }
}

fn read_sequence_list(
    r: &mut WireReader<'_>,
    field: &'static str,
) -> Result<Vec<u32>, CodecError> {
    let count = r.read_u32(field)? as usize;
    if count * 4 > r.remaining() {
        return Err(CodecError::Invalid {
            field,
            offset: r.offset(),
            reason: format!("sequence count {} exceeds payload", count),
        });
    }
    let mut list = Vec::with_capacity(count);
    for _ in 0..count {
        list.push(r.read_u32(field)?);
    }
    Ok(list)
}

fn write_sequence_list(w: &mut WireWriter, list: &[u32]) {
    w.write_u32(list.len() as u32);
    for seq in list {
        w.write_u32(*seq);
    }
}

/// A parsed or under-construction packet
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Packet {
    pub header: PacketHeader,
    pub optional: OptionalHeaders,
    pub fragments: Vec<Fragment>,
}

impl Packet {
    /// Parse a raw datagram. Checksum verification is separate (the session
    /// layer must pick the right keystream word first).
    pub fn parse(datagram: &[u8]) -> Result<Self, ProtocolError> {
        if datagram.len() < HEADER_SIZE {
            return Err(ProtocolError::ShortDatagram {
                expected: HEADER_SIZE,
                actual: datagram.len(),
            });
        }

        let mut r = WireReader::new(datagram);
        let header = PacketHeader::read(&mut r).expect("length checked above");

        if header.iteration != ITERATION {
            return Err(ProtocolError::BadIteration(header.iteration));
        }
        let payload_len = datagram.len() - HEADER_SIZE;
        if header.size as usize != payload_len {
            return Err(ProtocolError::ShortDatagram {
                expected: HEADER_SIZE + header.size as usize,
                actual: datagram.len(),
            });
        }

        let payload = &datagram[HEADER_SIZE..];
        let mut pr = WireReader::new(payload);

        let optional = OptionalHeaders::parse(header.flags, &mut pr).map_err(|_| {
            ProtocolError::UnknownFlagShape {
                flags: header.flags.bits(),
                offset: HEADER_SIZE + pr.offset(),
            }
        })?;

        let mut fragments = Vec::new();
        if header.flags.contains(PacketFlags::BLOB_FRAGMENTS) {
            while pr.remaining() >= FRAGMENT_HEADER_SIZE {
                let fh = FragmentHeader::read(&mut pr).expect("length checked above");
                if (fh.size as usize) < FRAGMENT_HEADER_SIZE
                    || fh.data_len() > pr.remaining()
                {
                    return Err(ProtocolError::FragmentOverrun {
                        size: fh.size as usize,
                        payload: payload_len,
                    });
                }
                let data = pr
                    .read_bytes("fragment.data", fh.data_len())
                    .expect("length checked above")
                    .to_vec();
                fragments.push(Fragment { header: fh, data });
                pr.align();
            }
        }

        if pr.has_remaining() {
            return Err(ProtocolError::UnknownFlagShape {
                flags: header.flags.bits(),
                offset: HEADER_SIZE + pr.offset(),
            });
        }

        Ok(Self {
            header,
            optional,
            fragments,
        })
    }

    /// Serialize the payload (optional headers, then aligned fragments).
    fn build_payload(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(MAX_PACKET_SIZE);
        self.optional.write(&mut w);
        for fragment in &self.fragments {
            fragment.header.write(&mut w);
            w.write_bytes(&fragment.data);
            w.align();
        }
        w.into_vec()
    }

    /// Finalize and serialize the whole datagram.
    ///
    /// Derives the flag bits from the populated sections, fills in the size
    /// field, and computes the checksum, masked with `xor_key` when one is
    /// supplied (the caller must also have set ENCRYPTED_CHECKSUM).
    pub fn build(&mut self, xor_key: Option<u32>) -> Vec<u8> {
        self.header.flags |= self.optional.flag_bits();
        if !self.fragments.is_empty() {
            self.header.flags |= PacketFlags::BLOB_FRAGMENTS;
        }
        self.header.iteration = ITERATION;

        let payload = self.build_payload();
        self.header.size = payload.len() as u16;

        let header_hash = self.header.header_hash();
        let payload_hash = composite_payload_hash(self.header.flags, &payload)
            .expect("self-built payload is well-formed");

        self.header.checksum = match xor_key {
            Some(key) => header_hash.wrapping_add(payload_hash ^ key),
            None => header_hash.wrapping_add(payload_hash),
        };

        let mut w = WireWriter::with_capacity(HEADER_SIZE + payload.len());
        self.header.write(&mut w);
        w.write_bytes(&payload);
        w.into_vec()
    }
}

/// Sum of Hash32 over each logical payload component: the optional-header
/// block as one unit, then each fragment's header and body separately.
/// Inter-fragment alignment padding is never hashed.
pub fn composite_payload_hash(
    flags: PacketFlags,
    payload: &[u8],
) -> Result<u32, ProtocolError> {
    let mut total: u32 = 0;
    let mut r = WireReader::new(payload);

    let optional_len =
        optional_region_len(flags, payload).ok_or(ProtocolError::UnknownFlagShape {
            flags: flags.bits(),
            offset: 0,
        })?;
    if optional_len > 0 {
        total = total.wrapping_add(hash32(&payload[..optional_len]));
    }
    r.skip("optional", optional_len)
        .map_err(|_| ProtocolError::UnknownFlagShape {
            flags: flags.bits(),
            offset: 0,
        })?;

    if flags.contains(PacketFlags::BLOB_FRAGMENTS) {
        while r.remaining() >= FRAGMENT_HEADER_SIZE {
            let start = r.offset();
            let fh = FragmentHeader::read(&mut r).expect("length checked above");
            total = total.wrapping_add(hash32(&payload[start..r.offset()]));

            let data_len = fh.data_len();
            if data_len > r.remaining() {
                return Err(ProtocolError::FragmentOverrun {
                    size: fh.size as usize,
                    payload: payload.len(),
                });
            }
            if data_len > 0 {
                let data = r.read_bytes("fragment.data", data_len).expect("checked");
                total = total.wrapping_add(hash32(data));
            }
            r.align();
        }
    }

    Ok(total)
}

/// Length of the optional-header region, or None when the flag shapes do not
/// fit the payload.
fn optional_region_len(flags: PacketFlags, payload: &[u8]) -> Option<usize> {
    let mut r = WireReader::new(payload);
    OptionalHeaders::parse(flags, &mut r).ok()?;
    Some(r.offset())
}

/// Verify an unencrypted checksum.
pub fn verify_plain_checksum(
    header: &PacketHeader,
    payload: &[u8],
) -> Result<(), ProtocolError> {
    let expected = header
        .header_hash()
        .wrapping_add(composite_payload_hash(header.flags, payload)?);
    if expected != header.checksum {
        return Err(ProtocolError::ChecksumMismatch {
            computed: expected,
            carried: header.checksum,
        });
    }
    Ok(())
}

/// Recover the keystream word an encrypted checksum was masked with:
/// `(checksum - header_hash) XOR payload_hash`. The caller compares it with
/// the expected word for this sequence.
pub fn recover_checksum_key(
    header: &PacketHeader,
    payload: &[u8],
) -> Result<u32, ProtocolError> {
    let payload_hash = composite_payload_hash(header.flags, payload)?;
    Ok(header.checksum.wrapping_sub(header.header_hash()) ^ payload_hash)
}

/// Payload length implied by a set of fragments, alignment included; used
/// for datagram budgeting before a packet is built.
pub fn fragments_wire_len(fragments: &[Fragment]) -> usize {
    fragments
        .iter()
        .map(|f| align4(FRAGMENT_HEADER_SIZE + f.data.len()))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::fragment::queues;

    fn frag(seq: u32, data: &[u8]) -> Fragment {
        Fragment {
            header: FragmentHeader {
                sequence: seq,
                id: seq,
                count: 1,
                size: (FRAGMENT_HEADER_SIZE + data.len()) as u16,
                index: 0,
                queue: queues::GENERAL,
            },
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_header_round_trip() {
        let header = PacketHeader {
            sequence: 1234,
            flags: PacketFlags::ACK_SEQUENCE | PacketFlags::ENCRYPTED_CHECKSUM,
            checksum: 0xAABBCCDD,
            client_id: 77,
            time: 1000,
            size: 4,
            iteration: ITERATION,
        };
        let mut w = WireWriter::new();
        header.write(&mut w);
        assert_eq!(w.len(), HEADER_SIZE);

        let bytes = w.into_vec();
        let mut r = WireReader::new(&bytes);
        assert_eq!(PacketHeader::read(&mut r).unwrap(), header);
    }

    #[test]
    fn test_plain_checksum_single_fragment() {
        // checksum = Hash32(header with sentinel) + Hash32(frag header) + Hash32(frag data)
        let mut packet = Packet {
            header: PacketHeader {
                sequence: 3,
                ..Default::default()
            },
            optional: OptionalHeaders::default(),
            fragments: vec![frag(1, &[1, 2, 3, 4, 5, 6, 7, 8])],
        };
        let bytes = packet.build(None);

        let frag_header = &bytes[HEADER_SIZE..HEADER_SIZE + FRAGMENT_HEADER_SIZE];
        let frag_data = &bytes[HEADER_SIZE + FRAGMENT_HEADER_SIZE..];
        let expected = packet
            .header
            .header_hash()
            .wrapping_add(hash32(frag_header))
            .wrapping_add(hash32(frag_data));
        assert_eq!(packet.header.checksum, expected);

        let parsed = Packet::parse(&bytes).unwrap();
        verify_plain_checksum(&parsed.header, &bytes[HEADER_SIZE..]).unwrap();
        assert_eq!(parsed.fragments.len(), 1);
        assert_eq!(parsed.fragments[0].data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_fragment_padding_not_hashed_and_not_in_fragment_size() {
        // A 5-byte body needs 3 pad bytes; the pad lands in the packet but
        // not in the fragment size or the hash.
        let mut packet = Packet {
            fragments: vec![frag(1, &[9, 9, 9, 9, 9]), frag(2, &[1, 2, 3, 4])],
            ..Default::default()
        };
        let bytes = packet.build(None);

        assert_eq!(packet.header.size as usize, align4(16 + 5) + 16 + 4);
        let parsed = Packet::parse(&bytes).unwrap();
        assert_eq!(parsed.fragments[0].header.size, 21);
        assert_eq!(parsed.fragments[0].data, vec![9, 9, 9, 9, 9]);
        assert_eq!(parsed.fragments[1].data, vec![1, 2, 3, 4]);

        // Corrupting a pad byte must not affect the payload hash.
        let mut corrupted = bytes.clone();
        corrupted[HEADER_SIZE + 16 + 5] ^= 0xFF;
        let h1 = composite_payload_hash(packet.header.flags, &bytes[HEADER_SIZE..]).unwrap();
        let h2 =
            composite_payload_hash(packet.header.flags, &corrupted[HEADER_SIZE..]).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_encrypted_checksum_mask() {
        let mut packet = Packet {
            header: PacketHeader {
                sequence: 10,
                flags: PacketFlags::ENCRYPTED_CHECKSUM,
                client_id: 123,
                time: 1000,
                ..Default::default()
            },
            fragments: vec![frag(1, &[0x11, 0x22, 0x33, 0x44])],
            ..Default::default()
        };
        let key = 0xAD49_7DF3;
        let bytes = packet.build(Some(key));

        let parsed = Packet::parse(&bytes).unwrap();
        let recovered = recover_checksum_key(&parsed.header, &bytes[HEADER_SIZE..]).unwrap();
        assert_eq!(recovered, key);
    }

    #[test]
    fn test_optional_header_order_ack_then_time_sync() {
        let mut packet = Packet {
            optional: OptionalHeaders {
                ack_sequence: Some(42),
                time_sync: Some(1234.5),
                ..Default::default()
            },
            ..Default::default()
        };
        let bytes = packet.build(None);
        assert!(packet.header.flags.contains(PacketFlags::ACK_SEQUENCE));
        assert!(packet.header.flags.contains(PacketFlags::TIME_SYNC));

        // Ack (lower flag bit) precedes the time sync on the wire.
        let payload = &bytes[HEADER_SIZE..];
        assert_eq!(payload.len(), 12);
        assert_eq!(u32::from_le_bytes(payload[0..4].try_into().unwrap()), 42);
        assert_eq!(f64::from_le_bytes(payload[4..12].try_into().unwrap()), 1234.5);

        let parsed = Packet::parse(&bytes).unwrap();
        assert_eq!(parsed.optional.ack_sequence, Some(42));
        assert_eq!(parsed.optional.time_sync, Some(1234.5));
    }

    #[test]
    fn test_retransmit_request_list_round_trip() {
        let mut packet = Packet {
            optional: OptionalHeaders {
                request_retransmit: Some(vec![5, 6, 9]),
                ..Default::default()
            },
            ..Default::default()
        };
        let bytes = packet.build(None);
        let parsed = Packet::parse(&bytes).unwrap();
        assert_eq!(parsed.optional.request_retransmit, Some(vec![5, 6, 9]));
    }

    #[test]
    fn test_connect_handshake_headers_round_trip() {
        let cr = ConnectRequest {
            server_time: 99.5,
            cookie: 0x1122_3344_5566_7788,
            client_id: 0x0042,
            server_seed: 0xC838_24AB,
            client_seed: 0xFBD5_2C87,
        };
        let mut packet = Packet {
            optional: OptionalHeaders {
                connect_request: Some(cr),
                ..Default::default()
            },
            ..Default::default()
        };
        let bytes = packet.build(None);
        assert_eq!(bytes.len(), HEADER_SIZE + CONNECT_REQUEST_SIZE);

        let parsed = Packet::parse(&bytes).unwrap();
        assert_eq!(parsed.optional.connect_request, Some(cr));
    }

    #[test]
    fn test_parse_rejects_short_datagram() {
        let err = Packet::parse(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, ProtocolError::ShortDatagram { actual: 10, .. }));
    }

    #[test]
    fn test_parse_rejects_size_mismatch() {
        let mut packet = Packet {
            fragments: vec![frag(1, &[1, 2, 3, 4])],
            ..Default::default()
        };
        let mut bytes = packet.build(None);
        bytes.push(0); // trailing byte the size field does not cover
        let err = Packet::parse(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::ShortDatagram { .. }));
    }

    #[test]
    fn test_parse_rejects_bad_iteration() {
        let mut packet = Packet::default();
        let mut bytes = packet.build(None);
        bytes[18] = 0x02;
        let err = Packet::parse(&bytes).unwrap_err();
        assert_eq!(err, ProtocolError::BadIteration(0x0002));
    }

    #[test]
    fn test_parse_rejects_fragment_overrun() {
        let mut packet = Packet {
            fragments: vec![frag(1, &[1, 2, 3, 4])],
            ..Default::default()
        };
        let mut bytes = packet.build(None);
        // Inflate the fragment's size field past the payload.
        let size_off = HEADER_SIZE + 10;
        bytes[size_off..size_off + 2].copy_from_slice(&900u16.to_le_bytes());
        let err = Packet::parse(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::FragmentOverrun { .. }));
    }

    #[test]
    fn test_parse_rejects_truncated_optional_header() {
        let mut packet = Packet {
            optional: OptionalHeaders {
                time_sync: Some(5.0),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut bytes = packet.build(None);
        // Chop the time-sync body and fix the size field so only the flag
        // shape is wrong.
        bytes.truncate(HEADER_SIZE + 4);
        bytes[16..18].copy_from_slice(&4u16.to_le_bytes());
        let err = Packet::parse(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownFlagShape { .. }));
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let mut packet = Packet {
            fragments: vec![frag(1, &[1, 2, 3, 4])],
            ..Default::default()
        };
        let mut bytes = packet.build(None);
        bytes[HEADER_SIZE + FRAGMENT_HEADER_SIZE] ^= 0xFF;
        let parsed = Packet::parse(&bytes).unwrap();
        let err = verify_plain_checksum(&parsed.header, &bytes[HEADER_SIZE..]).unwrap_err();
        assert!(matches!(err, ProtocolError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_packet_size_counts_fragment_padding() {
        let mut packet = Packet {
            fragments: vec![frag(1, &[1, 2, 3, 4, 5])],
            ..Default::default()
        };
        let bytes = packet.build(None);
        // header.size covers the padded fragment, the fragment's own size
        // field does not.
        assert_eq!(packet.header.size as usize, align4(FRAGMENT_HEADER_SIZE + 5));
        assert_eq!(bytes.len(), HEADER_SIZE + align4(FRAGMENT_HEADER_SIZE + 5));
    }

    #[test]
    fn test_header_only_packet() {
        let mut packet = Packet {
            header: PacketHeader {
                flags: PacketFlags::DISCONNECT,
                ..Default::default()
            },
            ..Default::default()
        };
        let bytes = packet.build(None);
        assert_eq!(bytes.len(), HEADER_SIZE);
        let parsed = Packet::parse(&bytes).unwrap();
        assert!(parsed.header.flags.contains(PacketFlags::DISCONNECT));
        verify_plain_checksum(&parsed.header, &bytes[HEADER_SIZE..]).unwrap();
    }
}
