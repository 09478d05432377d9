// SPDX-License-Identifier: Apache-2.0 OR MIT

//! FPGA data packet wire format and the sample-conversion routines that sit
//! between it and [`crate::fifo::ComplexI16`] (spec.md §4.5.5, §6).

use crate::config::{FPGA_FLAG_END_OF_BURST, FPGA_FLAG_WFM_LOADING, FPGA_PACKET_HEADER_BYTES, FPGA_PACKET_MAX_PAYLOAD_BYTES};
use crate::fifo::ComplexI16;

/// One complex sample in the caller-facing float representation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ComplexF32 {
    pub i: f32,
    pub q: f32,
}

/// `float_to_int = clamp(round(f * 2047), -2048, 2047)` (spec.md §4.5.5).
#[must_use]
pub fn f32_to_i16(v: f32) -> i16 {
    (v * 2047.0).round().clamp(-2048.0, 2047.0) as i16
}

/// `int_to_float = i / 2048.0` (spec.md §4.5.5).
#[must_use]
pub fn i16_to_f32(v: i16) -> f32 {
    f32::from(v) / 2048.0
}

#[must_use]
pub fn complex_f32_to_i16(c: ComplexF32) -> ComplexI16 {
    ComplexI16 { i: f32_to_i16(c.i), q: f32_to_i16(c.q) }
}

#[must_use]
pub fn complex_i16_to_f32(c: ComplexI16) -> ComplexF32 {
    ComplexF32 { i: i16_to_f32(c.i), q: i16_to_f32(c.q) }
}

/// Parsed view of one 16-byte `FpgaDataPacket` header (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FpgaPacketHeader {
    pub counter: u64,
    pub flags: u8,
    pub wfm_payload_len: u16,
}

impl FpgaPacketHeader {
    #[must_use]
    pub fn end_of_burst(&self) -> bool {
        self.flags & FPGA_FLAG_END_OF_BURST != 0
    }

    #[must_use]
    pub fn wfm_loading(&self) -> bool {
        self.flags & FPGA_FLAG_WFM_LOADING != 0
    }

    /// Serializes the header into the first [`FPGA_PACKET_HEADER_BYTES`] of `out`.
    pub fn write_into(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.counter.to_le_bytes());
        out[8] = self.flags;
        out[9..11].copy_from_slice(&self.wfm_payload_len.to_le_bytes());
        for b in &mut out[11..FPGA_PACKET_HEADER_BYTES] {
            *b = 0;
        }
    }

    #[must_use]
    pub fn read_from(bytes: &[u8]) -> Self {
        let counter = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let flags = bytes[8];
        let wfm_payload_len = u16::from_le_bytes(bytes[9..11].try_into().unwrap());
        Self { counter, flags, wfm_payload_len }
    }
}

/// One `FpgaDataPacket`: fixed header plus up to [`FPGA_PACKET_MAX_PAYLOAD_BYTES`]
/// of payload.
#[derive(Debug, Clone)]
pub struct FpgaDataPacket {
    pub header: FpgaPacketHeader,
    pub payload: Vec<u8>,
}

impl FpgaDataPacket {
    #[must_use]
    pub fn new(counter: u64, flags: u8) -> Self {
        Self { header: FpgaPacketHeader { counter, flags, wfm_payload_len: 0 }, payload: Vec::new() }
    }

    /// Serializes the full wire packet (header + payload).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; FPGA_PACKET_HEADER_BYTES + self.payload.len()];
        self.header.write_into(&mut buf[..FPGA_PACKET_HEADER_BYTES]);
        buf[FPGA_PACKET_HEADER_BYTES..].copy_from_slice(&self.payload);
        buf
    }

    /// Parses one packet from a transport buffer starting at `bytes`,
    /// returning the packet and the number of bytes consumed, or `None` if
    /// `bytes` is too short for even a header.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<(Self, usize)> {
        if bytes.len() < FPGA_PACKET_HEADER_BYTES {
            return None;
        }
        let header = FpgaPacketHeader::read_from(bytes);
        let payload_len = (bytes.len() - FPGA_PACKET_HEADER_BYTES).min(FPGA_PACKET_MAX_PAYLOAD_BYTES);
        let payload = bytes[FPGA_PACKET_HEADER_BYTES..FPGA_PACKET_HEADER_BYTES + payload_len].to_vec();
        let consumed = FPGA_PACKET_HEADER_BYTES + payload_len;
        Some((Self { header, payload }, consumed))
    }
}

/// Encodes `samples` as packed-12: three bytes per I/Q pair, little-endian.
/// `samples.len()` must be a multiple of 4 (spec.md §4.5.5); a non-multiple
/// is logged and the trailing remainder is dropped rather than encoded
/// misaligned.
#[must_use]
pub fn encode_packed12(samples: &[ComplexI16]) -> Vec<u8> {
    if samples.len() % 4 != 0 {
        log::warn!("packed-12 encode: {} samples is not a multiple of 4, packet misaligned", samples.len());
    }
    let usable = samples.len() - samples.len() % 4;
    let mut out = Vec::with_capacity(usable * 3);
    for pair in samples[..usable].chunks_exact(2) {
        let (a, b) = (pair[0], pair[1]);
        pack_pair_12(a.i, a.q, &mut out);
        pack_pair_12(b.i, b.q, &mut out);
    }
    out
}

fn pack_pair_12(i: i16, q: i16, out: &mut Vec<u8>) {
    let iu = (i as u16) & 0x0FFF;
    let qu = (q as u16) & 0x0FFF;
    out.push((iu & 0xFF) as u8);
    out.push((((iu >> 8) & 0x0F) | ((qu & 0x0F) << 4)) as u8);
    out.push((qu >> 4) as u8);
}

/// Decodes a packed-12 byte buffer back into complex samples, sign-extending
/// each 12-bit field.
#[must_use]
pub fn decode_packed12(bytes: &[u8]) -> Vec<ComplexI16> {
    let mut out = Vec::with_capacity(bytes.len() / 3 * 2);
    for chunk in bytes.chunks_exact(3) {
        let iu = u16::from(chunk[0]) | (u16::from(chunk[1] & 0x0F) << 8);
        let qu = (u16::from(chunk[1]) >> 4) | (u16::from(chunk[2]) << 4);
        out.push(ComplexI16 { i: sign_extend_12(iu), q: sign_extend_12(qu) });
    }
    out
}

fn sign_extend_12(v: u16) -> i16 {
    let v = v & 0x0FFF;
    if v & 0x0800 != 0 {
        (v | 0xF000) as i16
    } else {
        v as i16
    }
}

/// Encodes `samples` as I12-in-I16: each 12-bit signed value sign-extended
/// into a full 16-bit little-endian word (spec.md §4.5.5).
#[must_use]
pub fn encode_i12_in_i16(samples: &[ComplexI16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 4);
    for s in samples {
        out.extend_from_slice(&clamp_i12(s.i).to_le_bytes());
        out.extend_from_slice(&clamp_i12(s.q).to_le_bytes());
    }
    out
}

fn clamp_i12(v: i16) -> i16 {
    v.clamp(-2048, 2047)
}

#[must_use]
pub fn decode_i12_in_i16(bytes: &[u8]) -> Vec<ComplexI16> {
    let mut out = Vec::with_capacity(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        let i = i16::from_le_bytes([chunk[0], chunk[1]]);
        let q = i16::from_le_bytes([chunk[2], chunk[3]]);
        out.push(ComplexI16 { i, q });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_i16_round_trip_near_unity() {
        let v = complex_i16_to_f32(ComplexI16 { i: 1024, q: -1024 });
        assert!((v.i - 0.5).abs() < 1e-6);
        assert!((v.q + 0.5).abs() < 1e-6);
        let back = complex_f32_to_i16(v);
        assert_eq!(back.i, 1024); // rounding through the /2048, *2047 pair
    }

    #[test]
    fn f32_to_i16_saturates() {
        assert_eq!(f32_to_i16(10.0), 2047);
        assert_eq!(f32_to_i16(-10.0), -2048);
    }

    #[test]
    fn packed12_round_trips_within_12_bits() {
        let samples = vec![
            ComplexI16 { i: 2000, q: -2000 },
            ComplexI16 { i: 1, q: -1 },
            ComplexI16 { i: 0, q: 2047 },
            ComplexI16 { i: -2048, q: 0 },
        ];
        let bytes = encode_packed12(&samples);
        let decoded = decode_packed12(&bytes);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn i12_in_i16_round_trips() {
        let samples = vec![ComplexI16 { i: 2047, q: -2048 }, ComplexI16 { i: 0, q: 1 }];
        let bytes = encode_i12_in_i16(&samples);
        let decoded = decode_i12_in_i16(&bytes);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn header_round_trips() {
        let h = FpgaPacketHeader { counter: 0xDEAD_BEEF, flags: FPGA_FLAG_END_OF_BURST, wfm_payload_len: 0 };
        let mut buf = [0u8; FPGA_PACKET_HEADER_BYTES];
        h.write_into(&mut buf);
        let parsed = FpgaPacketHeader::read_from(&buf);
        assert_eq!(parsed, h);
        assert!(parsed.end_of_burst());
    }

    #[test]
    fn packet_parse_reports_consumed_length() {
        let packet = FpgaDataPacket { header: FpgaPacketHeader { counter: 1, flags: 0, wfm_payload_len: 0 }, payload: vec![9; 32] };
        let bytes = packet.to_bytes();
        let (parsed, consumed) = FpgaDataPacket::parse(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed.payload, packet.payload);
    }
}
