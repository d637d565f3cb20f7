//! Minimal UBX protocol support.
//!
//! Only what the monitor needs: frame extraction from a noisy byte stream,
//! frame encoding for configuration messages, and MON-HW parsing.
//!
//! Frame layout: `0xB5 0x62 class id len(u16 LE) payload ck_a ck_b`, where the
//! checksum is an 8-bit Fletcher sum over `class..payload`.

use monitor_core::error::DeviceError;

pub const SYNC_1: u8 = 0xB5;
pub const SYNC_2: u8 = 0x62;

pub const CLASS_CFG: u8 = 0x06;
pub const ID_CFG_MSG: u8 = 0x01;
pub const CLASS_MON: u8 = 0x0A;
pub const ID_MON_HW: u8 = 0x09;

/// Payload length of MON-HW on protocol versions 15..23.
pub const MON_HW_LEN: usize = 60;

const HEADER_LEN: usize = 6;
const CHECKSUM_LEN: usize = 2;

/// Frames longer than this are treated as corruption.
const MAX_PAYLOAD_LEN: usize = 4096;

const MON_HW_FLAGS_OFFSET: usize = 22;
const MON_HW_JAM_IND_OFFSET: usize = 45;

/// A checksum-verified UBX frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub class: u8,
    pub id: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn is(&self, class: u8, id: u8) -> bool {
        self.class == class && self.id == id
    }
}

/// 8-bit Fletcher checksum as used by UBX.
pub fn checksum(bytes: &[u8]) -> (u8, u8) {
    bytes.iter().fold((0u8, 0u8), |(a, b), &byte| {
        let a = a.wrapping_add(byte);
        (a, b.wrapping_add(a))
    })
}

/// Serialise a frame including sync bytes and checksum.
pub fn encode(class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let len = u16::try_from(payload.len()).unwrap_or(u16::MAX);
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    out.extend_from_slice(&[SYNC_1, SYNC_2, class, id]);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload[..usize::from(len)]);
    let (ck_a, ck_b) = checksum(&out[2..]);
    out.push(ck_a);
    out.push(ck_b);
    out
}

/// CFG-MSG setting the output rate of `class`/`id` on the current port.
///
/// `rate` is in navigation epochs; 0 disables the message.
pub fn cfg_msg_rate(class: u8, id: u8, rate: u8) -> Vec<u8> {
    encode(CLASS_CFG, ID_CFG_MSG, &[class, id, rate])
}

// ── FrameDecoder ──────────────────────────────────────────────────────────────

/// Incremental frame extractor.
///
/// Bytes are pushed as they arrive; complete frames are pulled with
/// [`FrameDecoder::next_frame`]. Garbage between frames (NMEA sentences,
/// line noise) is skipped and frames with a bad checksum are dropped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.buf.windows(2).position(|w| w == [SYNC_1, SYNC_2]) {
                Some(start) => {
                    self.buf.drain(..start);
                }
                None => {
                    // Keep a trailing first sync byte; its partner may be in flight.
                    let keep = usize::from(self.buf.last() == Some(&SYNC_1));
                    let drop_len = self.buf.len() - keep;
                    self.buf.drain(..drop_len);
                    return None;
                }
            }

            if self.buf.len() < HEADER_LEN {
                return None;
            }

            let len = usize::from(u16::from_le_bytes([self.buf[4], self.buf[5]]));
            if len > MAX_PAYLOAD_LEN {
                tracing::debug!(len, "implausible UBX length; resynchronising");
                self.buf.drain(..2);
                continue;
            }

            let total = HEADER_LEN + len + CHECKSUM_LEN;
            if self.buf.len() < total {
                return None;
            }

            let (ck_a, ck_b) = checksum(&self.buf[2..HEADER_LEN + len]);
            if (ck_a, ck_b) != (self.buf[HEADER_LEN + len], self.buf[HEADER_LEN + len + 1]) {
                tracing::debug!(
                    class = self.buf[2],
                    id = self.buf[3],
                    "UBX checksum mismatch; dropping frame"
                );
                self.buf.drain(..2);
                continue;
            }

            let frame = Frame {
                class: self.buf[2],
                id: self.buf[3],
                payload: self.buf[HEADER_LEN..HEADER_LEN + len].to_vec(),
            };
            self.buf.drain(..total);
            return Some(frame);
        }
    }
}

// ── MON-HW ────────────────────────────────────────────────────────────────────

/// The fields of UBX-MON-HW the monitor cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonHw {
    /// CW jamming indicator, 0 (none) to 255 (strong).
    pub jam_ind: u8,
    /// Raw flags byte (rtcCalib, safeBoot, jammingState).
    pub flags: u8,
}

impl MonHw {
    /// Parse a MON-HW payload.
    ///
    /// A payload of the wrong size means the receiver and decoder disagree on
    /// the message layout, which is reported as [`DeviceError::Decode`].
    pub fn parse(payload: &[u8]) -> Result<Self, DeviceError> {
        if payload.len() != MON_HW_LEN {
            return Err(DeviceError::Decode(format!(
                "MON-HW payload is {} bytes, expected {MON_HW_LEN}",
                payload.len()
            )));
        }
        Ok(Self {
            jam_ind: payload[MON_HW_JAM_IND_OFFSET],
            flags: payload[MON_HW_FLAGS_OFFSET],
        })
    }

    /// Build a MON-HW payload; used to script receivers in tests and tools.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = vec![0u8; MON_HW_LEN];
        payload[MON_HW_FLAGS_OFFSET] = self.flags;
        payload[MON_HW_JAM_IND_OFFSET] = self.jam_ind;
        payload
    }

    pub fn to_frame_bytes(&self) -> Vec<u8> {
        encode(CLASS_MON, ID_MON_HW, &self.to_payload())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_of_cfg_msg_poll() {
        // CFG-MSG enabling MON-HW at rate 1, checksum as produced by u-center.
        let bytes = cfg_msg_rate(CLASS_MON, ID_MON_HW, 1);
        assert_eq!(
            bytes,
            vec![0xB5, 0x62, 0x06, 0x01, 0x03, 0x00, 0x0A, 0x09, 0x01, 0x1E, 0x70]
        );
    }

    #[test]
    fn test_decoder_extracts_single_frame() {
        let hw = MonHw {
            jam_ind: 42,
            flags: 0b0000_0100,
        };
        let mut decoder = FrameDecoder::new();
        decoder.push(&hw.to_frame_bytes());

        let frame = decoder.next_frame().expect("frame");
        assert!(frame.is(CLASS_MON, ID_MON_HW));
        assert_eq!(MonHw::parse(&frame.payload).unwrap(), hw);
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_skips_nmea_noise() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n");
        decoder.push(&MonHw { jam_ind: 7, flags: 0 }.to_frame_bytes());
        decoder.push(b"$GPGSA,A,3,04,05,,09,12,,,24,,,,,2.5,1.3,2.1*39\r\n");

        let frame = decoder.next_frame().expect("frame");
        assert_eq!(MonHw::parse(&frame.payload).unwrap().jam_ind, 7);
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_handles_split_delivery() {
        let bytes = MonHw { jam_ind: 200, flags: 0b1100 }.to_frame_bytes();
        let mut decoder = FrameDecoder::new();

        for chunk in bytes.chunks(7) {
            assert!(decoder.next_frame().is_none());
            decoder.push(chunk);
        }

        let frame = decoder.next_frame().expect("frame after final chunk");
        assert_eq!(MonHw::parse(&frame.payload).unwrap().jam_ind, 200);
    }

    #[test]
    fn test_decoder_keeps_trailing_sync_byte() {
        let bytes = MonHw { jam_ind: 3, flags: 0 }.to_frame_bytes();
        let mut decoder = FrameDecoder::new();
        decoder.push(b"noise");
        decoder.push(&bytes[..1]);
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.buffered(), 1);

        decoder.push(&bytes[1..]);
        assert!(decoder.next_frame().is_some());
    }

    #[test]
    fn test_decoder_drops_corrupt_frame_and_recovers() {
        let mut corrupt = MonHw { jam_ind: 99, flags: 0 }.to_frame_bytes();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;

        let mut decoder = FrameDecoder::new();
        decoder.push(&corrupt);
        decoder.push(&MonHw { jam_ind: 11, flags: 0 }.to_frame_bytes());

        let frame = decoder.next_frame().expect("second frame");
        assert_eq!(MonHw::parse(&frame.payload).unwrap().jam_ind, 11);
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn test_decoder_rejects_implausible_length() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&[SYNC_1, SYNC_2, 0x0A, 0x09, 0xFF, 0xFF]);
        decoder.push(&MonHw { jam_ind: 5, flags: 0 }.to_frame_bytes());

        let frame = decoder.next_frame().expect("valid frame after bogus header");
        assert_eq!(MonHw::parse(&frame.payload).unwrap().jam_ind, 5);
    }

    #[test]
    fn test_mon_hw_wrong_length_is_decode_error() {
        let err = MonHw::parse(&[0u8; 68]).unwrap_err();
        match err {
            DeviceError::Decode(msg) => assert!(msg.contains("68")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
