//! Minimal MAVLink v1/v2 framing for the handful of messages the
//! autopilot backend needs.
//!
//! Frames are located by their start byte, length-checked and verified with
//! the X.25 checksum seeded by each message's CRC extra. Messages without a
//! known CRC extra are still framed (v2 padding makes them skippable) and
//! surface as [`Message::Other`].

use std::collections::VecDeque;

pub const STX_V1: u8 = 0xFE;
pub const STX_V2: u8 = 0xFD;

const HEADER_V1: usize = 6;
const HEADER_V2: usize = 10;
const CHECKSUM_LEN: usize = 2;
const SIGNATURE_LEN: usize = 13;
const INCOMPAT_SIGNED: u8 = 0x01;

pub const MSG_HEARTBEAT: u32 = 0;
pub const MSG_GPS_RAW_INT: u32 = 24;
pub const MSG_REQUEST_DATA_STREAM: u32 = 66;
pub const MSG_VFR_HUD: u32 = 74;

/// Data stream carrying GPS_RAW_INT and friends.
pub const STREAM_POSITION: u8 = 6;

const GPS_RAW_INT_LEN: usize = 30;
const VFR_HUD_LEN: usize = 20;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("checksum mismatch on message {msgid}: frame {received:#06x}, computed {computed:#06x}")]
    Checksum {
        msgid: u32,
        received: u16,
        computed: u16,
    },
    #[error("message {msgid} payload of {len} bytes is too short")]
    ShortPayload { msgid: u32, len: usize },
}

/// One X.25 (CRC-16/MCRF4XX) step.
pub fn crc_accumulate(byte: u8, crc: u16) -> u16 {
    let mut tmp = byte ^ (crc & 0xFF) as u8;
    tmp ^= tmp << 4;
    let tmp = u16::from(tmp);
    (crc >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4)
}

pub fn x25_crc(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0xFFFF, |crc, &b| crc_accumulate(b, crc))
}

/// Per-message CRC seed derived from the message definition.
pub fn crc_extra(msgid: u32) -> Option<u8> {
    match msgid {
        MSG_HEARTBEAT => Some(50),
        MSG_GPS_RAW_INT => Some(24),
        MSG_REQUEST_DATA_STREAM => Some(148),
        MSG_VFR_HUD => Some(20),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub sequence: u8,
    pub system_id: u8,
    pub component_id: u8,
    pub msgid: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn message(&self) -> Result<Message, FrameError> {
        Message::decode(self.msgid, &self.payload)
    }
}

/// Streaming frame extractor; feed it arbitrary chunks of channel bytes.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: VecDeque<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete frame, `None` when more bytes are needed.
    ///
    /// A frame with a bad checksum is reported and only its start marker is
    /// dropped, so a genuine frame hiding behind a stray marker byte is still
    /// found on the next call.
    pub fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        while let Some(&first) = self.buffer.front() {
            if first == STX_V1 || first == STX_V2 {
                break;
            }
            self.buffer.pop_front();
        }
        let stx = *self.buffer.front()?;
        if self.buffer.len() < 3 {
            return None;
        }
        let payload_len = usize::from(self.buffer[1]);
        let (header_len, trailer_len) = if stx == STX_V1 {
            (HEADER_V1, CHECKSUM_LEN)
        } else if self.buffer[2] & INCOMPAT_SIGNED != 0 {
            (HEADER_V2, CHECKSUM_LEN + SIGNATURE_LEN)
        } else {
            (HEADER_V2, CHECKSUM_LEN)
        };
        let total = header_len + payload_len + trailer_len;
        if self.buffer.len() < total {
            return None;
        }

        let raw: Vec<u8> = self.buffer.iter().take(total).copied().collect();
        let (version, sequence, system_id, component_id, msgid) = if stx == STX_V1 {
            (1, raw[2], raw[3], raw[4], u32::from(raw[5]))
        } else {
            let msgid = u32::from(raw[7]) | u32::from(raw[8]) << 8 | u32::from(raw[9]) << 16;
            (2, raw[4], raw[5], raw[6], msgid)
        };
        let crc_end = header_len + payload_len;

        // Unknown definitions cannot be verified; hand them over untouched.
        if let Some(extra) = crc_extra(msgid) {
            let computed = crc_accumulate(extra, x25_crc(&raw[1..crc_end]));
            let received = u16::from_le_bytes([raw[crc_end], raw[crc_end + 1]]);
            if computed != received {
                self.buffer.pop_front();
                return Some(Err(FrameError::Checksum {
                    msgid,
                    received,
                    computed,
                }));
            }
        }
        self.buffer.drain(..total);
        Some(Ok(Frame {
            version,
            sequence,
            system_id,
            component_id,
            msgid,
            payload: raw[header_len..crc_end].to_vec(),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsRawInt {
    pub time_usec: u64,
    pub lat_e7: i32,
    pub lon_e7: i32,
    pub alt_mm: i32,
    pub eph: u16,
    pub epv: u16,
    pub vel: u16,
    pub cog: u16,
    pub fix_type: u8,
    pub satellites_visible: u8,
}

impl GpsRawInt {
    pub fn latitude(&self) -> f64 {
        f64::from(self.lat_e7) / 1e7
    }

    pub fn longitude(&self) -> f64 {
        f64::from(self.lon_e7) / 1e7
    }

    /// Altitude in metres; zero means the receiver did not report one.
    pub fn altitude_m(&self) -> Option<f64> {
        (self.alt_mm != 0).then(|| f64::from(self.alt_mm) / 1000.0)
    }

    /// 2D fix or better.
    pub fn has_fix(&self) -> bool {
        self.fix_type >= 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VfrHud {
    pub airspeed: f32,
    pub groundspeed: f32,
    pub alt: f32,
    pub climb: f32,
    pub heading: i16,
    pub throttle: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Heartbeat,
    GpsRawInt(GpsRawInt),
    VfrHud(VfrHud),
    Other(u32),
}

/// v2 strips trailing zero bytes from payloads; restore them before decoding.
fn padded(payload: &[u8], len: usize) -> Vec<u8> {
    let mut bytes = payload.to_vec();
    if bytes.len() < len {
        bytes.resize(len, 0);
    }
    bytes
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn i32_at(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn f32_at(bytes: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

impl Message {
    pub fn decode(msgid: u32, payload: &[u8]) -> Result<Message, FrameError> {
        if payload.is_empty() && msgid != MSG_HEARTBEAT && crc_extra(msgid).is_some() {
            return Err(FrameError::ShortPayload {
                msgid,
                len: payload.len(),
            });
        }
        Ok(match msgid {
            MSG_HEARTBEAT => Message::Heartbeat,
            MSG_GPS_RAW_INT => {
                let p = padded(payload, GPS_RAW_INT_LEN);
                let mut time = [0u8; 8];
                time.copy_from_slice(&p[0..8]);
                Message::GpsRawInt(GpsRawInt {
                    time_usec: u64::from_le_bytes(time),
                    lat_e7: i32_at(&p, 8),
                    lon_e7: i32_at(&p, 12),
                    alt_mm: i32_at(&p, 16),
                    eph: u16_at(&p, 20),
                    epv: u16_at(&p, 22),
                    vel: u16_at(&p, 24),
                    cog: u16_at(&p, 26),
                    fix_type: p[28],
                    satellites_visible: p[29],
                })
            }
            MSG_VFR_HUD => {
                let p = padded(payload, VFR_HUD_LEN);
                Message::VfrHud(VfrHud {
                    airspeed: f32_at(&p, 0),
                    groundspeed: f32_at(&p, 4),
                    alt: f32_at(&p, 8),
                    climb: f32_at(&p, 12),
                    heading: u16_at(&p, 16) as i16,
                    throttle: u16_at(&p, 18),
                })
            }
            other => Message::Other(other),
        })
    }
}

/// REQUEST_DATA_STREAM payload asking the vehicle to start a stream.
pub fn request_data_stream(
    target_system: u8,
    target_component: u8,
    stream_id: u8,
    rate_hz: u16,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(6);
    payload.extend_from_slice(&rate_hz.to_le_bytes());
    payload.push(target_system);
    payload.push(target_component);
    payload.push(stream_id);
    payload.push(1);
    payload
}

/// Serialises a v1 frame. `msgid` must fit in a byte and have a CRC extra.
pub fn encode_v1(
    sequence: u8,
    system_id: u8,
    component_id: u8,
    msgid: u8,
    payload: &[u8],
) -> Option<Vec<u8>> {
    let extra = crc_extra(u32::from(msgid))?;
    let len = u8::try_from(payload.len()).ok()?;
    let mut frame = Vec::with_capacity(HEADER_V1 + payload.len() + CHECKSUM_LEN);
    frame.extend_from_slice(&[STX_V1, len, sequence, system_id, component_id, msgid]);
    frame.extend_from_slice(payload);
    let crc = crc_accumulate(extra, x25_crc(&frame[1..]));
    frame.extend_from_slice(&crc.to_le_bytes());
    Some(frame)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn gps_payload(lat_e7: i32, lon_e7: i32, alt_mm: i32, fix_type: u8, sats: u8) -> Vec<u8> {
        let mut p = Vec::with_capacity(GPS_RAW_INT_LEN);
        p.extend_from_slice(&123_456u64.to_le_bytes());
        p.extend_from_slice(&lat_e7.to_le_bytes());
        p.extend_from_slice(&lon_e7.to_le_bytes());
        p.extend_from_slice(&alt_mm.to_le_bytes());
        for field in [120u16, 200, 0, 9000] {
            p.extend_from_slice(&field.to_le_bytes());
        }
        p.push(fix_type);
        p.push(sats);
        p
    }

    pub(crate) fn hud_payload(heading: i16) -> Vec<u8> {
        let mut p = Vec::with_capacity(VFR_HUD_LEN);
        for value in [0.0f32, 3.5, 12.0, 0.1] {
            p.extend_from_slice(&value.to_le_bytes());
        }
        p.extend_from_slice(&heading.to_le_bytes());
        p.extend_from_slice(&40u16.to_le_bytes());
        p
    }

    fn encode_v2(msgid: u32, payload: &[u8], signed: bool) -> Vec<u8> {
        let mut trimmed = payload.to_vec();
        while trimmed.len() > 1 && trimmed.last() == Some(&0) {
            trimmed.pop();
        }
        let incompat = if signed { INCOMPAT_SIGNED } else { 0 };
        let id = msgid.to_le_bytes();
        let mut frame = vec![STX_V2, trimmed.len() as u8, incompat, 0, 7, 1, 1, id[0], id[1], id[2]];
        frame.extend_from_slice(&trimmed);
        let crc = crc_accumulate(crc_extra(msgid).unwrap(), x25_crc(&frame[1..]));
        frame.extend_from_slice(&crc.to_le_bytes());
        if signed {
            frame.extend_from_slice(&[0xAA; SIGNATURE_LEN]);
        }
        frame
    }

    #[test]
    fn x25_matches_reference_check_value() {
        // CRC-16/MCRF4XX check value for "123456789".
        assert_eq!(x25_crc(b"123456789"), 0x6F91);
    }

    #[test]
    fn v1_gps_frame_decodes() {
        let payload = gps_payload(286_139_000, 772_090_000, 10_000, 3, 9);
        let frame = encode_v1(4, 1, 1, MSG_GPS_RAW_INT as u8, &payload).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.push(&[0x00, 0x13]);
        decoder.push(&frame);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.version, 1);
        assert_eq!(frame.sequence, 4);
        match frame.message().unwrap() {
            Message::GpsRawInt(gps) => {
                assert!((gps.latitude() - 28.6139).abs() < 1e-9);
                assert!((gps.longitude() - 77.2090).abs() < 1e-9);
                assert_eq!(gps.altitude_m(), Some(10.0));
                assert_eq!(gps.satellites_visible, 9);
                assert!(gps.has_fix());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn split_frames_wait_for_more_bytes() {
        let frame = encode_v1(0, 1, 1, MSG_HEARTBEAT as u8, &[0; 9]).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.push(&frame[..5]);
        assert!(decoder.next_frame().is_none());
        decoder.push(&frame[5..]);
        assert_eq!(
            decoder.next_frame().unwrap().unwrap().message().unwrap(),
            Message::Heartbeat
        );
    }

    #[test]
    fn v2_truncated_and_signed_frames_decode() {
        // Zero altitude and trailing zero fields are truncated on the wire.
        let payload = gps_payload(10_000_000, 20_000_000, 0, 0, 0);
        let mut decoder = FrameDecoder::new();
        decoder.push(&encode_v2(MSG_GPS_RAW_INT, &payload, true));
        decoder.push(&encode_v2(MSG_VFR_HUD, &hud_payload(271), false));

        match decoder.next_frame().unwrap().unwrap().message().unwrap() {
            Message::GpsRawInt(gps) => {
                assert_eq!(gps.altitude_m(), None);
                assert!(!gps.has_fix());
                assert_eq!(gps.latitude(), 1.0);
            }
            other => panic!("unexpected {:?}", other),
        }
        match decoder.next_frame().unwrap().unwrap().message().unwrap() {
            Message::VfrHud(hud) => assert_eq!(hud.heading, 271),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn corrupted_frame_is_reported_then_skipped() {
        let mut bad = encode_v1(0, 1, 1, MSG_HEARTBEAT as u8, &[0; 9]).unwrap();
        bad[7] ^= 0xFF;
        let good = encode_v1(1, 1, 1, MSG_HEARTBEAT as u8, &[0; 9]).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.push(&bad);
        decoder.push(&good);
        assert!(matches!(
            decoder.next_frame(),
            Some(Err(FrameError::Checksum { msgid: 0, .. }))
        ));
        assert_eq!(decoder.next_frame().unwrap().unwrap().sequence, 1);
    }

    #[test]
    fn stray_marker_does_not_swallow_the_next_frame() {
        let good = encode_v1(1, 1, 1, MSG_HEARTBEAT as u8, &[0; 9]).unwrap();
        let mut decoder = FrameDecoder::new();
        // Reads as a one-byte heartbeat whose checksum lands inside `good`.
        decoder.push(&[STX_V1, 0x01, 0x00, 0x00, 0x00, 0x00]);
        decoder.push(&good);
        assert!(matches!(
            decoder.next_frame(),
            Some(Err(FrameError::Checksum { msgid: 0, .. }))
        ));
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.message().unwrap(), Message::Heartbeat);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn unknown_messages_pass_through() {
        let mut frame = vec![STX_V2, 2, 0, 0, 3, 1, 1, 0x21, 0x00, 0x00, 0xAB, 0xCD];
        frame.extend_from_slice(&[0x00, 0x00]);
        let mut decoder = FrameDecoder::new();
        decoder.push(&frame);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.message().unwrap(), Message::Other(33));
    }

    #[test]
    fn data_stream_request_layout() {
        assert_eq!(
            request_data_stream(1, 190, STREAM_POSITION, 4),
            vec![4, 0, 1, 190, 6, 1]
        );
    }
}
