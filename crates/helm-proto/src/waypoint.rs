//! Waypoint records in their persisted layout and as MSP_WP / MSP_SET_WP payloads.
//!
//! A record is 20 bytes, little endian: action u8, lat i32, lon i32, alt i32, p1 i16, p2 i16,
//! p3 i16, flag u8. The MSP payload prefixes the waypoint number.
//!
//! JUMP targets are carried as given: ground stations send them 1-based, the mission store
//! keeps them 0-based. `Mission::upload` and `Mission::download` do the shift.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use helm_nav::mission::{Waypoint, WaypointAction, FLAG_LAST};
use thiserror::Error;

pub const RECORD_LEN: usize = 20;
pub const MSP_WP_LEN: usize = RECORD_LEN + 1;

/// MSP v1 function ids.
pub const MSP_WP: u8 = 118;
pub const MSP_SET_WP: u8 = 209;

const MSP_PREAMBLE: [u8; 2] = *b"$M";
/// Preamble, direction, size, function and checksum.
const MSP_V1_OVERHEAD: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("need {needed} bytes, have {available}")]
    ShortBuffer { needed: usize, available: usize },
    #[error("unknown waypoint action {0}")]
    UnknownAction(u8),
    #[error("bad waypoint flag {0:#04x}")]
    BadFlag(u8),
    #[error("malformed MSP frame: {0}")]
    BadFrame(&'static str),
    #[error("MSP checksum {got:#04x}, expected {expected:#04x}")]
    Checksum { got: u8, expected: u8 },
}

fn ensure_len(buf: &impl Buf, needed: usize) -> Result<(), CodecError> {
    let available = buf.remaining();
    if available < needed {
        return Err(CodecError::ShortBuffer { needed, available });
    }
    Ok(())
}

pub fn put_record(buf: &mut impl BufMut, wp: &Waypoint) {
    buf.put_u8(wp.action as u8);
    buf.put_i32_le(wp.lat);
    buf.put_i32_le(wp.lon);
    buf.put_i32_le(wp.alt);
    buf.put_i16_le(wp.p1);
    buf.put_i16_le(wp.p2);
    buf.put_i16_le(wp.p3);
    buf.put_u8(wp.flag);
}

pub fn get_record(buf: &mut impl Buf) -> Result<Waypoint, CodecError> {
    ensure_len(buf, RECORD_LEN)?;
    let raw_action = buf.get_u8();
    let action = WaypointAction::try_from(raw_action).map_err(|e| CodecError::UnknownAction(e.0))?;
    let wp = Waypoint {
        action,
        lat: buf.get_i32_le(),
        lon: buf.get_i32_le(),
        alt: buf.get_i32_le(),
        p1: buf.get_i16_le(),
        p2: buf.get_i16_le(),
        p3: buf.get_i16_le(),
        flag: buf.get_u8(),
    };
    if wp.flag != 0 && wp.flag != FLAG_LAST {
        return Err(CodecError::BadFlag(wp.flag));
    }
    Ok(wp)
}

/// Persisted list: records back to back.
pub fn encode_list(wps: &[Waypoint]) -> Bytes {
    let mut buf = BytesMut::with_capacity(wps.len() * RECORD_LEN);
    for wp in wps {
        put_record(&mut buf, wp);
    }
    buf.freeze()
}

pub fn decode_list(mut data: &[u8]) -> Result<Vec<Waypoint>, CodecError> {
    let mut out = Vec::with_capacity(data.len() / RECORD_LEN);
    while data.has_remaining() {
        out.push(get_record(&mut data)?);
    }
    Ok(out)
}

pub fn encode_msp_wp(number: u8, wp: &Waypoint) -> Bytes {
    let mut buf = BytesMut::with_capacity(MSP_WP_LEN);
    buf.put_u8(number);
    put_record(&mut buf, wp);
    buf.freeze()
}

pub fn decode_msp_wp(mut data: &[u8]) -> Result<(u8, Waypoint), CodecError> {
    ensure_len(&data, MSP_WP_LEN)?;
    let number = data.get_u8();
    Ok((number, get_record(&mut data)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MspDirection {
    /// `<`, to the flight controller.
    Request = b'<',
    /// `>`, from the flight controller.
    Response = b'>',
    /// `!`, function rejected.
    Error = b'!',
}

fn msp_v1_checksum(size: u8, function: u8, payload: &[u8]) -> u8 {
    payload.iter().fold(size ^ function, |crc, b| crc ^ b)
}

/// MSP v1 frame: `$M`, direction, size, function, payload, XOR checksum.
pub fn msp_v1_frame(direction: MspDirection, function: u8, payload: &[u8]) -> Result<Bytes, CodecError> {
    let size = u8::try_from(payload.len()).map_err(|_| CodecError::BadFrame("payload over 255 bytes"))?;
    let mut buf = BytesMut::with_capacity(payload.len() + MSP_V1_OVERHEAD);
    buf.put_slice(&MSP_PREAMBLE);
    buf.put_u8(direction as u8);
    buf.put_u8(size);
    buf.put_u8(function);
    buf.put_slice(payload);
    buf.put_u8(msp_v1_checksum(size, function, payload));
    Ok(buf.freeze())
}

/// Splits a complete MSP v1 frame into direction, function and payload.
pub fn parse_msp_v1(frame: &[u8]) -> Result<(MspDirection, u8, Bytes), CodecError> {
    let mut data = frame;
    ensure_len(&data, MSP_V1_OVERHEAD)?;
    if data[..2] != MSP_PREAMBLE {
        return Err(CodecError::BadFrame("missing $M preamble"));
    }
    data.advance(2);
    let direction = match data.get_u8() {
        b'<' => MspDirection::Request,
        b'>' => MspDirection::Response,
        b'!' => MspDirection::Error,
        _ => return Err(CodecError::BadFrame("unknown direction")),
    };
    let size = data.get_u8();
    let function = data.get_u8();
    ensure_len(&data, usize::from(size) + 1)?;
    let payload = Bytes::copy_from_slice(&data[..usize::from(size)]);
    data.advance(usize::from(size));
    let got = data.get_u8();
    let expected = msp_v1_checksum(size, function, &payload);
    if got != expected {
        return Err(CodecError::Checksum { got, expected });
    }
    Ok((direction, function, payload))
}
