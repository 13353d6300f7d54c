use thiserror::Error;

use crate::tuya::structs::Datapoint;

/// Custom error types for datapoint frame parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Payload truncated, {needed} more bytes needed at offset {offset}")]
    Truncated { offset: usize, needed: usize },
    #[error("Unknown datapoint type tag 0x{0:02x}")]
    UnknownType(u8),
}

/// Splits a raw cluster payload into datapoint records.
///
/// Data commands carry a rolling big endian u16 sequence counter in front of
/// the records, `with_seq` strips and returns it. Record payloads are kept as
/// raw bytes here, typing happens on access via `Datapoint::value()`.
pub fn decode(payload: &[u8], with_seq: bool) -> Result<(Option<u32>, Vec<Datapoint>), CodecError> {
    let mut pos: usize = 0;
    let mut seq: Option<u32> = None;

    if with_seq {
        if payload.len() < 2 {
            return Err(CodecError::Truncated { offset: 0, needed: 2 - payload.len() });
        }
        seq = Some(u16::from_be_bytes([payload[0], payload[1]]) as u32);
        pos = 2;
    }

    let mut datapoints: Vec<Datapoint> = Vec::new();

    while pos < payload.len() {
        /* Record header: u8 dp id, u8 type tag, u16 big endian length */
        if payload.len() - pos < 4 {
            return Err(CodecError::Truncated { offset: pos, needed: 4 - (payload.len() - pos) });
        }

        let dp = payload[pos];
        let type_tag = payload[pos + 1];
        let len = u16::from_be_bytes([payload[pos + 2], payload[pos + 3]]) as usize;
        pos += 4;

        if payload.len() - pos < len {
            return Err(CodecError::Truncated { offset: pos, needed: len - (payload.len() - pos) });
        }

        datapoints.push(Datapoint {
            dp: dp,
            type_tag: type_tag,
            data: payload[pos..pos + len].to_vec(),
        });
        pos += len;
    }

    return Ok((seq, datapoints));
}

/// Serializes one datapoint record, header plus payload
pub fn encode(dp: &Datapoint) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::with_capacity(4 + dp.data.len());
    out.push(dp.dp);
    out.push(dp.type_tag);
    out.extend_from_slice(&(dp.data.len() as u16).to_be_bytes());
    out.extend_from_slice(&dp.data);
    return out;
}

/// Serializes a full dataRequest payload, sequence counter first
pub fn encode_request(seq: u16, datapoints: &[Datapoint]) -> Vec<u8> {
    let mut out: Vec<u8> = seq.to_be_bytes().to_vec();
    for dp in datapoints {
        out.extend_from_slice(&encode(dp));
    }
    return out;
}

/* Payload builders for the MCU housekeeping commands. These commands use a
   u16 payload size prefix instead of the datapoint record format. */

/// mcuSyncTime reply: both timestamps are seconds since 1970, big endian
pub fn encode_mcu_sync_time(utc_secs: u32, tz_offset_secs: i32) -> Vec<u8> {
    let local_secs = utc_secs.wrapping_add(tz_offset_secs as u32);
    let mut out: Vec<u8> = Vec::with_capacity(10);
    out.extend_from_slice(&8u16.to_be_bytes());
    out.extend_from_slice(&utc_secs.to_be_bytes());
    out.extend_from_slice(&local_secs.to_be_bytes());
    return out;
}

/// mcuVersionRequest carries nothing but a request sequence number
pub fn encode_mcu_version_request(seq: u16) -> Vec<u8> {
    return seq.to_be_bytes().to_vec();
}

/// mcuGatewayConnectionStatus reply, status byte 1 means connected
pub fn encode_gateway_status_ok() -> Vec<u8> {
    return vec![0x00, 0x01, 0x01];
}

/// mcuVersionResponse payload: request sequence number and the version byte
pub fn decode_version_response(payload: &[u8]) -> Result<(u16, u8), CodecError> {
    if payload.len() < 3 {
        return Err(CodecError::Truncated { offset: 0, needed: 3 - payload.len() });
    }
    let seq = u16::from_be_bytes([payload[0], payload[1]]);
    return Ok((seq, payload[2]));
}
