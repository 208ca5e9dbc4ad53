//! Well-known TLV ids and the typed request/response pair used by the clock
//! sync exchange — spec.md §6, grounded on `original_source/ILTM_V3/NTP_Client.h`'s
//! `startSync()`/`handleSyncResponse()`.

use crate::tlv::{decode, write_cmd, write_u32, write_u64, TlvError, TlvValue};
use std::collections::BTreeMap;

/// Field ids shared by every sync packet.
pub mod ids {
    pub const CMD: u8 = 0x01;
    pub const PKT_ID: u8 = 0x02;
    pub const T1: u8 = 0x03;
    pub const T2: u8 = 0x04;
    pub const T3: u8 = 0x05;
}

/// Values carried in the `cmd` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    SyncReq = 1,
    SyncResp = 2,
}

impl Cmd {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Cmd::SyncReq),
            2 => Some(Cmd::SyncResp),
            _ => None,
        }
    }
}

fn required_u32(map: &BTreeMap<u8, TlvValue>, id: u8) -> Result<u32, TlvError> {
    map.get(&id)
        .and_then(TlvValue::as_u32)
        .ok_or(TlvError::MalformedTlv("missing required u32 field"))
}

fn required_u64(map: &BTreeMap<u8, TlvValue>, id: u8) -> Result<u64, TlvError> {
    map.get(&id)
        .and_then(TlvValue::as_u64)
        .ok_or(TlvError::MalformedTlv("missing required u64 field"))
}

/// The originate-timestamp request: `pktId` identifies the exchange so a
/// late or duplicate response can be discarded; `t1` is the sender's local
/// clock at the moment of send. `pktId` is always carried as `U32`, never
/// truncated to 16 bits the way the legacy firmware class did it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    pub pkt_id: u32,
    pub t1: u64,
}

impl SyncRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_cmd(ids::CMD, Cmd::SyncReq as u8, &mut out);
        write_u32(ids::PKT_ID, self.pkt_id, &mut out);
        write_u64(ids::T1, self.t1, &mut out);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, TlvError> {
        let map = decode(data)?;
        let cmd = map
            .get(&ids::CMD)
            .and_then(TlvValue::as_u8)
            .and_then(Cmd::from_u8)
            .ok_or(TlvError::MalformedTlv("missing or unknown cmd"))?;
        if cmd != Cmd::SyncReq {
            return Err(TlvError::MalformedTlv("not a sync request"));
        }
        Ok(Self {
            pkt_id: required_u32(&map, ids::PKT_ID)?,
            t1: required_u64(&map, ids::T1)?,
        })
    }
}

/// The response, echoing `t1` and adding `t2` (request received) and `t3`
/// (response sent), both on the responder's clock. The requester records
/// `t4` itself on receipt and computes offset/delay from the four stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncResponse {
    pub pkt_id: u32,
    pub t1: u64,
    pub t2: u64,
    pub t3: u64,
}

impl SyncResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_cmd(ids::CMD, Cmd::SyncResp as u8, &mut out);
        write_u32(ids::PKT_ID, self.pkt_id, &mut out);
        write_u64(ids::T1, self.t1, &mut out);
        write_u64(ids::T2, self.t2, &mut out);
        write_u64(ids::T3, self.t3, &mut out);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, TlvError> {
        let map = decode(data)?;
        let cmd = map
            .get(&ids::CMD)
            .and_then(TlvValue::as_u8)
            .and_then(Cmd::from_u8)
            .ok_or(TlvError::MalformedTlv("missing or unknown cmd"))?;
        if cmd != Cmd::SyncResp {
            return Err(TlvError::MalformedTlv("not a sync response"));
        }
        Ok(Self {
            pkt_id: required_u32(&map, ids::PKT_ID)?,
            t1: required_u64(&map, ids::T1)?,
            t2: required_u64(&map, ids::T2)?,
            t3: required_u64(&map, ids::T3)?,
        })
    }
}
