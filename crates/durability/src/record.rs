//! State journal record format (spec.md §6).
//!
//! Every record is big-endian and length-prefixed by the journal. We add a
//! trailing CRC32 over the payload — an ambient durability concern, not a
//! feature any Non-goal excludes (see SPEC_FULL.md §4.5).
//!
//! The COMMIT record additionally carries its write set (the list of
//! `CellHash` the transaction wrote) and a BEGIN record is introduced.
//! Neither appears in the abstract wire format of spec.md §6, but both are
//! required to satisfy spec.md §4.5's own recovery contract: "COMMIT(Ts,Tc)
//! records rebuild B" only holds if B's per-cell entries (keyed on write
//! set, not just Ts/Tc) are recoverable, and "BEGIN records without
//! terminal records re-enter C as live" presupposes a BEGIN record exists.
//! See DESIGN.md for this Open Question's resolution.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};
use thiserror::Error;
use tso_core::{CellHash, Timestamp};

const TAG_BEGIN: u8 = 0x00;
const TAG_COMMIT: u8 = 0x01;
const TAG_ABORT: u8 = 0x02;
const TAG_LOW_WATERMARK_ADVANCE: u8 = 0x03;

/// One mutation the state machine has asked the journal to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// `0x00 | Ts` — a transaction has begun and entered the uncommitted
    /// set. Needed so recovery can re-enter still-live transactions into
    /// C without having observed their terminal record.
    Begin { ts: Timestamp },
    /// `0x01 | Ts | Tc | count:u32 | cellHash...` — a committed
    /// transaction together with the write set it staked in B.
    Commit {
        ts: Timestamp,
        tc: Timestamp,
        write_set: Vec<CellHash>,
    },
    /// `0x02 | Ts` — an aborted transaction (half or full; replay treats
    /// any abort record as final, per spec.md §6).
    Abort { ts: Timestamp },
    /// `0x03 | L` — a periodic low-watermark checkpoint, so recovery does
    /// not have to reconstruct `L` purely from replaying evictions.
    LowWatermarkAdvance { watermark: Timestamp },
}

/// Errors decoding a journal record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordDecodeError {
    /// The record was shorter than its tag requires.
    #[error("truncated record")]
    Truncated,
    /// An unrecognized tag byte.
    #[error("unknown record tag: {0:#x}")]
    UnknownTag(u8),
    /// The payload's CRC32 did not match the trailing checksum.
    #[error("checksum mismatch")]
    ChecksumMismatch,
}

impl JournalRecord {
    /// Encode the tagged payload (without the length prefix or checksum
    /// the journal itself adds; see `encode_framed`).
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(17);
        match self {
            JournalRecord::Begin { ts } => {
                buf.write_u8(TAG_BEGIN).unwrap();
                buf.write_u64::<BigEndian>(ts.get()).unwrap();
            }
            JournalRecord::Commit { ts, tc, write_set } => {
                buf.write_u8(TAG_COMMIT).unwrap();
                buf.write_u64::<BigEndian>(ts.get()).unwrap();
                buf.write_u64::<BigEndian>(tc.get()).unwrap();
                buf.write_u32::<BigEndian>(write_set.len() as u32).unwrap();
                for cell in write_set {
                    buf.write_u64::<BigEndian>(cell.get()).unwrap();
                }
            }
            JournalRecord::Abort { ts } => {
                buf.write_u8(TAG_ABORT).unwrap();
                buf.write_u64::<BigEndian>(ts.get()).unwrap();
            }
            JournalRecord::LowWatermarkAdvance { watermark } => {
                buf.write_u8(TAG_LOW_WATERMARK_ADVANCE).unwrap();
                buf.write_u64::<BigEndian>(watermark.get()).unwrap();
            }
        }
        buf
    }

    /// Decode a tagged payload back into a record.
    pub fn decode_payload(payload: &[u8]) -> Result<Self, RecordDecodeError> {
        let mut cursor = Cursor::new(payload);
        let tag = cursor.read_u8().map_err(|_| RecordDecodeError::Truncated)?;
        match tag {
            TAG_BEGIN => {
                let ts = cursor
                    .read_u64::<BigEndian>()
                    .map_err(|_| RecordDecodeError::Truncated)?;
                Ok(JournalRecord::Begin {
                    ts: Timestamp::new(ts),
                })
            }
            TAG_COMMIT => {
                let ts = cursor
                    .read_u64::<BigEndian>()
                    .map_err(|_| RecordDecodeError::Truncated)?;
                let tc = cursor
                    .read_u64::<BigEndian>()
                    .map_err(|_| RecordDecodeError::Truncated)?;
                let count = cursor
                    .read_u32::<BigEndian>()
                    .map_err(|_| RecordDecodeError::Truncated)?;
                let mut write_set = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let raw = cursor
                        .read_u64::<BigEndian>()
                        .map_err(|_| RecordDecodeError::Truncated)?;
                    write_set.push(CellHash::from_raw(raw));
                }
                Ok(JournalRecord::Commit {
                    ts: Timestamp::new(ts),
                    tc: Timestamp::new(tc),
                    write_set,
                })
            }
            TAG_ABORT => {
                let ts = cursor
                    .read_u64::<BigEndian>()
                    .map_err(|_| RecordDecodeError::Truncated)?;
                Ok(JournalRecord::Abort {
                    ts: Timestamp::new(ts),
                })
            }
            TAG_LOW_WATERMARK_ADVANCE => {
                let l = cursor
                    .read_u64::<BigEndian>()
                    .map_err(|_| RecordDecodeError::Truncated)?;
                Ok(JournalRecord::LowWatermarkAdvance {
                    watermark: Timestamp::new(l),
                })
            }
            other => Err(RecordDecodeError::UnknownTag(other)),
        }
    }
}

/// Frame a record for the append log: `[u32 len][payload][u32 crc32]`.
pub fn encode_framed(record: &JournalRecord) -> Vec<u8> {
    let payload = record.encode_payload();
    let crc = crc32fast::hash(&payload);
    let mut framed = Vec::with_capacity(8 + payload.len());
    framed
        .write_u32::<BigEndian>(payload.len() as u32)
        .unwrap();
    framed.extend_from_slice(&payload);
    framed.write_u32::<BigEndian>(crc).unwrap();
    framed
}

/// Read every complete, checksum-valid framed record from `bytes`.
///
/// Stops (without error) at the first truncated or torn trailing frame —
/// the conservative stance recovery takes on an incomplete last write,
/// matching the oracle's range store tolerance for a torn tail.
pub fn decode_all_framed(bytes: &[u8]) -> Result<Vec<JournalRecord>, RecordDecodeError> {
    let mut records = Vec::new();
    let mut cursor = Cursor::new(bytes);
    loop {
        let start_pos = cursor.position();
        let len = match cursor.read_u32::<BigEndian>() {
            Ok(len) => len,
            Err(_) => break,
        };
        let mut payload = vec![0u8; len as usize];
        if cursor.read_exact(&mut payload).is_err() {
            cursor.set_position(start_pos);
            break;
        }
        let crc = match cursor.read_u32::<BigEndian>() {
            Ok(crc) => crc,
            Err(_) => {
                cursor.set_position(start_pos);
                break;
            }
        };
        if crc32fast::hash(&payload) != crc {
            return Err(RecordDecodeError::ChecksumMismatch);
        }
        records.push(JournalRecord::decode_payload(&payload)?);
    }
    Ok(records)
}
