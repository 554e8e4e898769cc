//! Log frame format.
//!
//! ```text
//! | magic "MSLG" (4) | version u16 LE | type u8 | length u32 LE | header crc32 | payload | crc32 |
//! ```
//!
//! The payload is a CBOR list of [`LogOp`]s. The header CRC covers the eleven
//! bytes before it, so a damaged length is caught before it is trusted. The
//! trailing CRC covers header and payload.

use crate::error::{StoreError, StoreResult};
use crate::types::{
    CachedEntity, ContainerId, DeadLetterEntry, KeyVaultRecord, LockoutRecord, Mutation,
    SyncCursor,
};
use serde::{Deserialize, Serialize};

/// Magic bytes opening every frame.
pub const LOG_MAGIC: [u8; 4] = *b"MSLG";

/// Current frame format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
const HEADER_FIELDS: usize = 11;

/// Header fields plus their CRC.
pub(crate) const HEADER_SIZE: usize = HEADER_FIELDS + 4;

pub(crate) const CRC_SIZE: usize = 4;

/// Largest payload a frame may carry.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// Type of a log frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// A committed transaction.
    Commit = 1,
}

impl FrameType {
    /// Converts a byte to a frame type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Commit),
            _ => None,
        }
    }

    /// Converts the frame type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One write inside a transaction frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOp {
    /// Upsert a cached entity.
    PutEntity(CachedEntity),
    /// Remove a cached entity.
    DeleteEntity {
        /// Parent container.
        container: ContainerId,
        /// Entity id.
        id: String,
    },
    /// Drop every entity and the cursor of a container.
    ClearContainer(ContainerId),
    /// Insert or replace a queued mutation.
    PutMutation(Mutation),
    /// Remove a queued mutation.
    RemoveMutation {
        /// Sequence number.
        seq: u64,
    },
    /// Insert a dead-letter entry.
    PutDeadLetter(DeadLetterEntry),
    /// Remove a dead-letter entry.
    RemoveDeadLetter {
        /// Sequence number of the dead mutation.
        seq: u64,
    },
    /// Advance a sync cursor.
    PutCursor(SyncCursor),
    /// Write the key vault.
    PutVault(KeyVaultRecord),
    /// Remove the key vault.
    ClearVault,
    /// Write the lockout record.
    PutLockout(LockoutRecord),
}

/// Encodes one transaction as a complete frame.
pub(crate) fn encode_frame(ops: &[LogOp]) -> StoreResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::ser::into_writer(ops, &mut payload)
        .map_err(|e| StoreError::codec(e.to_string()))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|_| payload.len() <= MAX_PAYLOAD_LEN)
        .ok_or_else(|| StoreError::codec(format!("transaction of {} bytes", payload.len())))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    frame.extend_from_slice(&LOG_MAGIC);
    frame.extend_from_slice(&LOG_VERSION.to_le_bytes());
    frame.push(FrameType::Commit.as_byte());
    frame.extend_from_slice(&len.to_le_bytes());
    let header_crc = compute_crc32(&frame);
    frame.extend_from_slice(&header_crc.to_le_bytes());
    frame.extend_from_slice(&payload);
    let crc = compute_crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// How a scan of the log ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScanEnd {
    /// Every byte belongs to a valid frame.
    Clean,
    /// The log ends in an incomplete frame starting at `offset`.
    TornTail { offset: u64 },
    /// A damaged frame starts at `offset`.
    Corrupt { offset: u64, message: String },
}

/// Result of scanning the log.
#[derive(Debug)]
pub(crate) struct LogScan {
    pub frames: u64,
    pub valid_len: u64,
    pub end: ScanEnd,
}

/// Walks every frame in `bytes`, handing decoded transactions to `on_frame`.
///
/// - An incomplete trailing frame is a torn write and ends the log. Only a
///   frame whose header checks out can be torn, since a damaged length
///   would otherwise swallow every later frame.
/// - A CRC mismatch in the final frame is also a torn write.
/// - Bad magic, a header CRC mismatch, unknown version or type, an
///   oversized length, a CRC mismatch followed by more frames, or an
///   undecodable payload is corruption.
pub(crate) fn scan(bytes: &[u8], mut on_frame: impl FnMut(u64, Vec<LogOp>)) -> LogScan {
    let total = bytes.len();
    let mut offset = 0usize;
    let mut frames = 0u64;

    let end = loop {
        if offset == total {
            break ScanEnd::Clean;
        }
        let at = offset as u64;
        if total - offset < HEADER_SIZE {
            break ScanEnd::TornTail { offset: at };
        }

        let header = &bytes[offset..offset + HEADER_SIZE];
        if header[0..4] != LOG_MAGIC {
            break ScanEnd::Corrupt {
                offset: at,
                message: "bad frame magic".into(),
            };
        }
        let stored_header = u32::from_le_bytes([header[11], header[12], header[13], header[14]]);
        if stored_header != compute_crc32(&header[..HEADER_FIELDS]) {
            break ScanEnd::Corrupt {
                offset: at,
                message: "header checksum mismatch".into(),
            };
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != LOG_VERSION {
            break ScanEnd::Corrupt {
                offset: at,
                message: format!("unsupported frame version {version}"),
            };
        }
        if FrameType::from_byte(header[6]).is_none() {
            break ScanEnd::Corrupt {
                offset: at,
                message: format!("unknown frame type {}", header[6]),
            };
        }
        let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        if len > MAX_PAYLOAD_LEN {
            break ScanEnd::Corrupt {
                offset: at,
                message: format!("frame length {len} exceeds {MAX_PAYLOAD_LEN}"),
            };
        }

        let body_end = offset + HEADER_SIZE + len;
        let frame_end = body_end + CRC_SIZE;
        if frame_end > total {
            break ScanEnd::TornTail { offset: at };
        }

        let stored = u32::from_le_bytes([
            bytes[body_end],
            bytes[body_end + 1],
            bytes[body_end + 2],
            bytes[body_end + 3],
        ]);
        let actual = compute_crc32(&bytes[offset..body_end]);
        if stored != actual {
            if frame_end == total {
                break ScanEnd::TornTail { offset: at };
            }
            break ScanEnd::Corrupt {
                offset: at,
                message: format!("checksum mismatch: expected {stored:08x}, got {actual:08x}"),
            };
        }

        let payload = &bytes[offset + HEADER_SIZE..body_end];
        match ciborium::de::from_reader::<Vec<LogOp>, _>(payload) {
            Ok(ops) => on_frame(at, ops),
            Err(e) => {
                break ScanEnd::Corrupt {
                    offset: at,
                    message: format!("undecodable frame: {e}"),
                };
            }
        }

        frames += 1;
        offset = frame_end;
    };

    LogScan {
        frames,
        valid_len: offset as u64,
        end,
    }
}

/// Computes the CRC-32 (IEEE) checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
