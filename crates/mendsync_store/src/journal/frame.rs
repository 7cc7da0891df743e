//! Journal frame format.
//!
//! ```text
//! magic (4) | version (2) | length (4) | body (length) | crc32 (4)
//! ```
//!
//! Integers are little-endian. The CRC covers header and body.

use crate::error::{StoreError, StoreResult};

/// Magic bytes identifying a journal frame.
pub const FRAME_MAGIC: [u8; 4] = *b"MSJ1";

/// Current frame format version.
pub const FRAME_VERSION: u16 = 1;

const HEADER_SIZE: usize = 10;
const CRC_SIZE: usize = 4;

/// Wraps `body` in a frame.
pub fn encode_frame(body: &[u8]) -> StoreResult<Vec<u8>> {
    let len = u32::try_from(body.len())
        .map_err(|_| StoreError::codec(format!("frame body too large: {} bytes", body.len())))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len() + CRC_SIZE);
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(body);
    let crc = compute_crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Frames recovered from a journal.
#[derive(Debug, Default)]
pub struct DecodedFrames {
    /// Frame bodies in journal order.
    pub bodies: Vec<Vec<u8>>,
    /// Length of the valid prefix. Anything after it is a torn tail.
    pub valid_len: u64,
}

impl DecodedFrames {
    /// Returns true if the journal ended with an incomplete or damaged frame.
    pub fn has_torn_tail(&self, total_len: u64) -> bool {
        self.valid_len < total_len
    }
}

/// Splits journal bytes into frame bodies.
///
/// A short or checksum-failing frame at the very end is treated as a torn
/// write and excluded from `valid_len`. Damage anywhere before the last frame
/// is reported as corruption, including a length field that runs past the
/// end while intact frames still follow it.
pub fn decode_frames(data: &[u8]) -> StoreResult<DecodedFrames> {
    let mut decoded = DecodedFrames::default();
    let mut offset = 0usize;

    while offset < data.len() {
        let remaining = data.len() - offset;
        if remaining < HEADER_SIZE + CRC_SIZE {
            break;
        }

        let header = &data[offset..offset + HEADER_SIZE];
        if header[0..4] != FRAME_MAGIC {
            return Err(StoreError::corrupted(offset as u64, "invalid frame magic"));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != FRAME_VERSION {
            return Err(StoreError::corrupted(
                offset as u64,
                format!("unsupported frame version {version}"),
            ));
        }

        let body_len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;
        let total_len = HEADER_SIZE + body_len + CRC_SIZE;
        if remaining < total_len {
            if let Some(next) = find_intact_frame(data, offset + 1) {
                return Err(StoreError::corrupted(
                    offset as u64,
                    format!("frame length {body_len} overruns intact frame at offset {next}"),
                ));
            }
            break;
        }

        let body_end = offset + HEADER_SIZE + body_len;
        let stored = u32::from_le_bytes([
            data[body_end],
            data[body_end + 1],
            data[body_end + 2],
            data[body_end + 3],
        ]);
        let computed = compute_crc32(&data[offset..body_end]);

        if stored != computed {
            if offset + total_len == data.len() {
                break;
            }
            return Err(StoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        decoded
            .bodies
            .push(data[offset + HEADER_SIZE..body_end].to_vec());
        offset += total_len;
        decoded.valid_len = offset as u64;
    }

    Ok(decoded)
}

/// Returns the offset of the first complete, checksum-valid frame at or
/// after `from`.
fn find_intact_frame(data: &[u8], from: usize) -> Option<usize> {
    let mut start = from;
    while start + HEADER_SIZE + CRC_SIZE <= data.len() {
        let at = data[start..]
            .windows(FRAME_MAGIC.len())
            .position(|window| window == FRAME_MAGIC)?;
        let offset = start + at;
        if frame_is_intact(data, offset) {
            return Some(offset);
        }
        start = offset + 1;
    }
    None
}

fn frame_is_intact(data: &[u8], offset: usize) -> bool {
    let Some(header) = data.get(offset..offset + HEADER_SIZE) else {
        return false;
    };
    if u16::from_le_bytes([header[4], header[5]]) != FRAME_VERSION {
        return false;
    }
    let body_len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;
    let body_end = offset + HEADER_SIZE + body_len;
    match data.get(body_end..body_end + CRC_SIZE) {
        Some(crc) => {
            let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
            stored == compute_crc32(&data[offset..body_end])
        }
        None => false,
    }
}

/// Computes CRC32 checksum for data (IEEE polynomial).
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
