//! Bus frame codec.
//!
//! ```text
//! +-----------+------------+-------------------+-------------+-----------+
//! | total u32 | parts u32  | part_len u32 * N  | part bytes  | crc32 u32 |
//! +-----------+------------+-------------------+-------------+-----------+
//! ```
//!
//! All integers are little-endian. `total` counts every byte after itself.
//! The checksum covers everything between `total` and the checksum.

use super::BusError;

/// Size of the `total` length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Upper bound on parts per message.
pub const MAX_PARTS: usize = 1 << 16;

const CHECKSUM_SIZE: usize = 4;

/// Frame `parts` into one buffer, length prefix included.
pub fn encode_frame<P: AsRef<[u8]>>(parts: &[P], max_frame_size: usize) -> Result<Vec<u8>, BusError> {
    if parts.len() > MAX_PARTS {
        return Err(BusError::TooManyParts(parts.len()));
    }

    let payload: usize = parts.iter().map(|p| p.as_ref().len()).sum();
    let total = 4 + 4 * parts.len() + payload + CHECKSUM_SIZE;
    if total > max_frame_size || total > u32::MAX as usize {
        return Err(BusError::FrameTooLarge {
            size: total,
            limit: max_frame_size,
        });
    }

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + total);
    buf.extend_from_slice(&(total as u32).to_le_bytes());
    buf.extend_from_slice(&(parts.len() as u32).to_le_bytes());
    for part in parts {
        buf.extend_from_slice(&(part.as_ref().len() as u32).to_le_bytes());
    }
    for part in parts {
        buf.extend_from_slice(part.as_ref());
    }
    let checksum = crc32fast::hash(&buf[LENGTH_PREFIX_SIZE..]);
    buf.extend_from_slice(&checksum.to_le_bytes());
    Ok(buf)
}

fn read_u32(buf: &[u8], at: usize) -> Result<usize, BusError> {
    buf.get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(|b: [u8; 4]| u32::from_le_bytes(b) as usize)
        .ok_or_else(|| BusError::Malformed(format!("truncated header at offset {at}")))
}

/// Split a frame body (everything after the length prefix) into parts.
pub fn decode_body(body: &[u8]) -> Result<Vec<Vec<u8>>, BusError> {
    if body.len() < 4 + CHECKSUM_SIZE {
        return Err(BusError::Malformed(format!("frame body of {} bytes", body.len())));
    }

    let (content, trailer) = body.split_at(body.len() - CHECKSUM_SIZE);
    let expected = read_u32(trailer, 0)? as u32;
    let actual = crc32fast::hash(content);
    if expected != actual {
        return Err(BusError::ChecksumMismatch { expected, actual });
    }

    let count = read_u32(content, 0)?;
    if count > MAX_PARTS {
        return Err(BusError::TooManyParts(count));
    }
    let header_end = 4 + 4 * count;
    if header_end > content.len() {
        return Err(BusError::Malformed(format!("{count} part lengths do not fit the frame")));
    }

    let mut parts = Vec::with_capacity(count);
    let mut offset = header_end;
    for i in 0..count {
        let len = read_u32(content, 4 + 4 * i)?;
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= content.len())
            .ok_or_else(|| BusError::Malformed(format!("part {i} overruns the frame")))?;
        parts.push(content[offset..end].to_vec());
        offset = end;
    }
    if offset != content.len() {
        return Err(BusError::Malformed(format!(
            "{} unclaimed bytes after the last part",
            content.len() - offset
        )));
    }
    Ok(parts)
}

/// Decode a complete frame, length prefix included.
pub fn decode_frame(frame: &[u8]) -> Result<Vec<Vec<u8>>, BusError> {
    let total = read_u32(frame, 0)?;
    let body = &frame[LENGTH_PREFIX_SIZE..];
    if body.len() != total {
        return Err(BusError::Malformed(format!(
            "length prefix says {total} bytes, frame has {}",
            body.len()
        )));
    }
    decode_body(body)
}
