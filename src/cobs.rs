//! Consistent Overhead Byte Stuffing (COBS) codec.
//!
//! Rewrites an arbitrary byte string into a form that contains no `0x00`
//! byte, so a single `0x00` can delimit frames on the wire. The encoder
//! here produces the zero-free body only; appending the delimiter is the
//! framing layer's job. The decoder is the inverse and expects the body
//! with the delimiter already stripped.
//!
//! The scheme is described in *Consistent Overhead Byte Stuffing*, Stuart
//! Cheshire and Mary Baker, IEEE/ACM Transactions on Networking, Vol. 7,
//! No. 2, April 1999.

use thiserror::Error;

/// Longest run of non-zero bytes a single code byte can describe.
const MAX_RUN: usize = 254;

/// Errors from decoding a COBS segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CobsError {
    /// The encoded input contains a `0x00` byte. Zeros are delimiters and
    /// must be stripped before decoding.
    #[error("encoded input contains a zero byte")]
    InputContainsZero,
    /// A code byte promises more data bytes than remain in the input.
    #[error("segment truncated: code byte overruns input")]
    TruncatedSegment,
}

/// Returns the largest possible encoded size for an input of `raw_len`
/// bytes. The wire delimiter is not included.
///
/// This is a `const fn` so it can size fixed buffers:
///
/// ```
/// let mut scratch = [0u8; framelink::cobs::max_encoded_len(1024)];
/// let used = framelink::cobs::encode_buf(&[0x42; 1024], &mut scratch);
/// assert!(used <= scratch.len());
/// ```
pub const fn max_encoded_len(raw_len: usize) -> usize {
    // One code byte up front, plus one extra per 254-byte run of non-zero
    // input. Zero-heavy input needs less.
    raw_len + 1 + raw_len / 254
}

/// Encodes `raw` into `out`, returning the number of bytes written. The
/// output never contains `0x00` and carries no trailing delimiter.
///
/// # Panics
///
/// If `out` is shorter than `max_encoded_len(raw.len())`.
pub fn encode_buf(raw: &[u8], out: &mut [u8]) -> usize {
    assert!(out.len() >= max_encoded_len(raw.len()));

    // `code_at` indexes the open run's code byte, which holds the run
    // length plus one while the run grows.
    let mut code_at = 0usize;
    let mut len = 1usize;
    let mut saturated = false;
    out[0] = 1;

    for &b in raw {
        saturated = false;
        if b == 0 {
            // Close the run; the implicit zero is carried by the code byte.
            code_at = len;
            out[code_at] = 1;
            len += 1;
        } else {
            out[len] = b;
            len += 1;
            out[code_at] += 1;
            if out[code_at] == 0xFF {
                // Run is full; open a new one without consuming a zero.
                code_at = len;
                out[code_at] = 1;
                len += 1;
                saturated = true;
            }
        }
    }

    // A 0xFF-saturated final run carries no implicit zero, so the code
    // byte opened after it is dropped again.
    if saturated { len -= 1 }
    len
}

/// Encodes `raw` into a fresh vector. Convenience wrapper over
/// [`encode_buf`].
pub fn encode(raw: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; max_encoded_len(raw.len())];
    let used = encode_buf(raw, &mut out);
    out.truncate(used);
    out
}

/// Decodes the zero-free segment `encoded` into `out`, returning the
/// number of decoded bytes. Decoded output is never longer than the
/// input.
///
/// # Panics
///
/// If `out` is shorter than `encoded`.
pub fn decode_buf(encoded: &[u8], out: &mut [u8]) -> Result<usize, CobsError> {
    assert!(out.len() >= encoded.len());

    if encoded.contains(&0) {
        return Err(CobsError::InputContainsZero);
    }

    let mut ip = 0usize;
    let mut op = 0usize;
    while ip < encoded.len() {
        // Cannot be zero: ruled out by the scan above.
        let code = encoded[ip] as usize;
        ip += 1;

        let run = code - 1;
        if ip + run > encoded.len() {
            return Err(CobsError::TruncatedSegment);
        }
        out[op..op + run].copy_from_slice(&encoded[ip..ip + run]);
        op += run;
        ip += run;

        // A short run in mid-stream stands for a zero in the raw data; a
        // short run at the very end does not.
        if code < 0xFF && ip < encoded.len() {
            out[op] = 0;
            op += 1;
        }
    }
    Ok(op)
}

/// Decodes a zero-free segment into a fresh vector. Convenience wrapper
/// over [`decode_buf`].
pub fn decode(encoded: &[u8]) -> Result<Vec<u8>, CobsError> {
    let mut out = vec![0u8; encoded.len()];
    let used = decode_buf(encoded, &mut out)?;
    out.truncate(used);
    Ok(out)
}
