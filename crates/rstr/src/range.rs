//! `Range: bytes=` request header handling.
//!
//! Only a single range is honoured. Multi-range requests and headers that do
//! not parse are answered with the full body, which RFC 9110 permits.

use std::ops::Range;

/// What to send for a request against a blob of known size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ByteRange {
    /// 200 with the whole blob.
    Full,
    /// 206 with this half-open slice.
    Partial(Range<u64>),
    /// 416.
    Unsatisfiable,
}

/// Decide how to answer `header` (the raw `Range` value, if any).
pub fn resolve(header: Option<&str>, size: u64) -> ByteRange {
    let Some(spec) = header.and_then(|h| h.trim().strip_prefix("bytes=")) else {
        return ByteRange::Full;
    };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((first, last)) = spec.trim().split_once('-') else {
        return ByteRange::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // Suffix form: the final N bytes.
        let Ok(suffix) = last.parse::<u64>() else {
            return ByteRange::Full;
        };
        if suffix == 0 || size == 0 {
            return ByteRange::Unsatisfiable;
        }
        return ByteRange::Partial(size.saturating_sub(suffix)..size);
    }

    let Ok(start) = first.parse::<u64>() else {
        return ByteRange::Full;
    };
    let end = if last.is_empty() {
        size
    } else {
        match last.parse::<u64>() {
            Ok(last) if last >= start => last.saturating_add(1).min(size),
            _ => return ByteRange::Full,
        }
    };

    if start >= size {
        return ByteRange::Unsatisfiable;
    }
    ByteRange::Partial(start..end)
}

/// `Content-Range` value for a served slice.
pub fn content_range(range: &Range<u64>, size: u64) -> String {
    format!("bytes {}-{}/{}", range.start, range.end - 1, size)
}
