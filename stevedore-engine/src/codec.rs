//! Wire framing for batch bodies and batch responses.
//!
//! # Wire Format
//!
//! A batch request body is the admission-ordered sequence of operation
//! frames behind a count:
//!
//! - 4 bytes: operation count (u32 little-endian)
//! - per operation:
//!   - 1 byte: operation kind tag
//!   - 4 bytes + N: item id (length-prefixed UTF-8)
//!   - 4 bytes + N: serialized body (length-prefixed)
//!
//! A batch response body is the same-ordered sequence of result frames:
//!
//! - 4 bytes: result count (u32 little-endian)
//! - per result:
//!   - 2 bytes: status code (u16 little-endian)
//!   - 2 bytes: substatus (u16 little-endian)
//!   - 1 byte: retry-after flag; if 1, 4 bytes retry-after millis
//!   - 1 byte: etag flag; if 1, 4 bytes + N etag (length-prefixed UTF-8)
//!   - 8 bytes: request charge (f64 little-endian)
//!   - 4 bytes + N: resource body (length-prefixed)
//!
//! Both directions are implemented so the engine and any in-process test
//! server share one codec.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use stevedore_core::{BatchResponse, OperationKind, OperationResult, StatusCode, SubStatus};

use crate::context::InflightOperation;
use crate::transport::ResponseMessage;

/// Operation kind tags.
const TAG_CREATE: u8 = 0;
const TAG_READ: u8 = 1;
const TAG_REPLACE: u8 = 2;
const TAG_UPSERT: u8 = 3;
const TAG_DELETE: u8 = 4;
const TAG_PATCH: u8 = 5;

/// Sanity cap on any single length-prefixed field (16 MB).
const MAX_FIELD_BYTES: u32 = 16 * 1024 * 1024;

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Insufficient data to decode a frame.
    #[error("insufficient data: need {need} bytes, have {have}")]
    InsufficientData {
        /// Bytes needed.
        need: usize,
        /// Bytes available.
        have: usize,
    },

    /// Unknown operation kind tag.
    #[error("unknown operation kind: {tag}")]
    UnknownKind {
        /// The unknown tag value.
        tag: u8,
    },

    /// A length-prefixed field exceeds the sanity cap.
    #[error("field too large: {size} bytes (max {max})")]
    FieldTooLarge {
        /// Declared size.
        size: u32,
        /// Maximum allowed.
        max: u32,
    },

    /// A string field is not valid UTF-8.
    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 {
        /// Which field was malformed.
        field: &'static str,
    },

    /// Bytes remained after the declared frame count.
    #[error("trailing bytes after last frame: {remaining}")]
    TrailingBytes {
        /// Leftover byte count.
        remaining: usize,
    },
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

const fn kind_tag(kind: OperationKind) -> u8 {
    match kind {
        OperationKind::Create => TAG_CREATE,
        OperationKind::Read => TAG_READ,
        OperationKind::Replace => TAG_REPLACE,
        OperationKind::Upsert => TAG_UPSERT,
        OperationKind::Delete => TAG_DELETE,
        OperationKind::Patch => TAG_PATCH,
    }
}

const fn kind_from_tag(tag: u8) -> CodecResult<OperationKind> {
    match tag {
        TAG_CREATE => Ok(OperationKind::Create),
        TAG_READ => Ok(OperationKind::Read),
        TAG_REPLACE => Ok(OperationKind::Replace),
        TAG_UPSERT => Ok(OperationKind::Upsert),
        TAG_DELETE => Ok(OperationKind::Delete),
        TAG_PATCH => Ok(OperationKind::Patch),
        _ => Err(CodecError::UnknownKind { tag }),
    }
}

fn ensure(buf: &Bytes, need: usize) -> CodecResult<()> {
    if buf.remaining() < need {
        return Err(CodecError::InsufficientData {
            need,
            have: buf.remaining(),
        });
    }
    Ok(())
}

fn get_len(buf: &mut Bytes) -> CodecResult<usize> {
    ensure(buf, 4)?;
    let len = buf.get_u32_le();
    if len > MAX_FIELD_BYTES {
        return Err(CodecError::FieldTooLarge {
            size: len,
            max: MAX_FIELD_BYTES,
        });
    }
    Ok(len as usize)
}

fn get_bytes(buf: &mut Bytes) -> CodecResult<Bytes> {
    let len = get_len(buf)?;
    ensure(buf, len)?;
    Ok(buf.split_to(len))
}

fn get_string(buf: &mut Bytes, field: &'static str) -> CodecResult<String> {
    let bytes = get_bytes(buf)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 { field })
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32_le(bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Encodes a sealed batch's operations into a request body.
#[must_use]
pub fn encode_batch_body(ops: &[InflightOperation]) -> Bytes {
    let mut buf = BytesMut::with_capacity(64 * ops.len());
    buf.put_u32_le(ops.len() as u32);

    for op in ops {
        let operation = &op.operation;
        buf.put_u8(kind_tag(operation.kind));
        put_bytes(&mut buf, operation.item_id.as_bytes());
        match operation.body() {
            Some(body) => put_bytes(&mut buf, body),
            None => put_bytes(&mut buf, &[]),
        }
    }

    buf.freeze()
}

/// An operation frame decoded from a request body.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedOperation {
    /// Operation kind.
    pub kind: OperationKind,
    /// Item id.
    pub item_id: String,
    /// Serialized body.
    pub body: Bytes,
}

/// Decodes a request body back into operation frames.
///
/// # Errors
/// Returns a [`CodecError`] on truncation, unknown tags, or trailing bytes.
pub fn decode_batch_body(mut body: Bytes) -> CodecResult<Vec<DecodedOperation>> {
    ensure(&body, 4)?;
    let count = body.get_u32_le() as usize;

    let mut ops = Vec::with_capacity(count);
    for _ in 0..count {
        ensure(&body, 1)?;
        let kind = kind_from_tag(body.get_u8())?;
        let item_id = get_string(&mut body, "item_id")?;
        let op_body = get_bytes(&mut body)?;
        ops.push(DecodedOperation {
            kind,
            item_id,
            body: op_body,
        });
    }

    if body.has_remaining() {
        return Err(CodecError::TrailingBytes {
            remaining: body.remaining(),
        });
    }
    Ok(ops)
}

/// Encodes per-operation results into a response body.
#[must_use]
pub fn encode_batch_results(results: &[OperationResult]) -> Bytes {
    let mut buf = BytesMut::with_capacity(32 * results.len());
    buf.put_u32_le(results.len() as u32);

    for result in results {
        buf.put_u16_le(result.status.get());
        buf.put_u16_le(result.sub_status.get());
        match result.retry_after {
            Some(delay) => {
                buf.put_u8(1);
                buf.put_u32_le(delay.as_millis() as u32);
            }
            None => buf.put_u8(0),
        }
        match &result.etag {
            Some(etag) => {
                buf.put_u8(1);
                put_bytes(&mut buf, etag.as_bytes());
            }
            None => buf.put_u8(0),
        }
        buf.put_f64_le(result.request_charge);
        put_bytes(&mut buf, &result.body);
    }

    buf.freeze()
}

/// Decodes a response body into per-operation results.
///
/// # Errors
/// Returns a [`CodecError`] on truncation or trailing bytes.
pub fn decode_batch_results(mut body: Bytes) -> CodecResult<Vec<OperationResult>> {
    ensure(&body, 4)?;
    let count = body.get_u32_le() as usize;

    let mut results = Vec::with_capacity(count);
    for _ in 0..count {
        ensure(&body, 2 + 2 + 1)?;
        let status = StatusCode::new(body.get_u16_le());
        let sub_status = SubStatus::new(body.get_u16_le());

        let retry_after = if body.get_u8() == 1 {
            ensure(&body, 4)?;
            Some(Duration::from_millis(u64::from(body.get_u32_le())))
        } else {
            None
        };

        ensure(&body, 1)?;
        let etag = if body.get_u8() == 1 {
            Some(get_string(&mut body, "etag")?)
        } else {
            None
        };

        ensure(&body, 8)?;
        let request_charge = body.get_f64_le();
        let result_body = get_bytes(&mut body)?;

        results.push(OperationResult {
            status,
            sub_status,
            etag,
            body: result_body,
            retry_after,
            request_charge,
        });
    }

    if body.has_remaining() {
        return Err(CodecError::TrailingBytes {
            remaining: body.remaining(),
        });
    }
    Ok(results)
}

/// Parses a transport response into a [`BatchResponse`].
///
/// # Errors
/// Returns a [`CodecError`] if the response body is malformed.
pub fn decode_batch_response(message: &ResponseMessage) -> CodecResult<BatchResponse> {
    let results = decode_batch_results(message.body.clone())?;
    Ok(BatchResponse {
        status: message.status,
        sub_status: message.sub_status,
        request_charge: message.request_charge,
        results,
    })
}
