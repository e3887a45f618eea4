/// SSE (Server-Sent Events) frame encoding for the outbound `OpenAI` stream.
///
/// Every frame is an unnamed `data:` event; the stream ends with the literal
/// `[DONE]` marker.
use bytes::Bytes;
use serde::Serialize;

const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Serialize `value` and wrap it in one SSE frame.
///
/// # Errors
///
/// Returns the `serde_json` error when `value` cannot be serialized.
pub fn json_sse_frame<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    let mut out = Vec::with_capacity(8 + json.len());
    out.extend_from_slice(b"data: ");
    out.extend_from_slice(&json);
    out.extend_from_slice(b"\n\n");
    Ok(Bytes::from(out))
}

/// The `[DONE]` terminator frame.
#[must_use]
pub fn done_frame() -> Bytes {
    Bytes::from_static(DONE_FRAME.as_bytes())
}
