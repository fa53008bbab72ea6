//! # Wyoming Frame Codec
//!
//! Reads and writes Wyoming protocol frames over any async byte stream.
//!
//! ## Frame Layout:
//! 1. **Header**: one line of JSON ending in `\n`
//!    `{"type": "...", "data": {...}, "data_length": N, "payload_length": M, "version": "..."}`
//! 2. **Data** (optional): `data_length` bytes of JSON, merged over the header's `data`
//! 3. **Payload** (optional): `payload_length` raw bytes (audio samples for chunks)
//!
//! A malformed header or a frame cut short leaves the stream out of sync, so
//! both are reported as transport errors. Bad JSON in the data section is a
//! protocol error: the whole frame has been consumed and the next one can
//! still be read.

use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version written into every outgoing header.
pub const PROTOCOL_VERSION: &str = "1.5.2";

/// Largest data or payload section accepted from a peer (16 MiB).
pub const MAX_SECTION_LENGTH: usize = 16 * 1024 * 1024;

/// Header line as it appears on the wire.
#[derive(Debug, Serialize, Deserialize)]
struct FrameHeader {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

/// One decoded frame: event type, JSON data and optional binary payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: String,
    pub data: Map<String, Value>,
    pub payload: Option<Vec<u8>>,
}

impl Frame {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: Map::new(),
            payload: None,
        }
    }
}

/// Read the next frame.
///
/// ## Returns:
/// - **Ok(Some(frame))**: a complete frame
/// - **Ok(None)**: the peer closed the connection between frames
/// - **Err(Transport)**: I/O failure, malformed header, a truncated frame, or a
///   section longer than `MAX_SECTION_LENGTH`
/// - **Err(Protocol)**: the data section is not a JSON object
pub async fn read_frame<R>(reader: &mut R) -> SessionResult<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        if line.last() != Some(&b'\n') {
            return Err(SessionError::Transport(
                "connection closed in the middle of a frame header".to_string(),
            ));
        }
        if !line.iter().all(u8::is_ascii_whitespace) {
            break;
        }
    }

    let header: FrameHeader = serde_json::from_slice(&line)
        .map_err(|e| SessionError::Transport(format!("malformed frame header: {}", e)))?;

    let data_bytes = match header.data_length.filter(|len| *len > 0) {
        Some(len) => Some(read_section(reader, len).await?),
        None => None,
    };

    let payload = match header.payload_length.filter(|len| *len > 0) {
        Some(len) => Some(read_section(reader, len).await?),
        None => None,
    };

    let mut data = header.data.unwrap_or_default();
    if let Some(bytes) = data_bytes {
        let extra: Map<String, Value> = serde_json::from_slice(&bytes)?;
        data.extend(extra);
    }

    Ok(Some(Frame {
        kind: header.kind,
        data,
        payload,
    }))
}

async fn read_section<R>(reader: &mut R, len: usize) -> SessionResult<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    if len > MAX_SECTION_LENGTH {
        return Err(SessionError::Transport(format!(
            "frame section of {} bytes exceeds the {} byte limit",
            len, MAX_SECTION_LENGTH
        )));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write a frame and flush it.
///
/// Data is sent as a separate section after the header (`data_length`), the
/// layout current Wyoming peers produce.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> SessionResult<()>
where
    W: AsyncWrite + Unpin,
{
    let data_bytes = if frame.data.is_empty() {
        None
    } else {
        Some(serde_json::to_vec(&frame.data)?)
    };

    let header = FrameHeader {
        kind: frame.kind.clone(),
        data: None,
        data_length: data_bytes.as_ref().map(Vec::len),
        payload_length: frame.payload.as_ref().map(Vec::len).filter(|len| *len > 0),
        version: Some(PROTOCOL_VERSION.to_string()),
    };

    let mut line = serde_json::to_vec(&header)?;
    line.push(b'\n');

    writer.write_all(&line).await?;
    if let Some(bytes) = &data_bytes {
        writer.write_all(bytes).await?;
    }
    if let Some(payload) = frame.payload.as_ref().filter(|p| !p.is_empty()) {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_read_frame_with_data_section_and_payload() {
        let mut wire = Vec::new();
        wire.extend_from_slice(
            br#"{"type": "audio-chunk", "data_length": 40, "payload_length": 4}"#,
        );
        wire.push(b'\n');
        let data = br#"{"rate":22050, "width": 2, "channels":1}"#;
        assert_eq!(data.len(), 40);
        wire.extend_from_slice(data);
        wire.extend_from_slice(&[1, 2, 3, 4]);

        let mut reader = &wire[..];
        let frame = read_frame(&mut reader).await.unwrap().unwrap();

        assert_eq!(frame.kind, "audio-chunk");
        assert_eq!(frame.data.get("rate"), Some(&json!(22050)));
        assert_eq!(frame.payload, Some(vec![1, 2, 3, 4]));
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_with_inline_data() {
        let wire = b"{\"type\": \"audio-stop\", \"data\": {\"timestamp\": 1200}}\n".to_vec();

        let mut reader = &wire[..];
        let frame = read_frame(&mut reader).await.unwrap().unwrap();

        assert_eq!(frame.kind, "audio-stop");
        assert_eq!(frame.data.get("timestamp"), Some(&json!(1200)));
        assert!(frame.payload.is_none());
    }

    #[tokio::test]
    async fn test_blank_lines_between_frames_are_skipped() {
        let wire = b"\n\r\n{\"type\": \"played\"}\n".to_vec();

        let mut reader = &wire[..];
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame.kind, "played");
    }

    #[tokio::test]
    async fn test_clean_end_of_stream() {
        let mut reader: &[u8] = &[];
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_payload_is_a_transport_error() {
        let mut wire = b"{\"type\": \"audio-chunk\", \"payload_length\": 10}\n".to_vec();
        wire.extend_from_slice(&[0; 4]);

        let mut reader = &wire[..];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_oversized_sections_are_rejected() {
        for header in [
            "{\"type\": \"audio-chunk\", \"payload_length\": 40000000000}\n",
            "{\"type\": \"audio-chunk\", \"data_length\": 40000000000}\n",
        ] {
            let mut wire = header.as_bytes().to_vec();
            wire.extend_from_slice(&[0; 4]);

            let mut reader = &wire[..];
            let err = read_frame(&mut reader).await.unwrap_err();
            assert!(matches!(err, SessionError::Transport(_)));
            assert!(err.is_fatal());
        }
    }

    #[tokio::test]
    async fn test_section_at_the_limit_is_read() {
        let mut wire = format!(
            "{{\"type\": \"audio-chunk\", \"payload_length\": {}}}\n",
            MAX_SECTION_LENGTH
        )
        .into_bytes();
        wire.resize(wire.len() + MAX_SECTION_LENGTH, 7);

        let mut reader = &wire[..];
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame.payload.map(|p| p.len()), Some(MAX_SECTION_LENGTH));
    }

    #[tokio::test]
    async fn test_garbage_header_is_a_transport_error() {
        let wire = b"this is not json\n".to_vec();

        let mut reader = &wire[..];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
    }

    #[tokio::test]
    async fn test_write_frame_layout() {
        let mut frame = Frame::new("audio-chunk");
        frame.data.insert("rate".to_string(), json!(16000));
        frame.payload = Some(vec![9, 8, 7]);

        let mut wire = Vec::new();
        write_frame(&mut wire, &frame).await.unwrap();

        let newline = wire.iter().position(|b| *b == b'\n').unwrap();
        let header: Value = serde_json::from_slice(&wire[..newline]).unwrap();
        assert_eq!(header["type"], "audio-chunk");
        assert_eq!(header["version"], PROTOCOL_VERSION);
        assert_eq!(header["data_length"], json!(14));
        assert_eq!(header["payload_length"], json!(3));

        let body = &wire[newline + 1..];
        assert_eq!(&body[..14], br#"{"rate":16000}"#);
        assert_eq!(&body[14..], &[9, 8, 7]);

        let mut reader = &wire[..];
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), frame);
    }

    #[tokio::test]
    async fn test_write_frame_without_data_is_a_single_line() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &Frame::new("played")).await.unwrap();

        assert_eq!(wire.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(wire.last(), Some(&b'\n'));

        let header: Value = serde_json::from_slice(&wire).unwrap();
        assert_eq!(header["type"], "played");
        assert!(header.get("data_length").is_none());
        assert!(header.get("payload_length").is_none());
    }
}
