//! multipart/x-mixed-replace framing for MJPEG viewers.

use std::convert::Infallible;

use axum::body::Body;
use bytes::{BufMut, Bytes, BytesMut};
use futures::StreamExt;

use crate::relay::FrameSource;

pub const BOUNDARY: &str = "BOUNDARY";

pub fn content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={BOUNDARY}")
}

/// One boundary-delimited JPEG part.
pub fn encode_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

pub fn body(frames: FrameSource) -> Body {
    Body::from_stream(frames.map(|frame| Ok::<_, Infallible>(encode_part(&frame))))
}
