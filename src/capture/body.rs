use crate::events::BodyCapture;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::BytesMut;

/// Largest configurable per-body capture.
pub const MAX_BODY_CAPTURE_BYTES: usize = 65_536;

/// Streaming body sampler: counts every byte seen but keeps at most `limit`.
#[derive(Debug)]
pub struct BodyAccumulator {
    limit: usize,
    total: u64,
    captured: BytesMut,
}

impl BodyAccumulator {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            total: 0,
            captured: BytesMut::new(),
        }
    }

    pub fn ingest(&mut self, chunk: &[u8]) {
        self.total += chunk.len() as u64;
        let remaining = self.limit.saturating_sub(self.captured.len());
        if remaining > 0 {
            let take = remaining.min(chunk.len());
            self.captured.extend_from_slice(&chunk[..take]);
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    pub fn finalize(&self, content_type: Option<&str>, include_text: bool) -> BodyCapture {
        let captured_bytes = self.captured.len() as u64;
        let has_data = !self.captured.is_empty();

        let preview_b64 = has_data.then(|| STANDARD.encode(&self.captured));
        let preview_text = (has_data && include_text && content_type.is_some_and(is_text_like))
            .then(|| String::from_utf8_lossy(&self.captured).into_owned());

        BodyCapture {
            size_bytes: self.total,
            captured_bytes,
            truncated: self.total > captured_bytes,
            preview_b64,
            preview_text,
        }
    }
}

pub fn is_text_like(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("text/")
        || ct.contains("application/json")
        || ct.contains("application/xml")
        || ct.contains("application/x-www-form-urlencoded")
}
