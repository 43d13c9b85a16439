//! Incremental Server-Sent Events frame decoder.

/// One dispatched SSE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub id: Option<String>,
    pub data: String,
}

/// Buffers raw bytes and yields complete frames. Frames end at a blank line;
/// comment-only frames are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(end) = find_frame_end(&self.buf) {
            let raw: Vec<u8> = self.buf.drain(..end.0 + end.1).collect();
            let text = String::from_utf8_lossy(&raw[..end.0]);
            if let Some(frame) = parse_frame(&text) {
                frames.push(frame);
            }
        }
        frames
    }
}

/// Returns (frame length, separator length) for the first blank-line boundary.
fn find_frame_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_frame(text: &str) -> Option<SseFrame> {
    let mut id = None;
    let mut data: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "data" => data.push(value),
            "id" => id = Some(value.to_string()),
            _ => {}
        }
    }

    if data.is_empty() {
        return None;
    }
    Some(SseFrame {
        id,
        data: data.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_frames_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b":ok\n\ndata:{\"cur").is_empty());

        let frames = decoder.push(b"sor\":1}\nid:1\n\ndata:{\"cursor\":2}\nid:2\n\n");
        assert_eq!(
            frames,
            vec![
                SseFrame {
                    id: Some("1".into()),
                    data: "{\"cursor\":1}".into()
                },
                SseFrame {
                    id: Some("2".into()),
                    data: "{\"cursor\":2}".into()
                },
            ]
        );
    }

    #[test]
    fn test_multiline_data_and_crlf() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data: a\r\ndata: b\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "a\nb");
        assert_eq!(frames[0].id, None);
    }

    #[test]
    fn test_keepalive_comments_are_skipped() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b":\n\n:\n\n").is_empty());
    }
}
