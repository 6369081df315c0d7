use bytes::{Bytes, BytesMut};

const HEADER_END: &[u8] = b"\r\n\r\n";
const DEFAULT_BOUNDARY: &str = "frame";

/// Parse state for a `multipart/x-mixed-replace` body.
enum ParseState {
    /// Looking for the `--<boundary>` marker.
    SeekingBoundary,
    /// Found boundary, now looking for the end of the part headers.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental MJPEG splitter. Feed it chunks as they arrive off the wire
/// and pull out complete JPEG images.
pub struct MjpegParser {
    marker: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    /// Offset in `buffer` already scanned for the closing boundary.
    jpeg_start: usize,
}

impl MjpegParser {
    pub fn new(boundary: &str) -> Self {
        let boundary = boundary.trim_start_matches("--");
        Self {
            marker: format!("--{boundary}").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Build a parser from a `Content-Type` header value, falling back to the
    /// boundary `frame` when the header does not name one.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let boundary = content_type
            .and_then(|ct| {
                ct.split(';')
                    .map(str::trim)
                    .find_map(|param| param.strip_prefix("boundary="))
            })
            .map(|b| b.trim_matches('"'))
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_BOUNDARY);
        Self::new(boundary)
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete JPEG in the buffered data, if any.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.marker) {
                        let _ = self.buffer.split_to(pos + self.marker.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep a tail in case the marker spans chunks.
                        let keep = self.marker.len().saturating_sub(1);
                        if self.buffer.len() > keep {
                            let _ = self.buffer.split_to(self.buffer.len() - keep);
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    let pos = find_subsequence(&self.buffer, HEADER_END)?;
                    let _ = self.buffer.split_to(pos + HEADER_END.len());
                    self.jpeg_start = 0;
                    self.state = ParseState::CollectingJpeg;
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], &self.marker)
                    else {
                        // Only the tail can still hold the start of a marker.
                        self.jpeg_start = self.buffer.len().saturating_sub(self.marker.len());
                        return None;
                    };
                    let mut jpeg = self.buffer.split_to(self.jpeg_start + pos);
                    while jpeg.ends_with(b"\r\n") {
                        jpeg.truncate(jpeg.len() - 2);
                    }
                    self.state = ParseState::SeekingBoundary;
                    if !jpeg.is_empty() {
                        return Some(jpeg.freeze());
                    }
                }
            }
        }
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
