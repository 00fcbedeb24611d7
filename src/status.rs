/*!
Locates the HTTP status line inside a backend response stream.

Backend workers answer in CGI style: a header block terminated by an empty
line, optionally carrying a `Status:` header (`Status: 200 OK`). The
extractor buffers everything it is fed, reports once when the status is
known, and hands the caller both the status line and the buffered bytes so
the response can be replayed verbatim after the synthesized status line.
*/

const DEFAULT_STATUS_LINE: &str = "200 OK";

pub struct StatusExtractor {
    buffer: Vec<u8>,
    scan_pos: usize,
    status_line: Option<String>,
    done: bool,
}

impl StatusExtractor {
    pub fn new() -> Self {
        StatusExtractor {
            buffer: Vec::new(),
            scan_pos: 0,
            status_line: None,
            done: false,
        }
    }

    /// Append response bytes and scan for the status. Returns true on the
    /// single call that resolves it, either via a `Status:` header line or
    /// by reaching the end of the header block (which defaults to
    /// `200 OK`). Later calls keep buffering and return false.
    pub fn feed(&mut self, data: &[u8]) -> bool {
        self.buffer.extend_from_slice(data);
        if self.done {
            return false;
        }
        while let Some(rel) = find_crlf(&self.buffer[self.scan_pos..]) {
            let line_end = self.scan_pos + rel;
            let line = &self.buffer[self.scan_pos..line_end];
            self.scan_pos = line_end + 2;
            if line.is_empty() {
                // End of the header block without a Status header.
                self.status_line = Some(DEFAULT_STATUS_LINE.to_string());
                self.done = true;
                return true;
            }
            if let Some(value) = header_value(line, "Status") {
                self.status_line = Some(value);
                self.done = true;
                return true;
            }
        }
        false
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The extracted status line, e.g. `200 OK`, without line terminator.
    pub fn status_line(&self) -> Option<&str> {
        self.status_line.as_deref()
    }

    /// Every byte fed so far, including body bytes that arrived in the same
    /// read as the end of the header block.
    pub fn buffered_bytes(&self) -> &[u8] {
        &self.buffer
    }
}

impl Default for StatusExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Value of a `name:` header line, trimmed. Header names compare
/// case-insensitively.
fn header_value(line: &[u8], name: &str) -> Option<String> {
    let colon = line.iter().position(|&b| b == b':')?;
    let (key, rest) = line.split_at(colon);
    if !key.eq_ignore_ascii_case(name.as_bytes()) {
        return None;
    }
    Some(String::from_utf8_lossy(&rest[1..]).trim().to_string())
}
