/*!
Incremental parser for the length-prefixed request frame sent by the front
end:

```text
<decimal-ascii-length> ':' <key> NUL <value> NUL ... ',' <body...>
```

The parser consumes bytes via [`FrameParser::feed`] and stops consuming the
moment the trailing comma is seen; whatever the caller has left in its read
buffer past that point is request-body data and stays with the caller.
*/

/// Upper bound on the declared header-blob length. Enforced while the
/// length prefix is still being accumulated, before any header byte is
/// buffered.
pub const MAX_HEADER_SIZE: usize = 128 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// Accumulating the decimal length prefix.
    ReadingLength,
    /// Buffering exactly `length` bytes of header blob.
    ReadingHeader,
    /// The next byte must be the trailing comma.
    ExpectingComma,
    Done,
    Error,
}

pub struct FrameParser {
    state: ParseState,
    length: usize,
    have_digits: bool,
    leading_zero: bool,
    header: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        FrameParser {
            state: ParseState::ReadingLength,
            length: 0,
            have_digits: false,
            leading_zero: false,
            header: Vec::new(),
        }
    }

    /// Feed a chunk of input. Returns how many bytes were consumed; on the
    /// transition to `Done` the remainder of `buf` is the caller's partial
    /// request body.
    pub fn feed(&mut self, buf: &[u8]) -> usize {
        let mut consumed = 0;
        for &b in buf {
            match self.state {
                ParseState::Done | ParseState::Error => break,
                ParseState::ReadingLength => {
                    consumed += 1;
                    match b {
                        b'0'..=b'9' => {
                            // The length must be canonical decimal: "0" is
                            // allowed, "007" is not.
                            if self.leading_zero {
                                self.state = ParseState::Error;
                                break;
                            }
                            if !self.have_digits && b == b'0' {
                                self.leading_zero = true;
                            }
                            self.have_digits = true;
                            self.length = self.length * 10 + usize::from(b - b'0');
                            if self.length > MAX_HEADER_SIZE {
                                self.state = ParseState::Error;
                                break;
                            }
                        }
                        b':' if self.have_digits => {
                            self.header.reserve(self.length);
                            self.state = if self.length == 0 {
                                ParseState::ExpectingComma
                            } else {
                                ParseState::ReadingHeader
                            };
                        }
                        _ => {
                            self.state = ParseState::Error;
                            break;
                        }
                    }
                }
                ParseState::ReadingHeader => {
                    consumed += 1;
                    self.header.push(b);
                    if self.header.len() == self.length {
                        self.state = ParseState::ExpectingComma;
                    }
                }
                ParseState::ExpectingComma => {
                    consumed += 1;
                    self.state = if b == b',' {
                        ParseState::Done
                    } else {
                        ParseState::Error
                    };
                    if self.state == ParseState::Done {
                        break;
                    }
                }
            }
        }
        consumed
    }

    /// True in every non-terminal state.
    pub fn accepting_input(&self) -> bool {
        !matches!(self.state, ParseState::Done | ParseState::Error)
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// The raw header blob, exactly as received (without length prefix or
    /// trailing comma).
    pub fn header_data(&self) -> &[u8] {
        &self.header
    }

    /// Look up a header value. The blob alternates NUL-terminated keys and
    /// values; the first occurrence of a duplicate key wins and absent keys
    /// read as empty.
    pub fn header(&self, name: &str) -> &str {
        self.find_value(name)
            .map(|v| std::str::from_utf8(v).unwrap_or(""))
            .unwrap_or("")
    }

    /// Whether the header is present at all (distinguishes absent from
    /// present-but-empty).
    pub fn has_header(&self, name: &str) -> bool {
        self.find_value(name).is_some()
    }

    fn find_value(&self, name: &str) -> Option<&[u8]> {
        let mut parts = self.header.split(|&b| b == 0);
        loop {
            let key = parts.next()?;
            let value = parts.next().unwrap_or(&[]);
            if key == name.as_bytes() {
                return Some(value);
            }
        }
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}
