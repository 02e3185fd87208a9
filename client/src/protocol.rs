/// Decoding of the server's push stream.
///
/// The server writes bare text tokens separated by whitespace or line
/// terminators. Only [`JOB_TOKEN`] carries meaning; everything else is ignored
/// so newer servers can add tokens without breaking older clients.
///
/// TCP gives no message boundaries, so a token split across two reads is
/// reassembled from a pending fragment. A fragment still pending when the peer
/// goes quiet (read timeout) or closes the stream is treated as complete.
use tracing::warn;

/// The one token with defined semantics.
pub const JOB_TOKEN: &str = "PRINT_JOB";

/// Longest fragment kept while waiting for a delimiter.
pub const MAX_PENDING_BYTES: usize = 1024;

/// A complete token read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Exactly [`JOB_TOKEN`].
    PrintJob,
    /// Valid text that is not a known token.
    Unknown(String),
    /// Bytes that are not valid UTF-8.
    NonText(Vec<u8>),
}

impl Message {
    fn from_token(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(JOB_TOKEN) => Message::PrintJob,
            Ok(text) => Message::Unknown(text.to_string()),
            Err(_) => Message::NonText(bytes.to_vec()),
        }
    }
}

/// Incremental whitespace-delimited token splitter.
#[derive(Debug, Default)]
pub struct TokenDecoder {
    pending: Vec<u8>,
    /// Set after an overlong fragment is dropped; bytes are skipped until the
    /// next delimiter so the tail is not mistaken for a token.
    discarding: bool,
}

impl TokenDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk from the socket and returns every token it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Message> {
        let mut out = Vec::new();
        for &byte in chunk {
            if byte.is_ascii_whitespace() {
                self.discarding = false;
                if !self.pending.is_empty() {
                    out.push(Message::from_token(&self.pending));
                    self.pending.clear();
                }
            } else if !self.discarding {
                if self.pending.len() == MAX_PENDING_BYTES {
                    warn!("Dropping token longer than {MAX_PENDING_BYTES} bytes");
                    self.pending.clear();
                    self.discarding = true;
                } else {
                    self.pending.push(byte);
                }
            }
        }
        out
    }

    /// Completes the pending fragment, if any. Called when the peer goes quiet
    /// or closes the stream.
    pub fn flush(&mut self) -> Option<Message> {
        self.discarding = false;
        if self.pending.is_empty() {
            return None;
        }
        let message = Message::from_token(&self.pending);
        self.pending.clear();
        Some(message)
    }

    /// Drops any partial token, e.g. when the connection is replaced.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.discarding = false;
    }

    #[cfg(test)]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
