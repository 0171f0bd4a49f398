//! Text frames passed between `producer` and `subscriber`.

/// Bytes of text carried per frame, including the terminating NUL.
pub const TEXT_LEN: usize = 100;

/// Slot size needed to hold one [`WordsFrame`].
pub const FRAME_LEN: usize = 8 + TEXT_LEN;

/// A line of text plus the running byte count of everything sent so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordsFrame {
    pub total_bytes: u64,
    pub text: String,
}

impl WordsFrame {
    pub fn new(total_bytes: u64, text: &str) -> Self {
        let mut end = text.len().min(TEXT_LEN - 1);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            total_bytes,
            text: text[..end].to_string(),
        }
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];
        buf[..8].copy_from_slice(&self.total_bytes.to_ne_bytes());
        let text = self.text.as_bytes();
        let n = text.len().min(TEXT_LEN - 1);
        buf[8..8 + n].copy_from_slice(&text[..n]);
        buf
    }

    /// `None` if the slot is too small to hold a frame.
    pub fn decode(slot: &[u8]) -> Option<Self> {
        if slot.len() < FRAME_LEN {
            return None;
        }
        let mut count = [0u8; 8];
        count.copy_from_slice(&slot[..8]);
        let text = &slot[8..FRAME_LEN];
        let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
        Some(Self {
            total_bytes: u64::from_ne_bytes(count),
            text: String::from_utf8_lossy(&text[..end]).into_owned(),
        })
    }
}
