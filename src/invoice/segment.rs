use crate::error::{Error, Result};

/// Literal markers framing the product table in the flattened text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchors {
    pub start: &'static str,
    pub end: &'static str,
}

/// The text strictly between the two anchors, trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadSlice<'a>(&'a str);

impl<'a> PayloadSlice<'a> {
    pub fn as_str(&self) -> &'a str {
        self.0
    }

    /// One token per line. An empty payload has no tokens.
    pub fn tokens(&self) -> impl Iterator<Item = &'a str> {
        self.0.lines()
    }
}

impl<'a> From<&'a str> for PayloadSlice<'a> {
    fn from(text: &'a str) -> Self {
        PayloadSlice(text.trim())
    }
}

/// Locate the payload: everything after the first `start` anchor and
/// before the first `end` anchor that follows it.
pub fn segment<'a>(text: &'a str, anchors: &Anchors) -> Result<PayloadSlice<'a>> {
    let (_, after_start) = text
        .split_once(anchors.start)
        .ok_or(Error::AnchorNotFound {
            anchor: anchors.start,
        })?;

    let (payload, _) = after_start
        .split_once(anchors.end)
        .ok_or(Error::AnchorNotFound {
            anchor: anchors.end,
        })?;

    Ok(PayloadSlice::from(payload))
}
