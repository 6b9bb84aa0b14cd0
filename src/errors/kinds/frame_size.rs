/// Size faults raised while framing or parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSizeKind {
    /// Fewer bytes arrived than the header or function code promised.
    Truncated,
    /// Larger than the protocol allows (256-byte ADU, MBAP length bound).
    Oversized,
    /// A PDU under construction ran out of buffer space.
    PduOverflow,
}

impl std::fmt::Display for FrameSizeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "Truncated frame"),
            Self::Oversized => write!(f, "Oversized frame"),
            Self::PduOverflow => write!(f, "PDU capacity exceeded"),
        }
    }
}
