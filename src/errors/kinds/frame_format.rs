#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormatKind {
    InvalidFormat,
    InvalidHeader,
    UnexpectedResponse,
    TransactionMismatch,
}

impl std::fmt::Display for FrameFormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidFormat => write!(f, "Invalid frame format"),
            Self::InvalidHeader => write!(f, "Invalid frame header"),
            Self::UnexpectedResponse => write!(f, "Unexpected response"),
            Self::TransactionMismatch => write!(f, "Transaction ID mismatch"),
        }
    }
}
