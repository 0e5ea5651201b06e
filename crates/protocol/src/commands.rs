/// Integer command codes used on the wire.
///
/// The 7xxx codes originate on the side that pushes data or signals; the
/// 8xxx codes are the receiver's acknowledgements. The values are an
/// internal contract between the two task implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Sender offers a file: name and declared size.
    Offer,
    /// Receiver accepts (or rejects) the offer, reporting its chunk map.
    OfferAck,
    /// Sender pushes one chunk of file data.
    ChunkData,
    /// Receiver acknowledges a chunk with its updated chunk map.
    ChunkAck,
    /// Receiver confirms a verified, complete transfer. The sender also
    /// emits this when its complement is empty, asking for confirmation.
    FinishNotify,
    /// Either side requests a cooperative pause; checkpoints are retained.
    Interrupt,
    /// Either side signals a terminal failure; no resume point remains.
    PeerError,
}

impl Command {
    /// The wire code for this command.
    pub const fn code(self) -> u32 {
        match self {
            Command::Offer => 7000,
            Command::ChunkData => 7001,
            Command::FinishNotify => 7010,
            Command::Interrupt => 7070,
            Command::PeerError => 7080,
            Command::OfferAck => 8000,
            Command::ChunkAck => 8001,
        }
    }

    /// Resolves a wire code back to a command.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            7000 => Some(Command::Offer),
            7001 => Some(Command::ChunkData),
            7010 => Some(Command::FinishNotify),
            7070 => Some(Command::Interrupt),
            7080 => Some(Command::PeerError),
            8000 => Some(Command::OfferAck),
            8001 => Some(Command::ChunkAck),
            _ => None,
        }
    }
}
