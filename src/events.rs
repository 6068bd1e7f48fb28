// Events emitted by the piece storage as download milestones are reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // A piece passed verification and was committed to the have set
    PieceCompleted { piece_index: usize },

    // Every selected piece is downloaded (the filter may still exclude files)
    SelectiveDownloadComplete,

    // Every piece of the download is on local storage
    DownloadComplete,
}
