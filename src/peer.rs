/// Remote peer state consumed by the selection logic: the advertised
/// bitfield (wire order, MSB first) and the fast-extension allowed set.
#[derive(Debug, Clone)]
pub struct Peer {
    bitfield: Vec<u8>,
    num_pieces: usize,
    fast_extension_enabled: bool,
    allowed_fast: Vec<usize>,
}

impl Peer {
    pub fn new(num_pieces: usize) -> Self {
        Self {
            bitfield: vec![0; (num_pieces + 7) / 8],
            num_pieces,
            fast_extension_enabled: false,
            allowed_fast: Vec::new(),
        }
    }

    /// Builds a peer from raw wire bytes; the byte length must cover
    /// `num_pieces` bits.
    pub fn from_bitfield(bitfield: Vec<u8>, num_pieces: usize) -> Self {
        assert!(
            bitfield.len() >= (num_pieces + 7) / 8,
            "peer bitfield too short"
        );
        Self {
            bitfield,
            num_pieces,
            fast_extension_enabled: false,
            allowed_fast: Vec::new(),
        }
    }

    pub fn bitfield(&self) -> &[u8] {
        &self.bitfield
    }

    pub fn bitfield_len(&self) -> usize {
        self.bitfield.len()
    }

    pub fn num_pieces(&self) -> usize {
        self.num_pieces
    }

    pub fn has_piece(&self, index: usize) -> bool {
        if index >= self.num_pieces {
            return false;
        }
        self.bitfield[index / 8] & (1 << (7 - index % 8)) != 0
    }

    // HAVE message: the peer gained one piece
    pub fn set_piece(&mut self, index: usize) {
        assert!(index < self.num_pieces, "piece index out of range");
        self.bitfield[index / 8] |= 1 << (7 - index % 8);
    }

    pub fn set_all_pieces(&mut self) {
        for index in 0..self.num_pieces {
            self.bitfield[index / 8] |= 1 << (7 - index % 8);
        }
    }

    pub fn fast_extension_enabled(&self) -> bool {
        self.fast_extension_enabled
    }

    pub fn enable_fast_extension(&mut self) {
        self.fast_extension_enabled = true;
    }

    /// Piece indexes this peer lets us request while choked, ascending.
    pub fn allowed_fast(&self) -> &[usize] {
        &self.allowed_fast
    }

    pub fn add_allowed_fast(&mut self, index: usize) {
        if let Err(position) = self.allowed_fast.binary_search(&index) {
            self.allowed_fast.insert(position, index);
        }
    }
}
