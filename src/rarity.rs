use rand::seq::SliceRandom;
use rand::Rng;

/// Per-piece swarm statistics: how many peers advertise the piece, plus a
/// randomized `order` used as a stable tiebreak between equally rare pieces
/// so that peers do not all herd onto the same index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceStat {
    index: usize,
    count: usize,
    order: usize,
}

impl PieceStat {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn order(&self) -> usize {
        self.order
    }
}

/// Rarity-ranked piece index.
///
/// `stats` is the flat per-piece arena (position = piece index); `sorted`
/// is a permutation of piece indexes kept ascending by `(count, order)`.
/// Both views reference the same counters, so mutations go through the
/// arena and only the sorted permutation is re-ordered.
#[derive(Debug)]
pub struct RarityIndex {
    stats: Vec<PieceStat>,
    sorted: Vec<usize>,
}

impl RarityIndex {
    pub fn new<R: Rng>(num_pieces: usize, rng: &mut R) -> Self {
        let mut stats: Vec<PieceStat> = (0..num_pieces)
            .map(|index| PieceStat {
                index,
                count: 0,
                order: 0,
            })
            .collect();

        // the shuffled position becomes each stat's permanent tiebreak
        let mut sorted: Vec<usize> = (0..num_pieces).collect();
        sorted.shuffle(rng);
        for (position, &piece_index) in sorted.iter().enumerate() {
            stats[piece_index].order = position;
        }

        Self { stats, sorted }
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn count(&self, index: usize) -> usize {
        self.stats[index].count
    }

    pub fn order(&self, index: usize) -> usize {
        self.stats[index].order
    }

    /// One more peer advertises every piece set in `bits` (MSB-first).
    pub fn add_bitfield(&mut self, bits: &[u8]) {
        self.apply_bitfield(bits, |count| count.saturating_add(1));
    }

    /// One fewer peer advertises every piece set in `bits`.
    pub fn subtract_bitfield(&mut self, bits: &[u8]) {
        self.apply_bitfield(bits, |count| count.saturating_sub(1));
    }

    /// Applies the delta between two snapshots of the same peer's bitfield.
    pub fn update_bitfield(&mut self, new_bits: &[u8], old_bits: &[u8]) {
        let mut index = 0;
        for (byte_index, &new_byte) in new_bits.iter().enumerate() {
            let old_byte = old_bits[byte_index];
            for bit_index in 0..8 {
                if index >= self.stats.len() {
                    break;
                }
                let mask = 128u8 >> bit_index;
                if new_byte & mask != 0 && old_byte & mask == 0 {
                    self.stats[index].count = self.stats[index].count.saturating_add(1);
                } else if new_byte & mask == 0 && old_byte & mask != 0 {
                    self.stats[index].count = self.stats[index].count.saturating_sub(1);
                }
                index += 1;
            }
        }
        self.sort_view();
    }

    /// Registers one more owner for a single piece (local completion makes
    /// us a source). Instead of re-sorting the whole view, only the run of
    /// stats the mutated entry can move across is re-sorted.
    pub fn add_count(&mut self, index: usize) {
        let old_key = self.key(index);
        let cur = self
            .sorted
            .partition_point(|&piece_index| self.key(piece_index) < old_key);

        self.stats[index].count = self.stats[index].count.saturating_add(1);
        let new_key = self.key(index);

        let upper = cur
            + 1
            + self.sorted[cur + 1..]
                .partition_point(|&piece_index| self.key(piece_index) <= new_key);

        let stats = &self.stats;
        self.sorted[cur..upper].sort_unstable_by_key(|&piece_index| {
            (stats[piece_index].count, stats[piece_index].order)
        });
    }

    /// Rarest member of `candidates` (ascending piece indexes): the first
    /// stat of the sorted view that belongs to the set.
    pub fn first_in(&self, candidates: &[usize]) -> Option<usize> {
        self.sorted
            .iter()
            .copied()
            .find(|piece_index| candidates.binary_search(piece_index).is_ok())
    }

    /// The sorted view, rarest first. Exposed for diagnostics and tests.
    pub fn sorted_indexes(&self) -> &[usize] {
        &self.sorted
    }

    fn apply_bitfield(&mut self, bits: &[u8], mutate: impl Fn(usize) -> usize) {
        let mut index = 0;
        for &byte in bits {
            for bit_index in 0..8 {
                if index >= self.stats.len() {
                    break;
                }
                if byte & (128u8 >> bit_index) != 0 {
                    self.stats[index].count = mutate(self.stats[index].count);
                }
                index += 1;
            }
        }
        self.sort_view();
    }

    fn key(&self, piece_index: usize) -> (usize, usize) {
        (self.stats[piece_index].count, self.stats[piece_index].order)
    }

    fn sort_view(&mut self) {
        let stats = &self.stats;
        self.sorted.sort_unstable_by_key(|&piece_index| {
            (stats[piece_index].count, stats[piece_index].order)
        });
    }

    #[cfg(test)]
    pub(crate) fn with_order(orders: &[usize]) -> Self {
        let stats: Vec<PieceStat> = orders
            .iter()
            .enumerate()
            .map(|(index, &order)| PieceStat {
                index,
                count: 0,
                order,
            })
            .collect();

        let mut rarity = Self {
            sorted: (0..stats.len()).collect(),
            stats,
        };
        rarity.sort_view();
        rarity
    }
}
