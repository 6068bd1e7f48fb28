use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::bitfield::Bitfield;
use crate::config::StorageConfig;
use crate::context::{DownloadContext, FileMode};
use crate::disk::{CopyDiskAdaptor, DirectDiskAdaptor, DiskAdaptor, MultiDiskAdaptor};
use crate::error::StorageError;
use crate::events::Event;
use crate::have_log::HaveLog;
use crate::peer::Peer;
use crate::piece::{Piece, BLOCK_LENGTH};
use crate::rarity::RarityIndex;

// Partial pieces kept in memory before eviction kicks in
const MAX_USED_PIECES: usize = 100;

/// Owns the download state and decides which piece each peer session works
/// on next: rarest first against the peer's bitfield, the allowed-fast set
/// while choked, or a sparse pick for sources that have everything.
///
/// All methods are synchronous and expect a single logical owner; none of
/// the internal structures are synchronized.
#[derive(Debug)]
pub struct PieceStorage {
    ctx: DownloadContext,
    bitfield: Bitfield,
    rarity: RarityIndex,
    in_flight: Vec<Piece>,
    have_log: HaveLog,
    disk: Box<dyn DiskAdaptor>,
    end_game_piece_num: usize,
    event_tx: Option<UnboundedSender<Event>>,
}

impl PieceStorage {
    pub fn new(ctx: DownloadContext, config: &StorageConfig) -> Self {
        Self::with_rng(ctx, config, &mut rand::thread_rng())
    }

    /// Like [`PieceStorage::new`] with an explicit randomness source for the
    /// rarity tiebreak order, so tests can seed it deterministically.
    pub fn with_rng<R: Rng>(ctx: DownloadContext, config: &StorageConfig, rng: &mut R) -> Self {
        let bitfield = Bitfield::new(ctx.piece_length(), ctx.total_length());
        let rarity = RarityIndex::new(bitfield.num_pieces(), rng);
        let disk = build_disk_adaptor(&ctx, config);

        Self {
            ctx,
            bitfield,
            rarity,
            in_flight: Vec::new(),
            have_log: HaveLog::new(),
            disk,
            end_game_piece_num: config.end_game_piece_num,
            event_tx: None,
        }
    }

    /// Re-instantiates the disk adaptor for the current download mode and
    /// configuration, forwarding the store dir and file entries to it.
    pub fn init_storage(&mut self, config: &StorageConfig) {
        self.disk = build_disk_adaptor(&self.ctx, config);
    }

    pub fn set_event_tx(&mut self, event_tx: UnboundedSender<Event>) {
        self.event_tx = Some(event_tx);
    }

    pub fn set_end_game_piece_num(&mut self, end_game_piece_num: usize) {
        self.end_game_piece_num = end_game_piece_num;
    }

    pub fn disk_adaptor(&self) -> &dyn DiskAdaptor {
        self.disk.as_ref()
    }

    pub fn set_disk_adaptor(&mut self, disk: Box<dyn DiskAdaptor>) {
        self.disk = disk;
    }

    pub fn num_pieces(&self) -> usize {
        self.bitfield.num_pieces()
    }

    pub fn has_piece(&self, index: usize) -> bool {
        self.bitfield.has_piece(index)
    }

    pub fn is_piece_in_use(&self, index: usize) -> bool {
        self.bitfield.is_piece_in_use(index)
    }

    pub fn piece_length(&self, index: usize) -> u32 {
        self.bitfield.piece_len(index)
    }

    // Whether the peer advertises anything we still want
    pub fn has_missing_piece(&self, peer: &Peer) -> bool {
        self.bitfield.missing_index(peer.bitfield()).is_some()
    }

    /// Endgame engages once few enough selected pieces are missing; the
    /// one-session-per-piece rule is relaxed so the tail finishes fast.
    pub fn is_end_game(&self) -> bool {
        self.bitfield.count_missing_pieces() <= self.end_game_piece_num
    }

    /// Rarest-first pick among the pieces `peer` advertises. Returns the
    /// checked-out piece, or `None` when the peer has nothing we want.
    pub fn get_missing_piece(&mut self, peer: &Peer) -> Option<&mut Piece> {
        let index = self.missing_piece_index(peer)?;
        Some(self.check_out_piece(index))
    }

    /// Pick restricted to the peer's allowed-fast set, for requesting while
    /// choked. `None` when the fast extension is off or nothing qualifies.
    pub fn get_missing_fast_piece(&mut self, peer: &Peer) -> Option<&mut Piece> {
        let index = self.missing_fast_piece_index(peer)?;
        Some(self.check_out_piece(index))
    }

    /// Peerless pick for sources that can serve any byte range: chooses an
    /// index from the emptiest region of the file to spread in-flight work.
    pub fn get_sparse_missing_piece(&mut self) -> Option<&mut Piece> {
        let index = self.bitfield.sparse_missing_unused_index()?;
        Some(self.check_out_piece(index))
    }

    /// Explicit-index pick; `None` when the piece is already held or
    /// checked out.
    pub fn get_missing_piece_at(&mut self, index: usize) -> Option<&mut Piece> {
        if self.has_piece(index) || self.is_piece_in_use(index) {
            return None;
        }
        Some(self.check_out_piece(index))
    }

    /// Marks `index` in use and returns its in-flight record, creating one
    /// when the piece is checked out for the first time. A record left over
    /// from a cancelled session is handed back with its progress intact.
    pub fn check_out_piece(&mut self, index: usize) -> &mut Piece {
        self.bitfield.set_in_use(index);

        let position = match self.in_flight_position(index) {
            Some(position) => position,
            None => {
                self.in_flight
                    .push(Piece::new(index, self.bitfield.piece_len(index)));
                self.in_flight.len() - 1
            }
        };

        &mut self.in_flight[position]
    }

    /// Read-only progress snapshot for `index`: the in-flight record if one
    /// exists, a fully complete record for a piece we have, or an empty one.
    /// Never inserts into the in-flight set.
    pub fn get_piece(&self, index: usize) -> Piece {
        if let Some(position) = self.in_flight_position(index) {
            return self.in_flight[position].clone();
        }

        let mut piece = Piece::new(index, self.bitfield.piece_len(index));
        if self.bitfield.has_piece(index) {
            piece.set_all_blocks();
        }
        piece
    }

    // In-flight record for a checked-out piece, for recording block arrivals
    pub fn piece_mut(&mut self, index: usize) -> Option<&mut Piece> {
        self.in_flight
            .iter_mut()
            .find(|piece| piece.index() == index)
    }

    /// Commits a verified piece: drops the in-flight record, marks it held,
    /// counts us as a new source for it, and fires the completion
    /// notifications when this was the last selected piece.
    pub fn complete_piece(&mut self, index: usize) {
        self.remove_in_flight(index);
        if !self.is_end_game() {
            self.reduce_used_pieces(MAX_USED_PIECES);
        }
        if self.all_download_finished() {
            return;
        }

        self.bitfield.set_piece(index);
        self.bitfield.unset_in_use(index);
        self.rarity.add_count(index);
        self.emit(Event::PieceCompleted { piece_index: index });

        if self.download_finished() {
            self.disk.on_download_complete();
            if self.is_selective_download() {
                info!("Selected files downloaded, no further requests will be made");
                self.emit(Event::SelectiveDownloadComplete);
            } else {
                info!("Download completed");
                self.emit(Event::DownloadComplete);
            }
        }
    }

    /// Releases a checked-out piece. Progress already made is kept for the
    /// next session; a record with no completed bytes is dropped outright
    /// (unless endgame, where several sessions may share the index).
    pub fn cancel_piece(&mut self, index: usize) {
        self.bitfield.unset_in_use(index);

        if !self.is_end_game() {
            let is_empty = self
                .in_flight
                .iter()
                .find(|piece| piece.index() == index)
                .map(|piece| piece.completed_length() == 0)
                .unwrap_or(false);
            if is_empty {
                self.remove_in_flight(index);
            }
        }
    }

    /// Bounds the in-flight set to `keep_max` records by dropping released
    /// partial pieces, least-filled first. Passes run at fill-rate
    /// thresholds 10%, 20%, 30% and 40%; pieces more than half filled are
    /// never evicted, so nearly-done work survives memory pressure.
    pub fn reduce_used_pieces(&mut self, keep_max: usize) {
        if self.in_flight.len() <= keep_max {
            return;
        }

        let mut to_delete = self.in_flight.len() - keep_max;
        let mut fill_rate = 10;
        while fill_rate < 50 {
            let deleted = self.delete_used_pieces_by_fill_rate(fill_rate, to_delete);
            if deleted == 0 {
                break;
            }
            to_delete -= deleted;
            fill_rate += 10;
        }
    }

    fn delete_used_pieces_by_fill_rate(&mut self, fill_rate: usize, to_delete: usize) -> usize {
        let mut deleted = 0;
        let mut position = 0;

        while position < self.in_flight.len() && deleted < to_delete {
            let piece = &self.in_flight[position];
            if !self.bitfield.is_piece_in_use(piece.index())
                && piece.count_complete_blocks() * 100 <= piece.count_blocks() * fill_rate
            {
                let index = piece.index();
                let fill = piece.count_complete_blocks() * 100 / piece.count_blocks();
                debug!(
                    piece_index = index,
                    fill_percent = fill,
                    threshold = fill_rate,
                    "Evicting stalled partial piece"
                );
                self.in_flight.remove(position);
                deleted += 1;
            } else {
                position += 1;
            }
        }

        deleted
    }

    /// Records a local completion for outgoing HAVE advertisements.
    pub fn advertise_piece(&mut self, origin: u64, index: usize) {
        self.have_log.push(origin, index);
    }

    /// Piece indexes advertised since `since` by sessions other than
    /// `my_id`, newest first.
    pub fn advertised_piece_indexes(&self, my_id: u64, since: Instant) -> Vec<usize> {
        self.have_log.collect_since(my_id, since)
    }

    pub fn remove_advertised_piece(&mut self, max_age: Duration) {
        self.have_log.prune_older_than(max_age);
    }

    // --- swarm statistics -------------------------------------------------

    /// A peer announced its full bitfield: count it toward piece rarity.
    pub fn add_peer_bitfield(&mut self, bits: &[u8]) -> Result<(), StorageError> {
        self.validate_bitfield_len(bits)?;
        self.rarity.add_bitfield(bits);
        Ok(())
    }

    /// A peer disconnected: remove its bitfield from the rarity counters.
    pub fn subtract_peer_bitfield(&mut self, bits: &[u8]) -> Result<(), StorageError> {
        self.validate_bitfield_len(bits)?;
        self.rarity.subtract_bitfield(bits);
        Ok(())
    }

    /// A tracked peer's bitfield changed: apply only the delta.
    pub fn update_peer_bitfield(
        &mut self,
        new_bits: &[u8],
        old_bits: &[u8],
    ) -> Result<(), StorageError> {
        self.validate_bitfield_len(new_bits)?;
        self.validate_bitfield_len(old_bits)?;
        self.rarity.update_bitfield(new_bits, old_bits);
        Ok(())
    }

    // --- selective download -----------------------------------------------

    /// Restricts the download to `paths`. Clears the current selection,
    /// re-registers each path with the disk adaptor and filters the
    /// corresponding piece ranges. A path without a matching file entry
    /// aborts with [`StorageError::NoSuchFileEntry`]. No-op outside
    /// multi-file mode or with an empty path list.
    pub fn set_file_filter(&mut self, paths: &[String]) -> Result<(), StorageError> {
        if self.ctx.mode() != FileMode::Multi || paths.is_empty() {
            return Ok(());
        }

        self.disk.remove_all_download_entry();
        for path in paths {
            if !self.disk.add_download_entry(path) {
                return Err(StorageError::NoSuchFileEntry(path.clone()));
            }
            if let Some(entry) = self.disk.file_entry_from_path(path) {
                let (offset, length) = (entry.offset, entry.length);
                self.bitfield.add_filter(offset, length);
            }
        }
        self.bitfield.enable_filter();

        Ok(())
    }

    /// Filter form taking 1-based file indexes into the adaptor's entry
    /// list; duplicates are dropped and order does not matter.
    pub fn set_file_filter_by_index(&mut self, indexes: &[usize]) -> Result<(), StorageError> {
        let mut sorted = indexes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut paths = Vec::new();
        for (position, entry) in self.disk.file_entries().iter().enumerate() {
            if sorted.binary_search(&(position + 1)).is_ok() {
                debug!(file_index = position + 1, path = %entry.path, "Selected file entry");
                paths.push(entry.path.clone());
            }
        }

        self.set_file_filter(&paths)
    }

    /// Lifts the selective-download restriction and restores the full
    /// download-entry set on the disk adaptor.
    pub fn clear_file_filter(&mut self) {
        self.bitfield.clear_filter();
        self.disk.add_all_download_entry();
    }

    pub fn is_selective_download(&self) -> bool {
        self.bitfield.is_filter_enabled()
    }

    // --- progress ---------------------------------------------------------

    pub fn total_length(&self) -> u64 {
        self.bitfield.total_length()
    }

    pub fn filtered_total_length(&self) -> u64 {
        self.bitfield.filtered_total_length()
    }

    /// Bytes on local storage plus bytes of partially downloaded pieces.
    pub fn completed_length(&self) -> u64 {
        self.bitfield.completed_length() + self.in_flight_completed_length()
    }

    pub fn filtered_completed_length(&self) -> u64 {
        self.bitfield.filtered_completed_length() + self.in_flight_completed_length()
    }

    // Every selected piece is held
    pub fn download_finished(&self) -> bool {
        self.bitfield.is_filtered_all_set()
    }

    // Every piece is held, selected or not
    pub fn all_download_finished(&self) -> bool {
        self.bitfield.is_all_set()
    }

    // --- resume -----------------------------------------------------------

    /// Installs a saved have-bitfield; the restored pieces also count
    /// toward rarity since we can serve them now.
    pub fn set_bitfield(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        self.bitfield.set_bitfield(bytes)?;
        self.rarity.add_bitfield(bytes);
        Ok(())
    }

    pub fn bitfield(&self) -> &[u8] {
        self.bitfield.as_bytes()
    }

    pub fn bitfield_len(&self) -> usize {
        self.bitfield.bitfield_len()
    }

    pub fn mark_all_pieces_done(&mut self) {
        self.bitfield.set_all();
    }

    /// Resumes from a contiguous prefix of `length` downloaded bytes. Full
    /// pieces become have; a trailing remainder becomes an in-flight record
    /// with its completed blocks set but its use bit clear, waiting for a
    /// later check-out to claim it.
    pub fn mark_pieces_done(&mut self, length: u64) {
        assert!(length <= self.ctx.total_length(), "length exceeds download");

        if length == self.ctx.total_length() {
            self.bitfield.set_all();
            return;
        }

        let piece_length = u64::from(self.ctx.piece_length());
        let full_pieces = (length / piece_length) as usize;
        if full_pieces > 0 {
            self.bitfield.set_piece_range(0, full_pieces - 1);
        }

        let remainder_blocks = ((length % piece_length) / u64::from(BLOCK_LENGTH)) as usize;
        if remainder_blocks > 0 {
            let mut piece = Piece::new(full_pieces, self.bitfield.piece_len(full_pieces));
            for block_index in 0..remainder_blocks {
                piece.complete_block(block_index);
            }
            self.in_flight.push(piece);
        }
    }

    /// Hash check failed downstream: the piece must be fetched again.
    pub fn mark_piece_missing(&mut self, index: usize) {
        self.bitfield.unset_piece(index);
    }

    /// Restores partial pieces saved by a previous session. Use bits are
    /// left clear; selection will claim the records via check-out.
    pub fn add_in_flight_pieces(&mut self, pieces: Vec<Piece>) {
        self.in_flight.extend(pieces);
    }

    pub fn in_flight_pieces(&self) -> &[Piece] {
        &self.in_flight
    }

    pub fn count_in_flight_pieces(&self) -> usize {
        self.in_flight.len()
    }

    // --- internals --------------------------------------------------------

    fn missing_piece_index(&self, peer: &Peer) -> Option<usize> {
        let candidates = if self.is_end_game() {
            self.bitfield.all_missing_indexes(peer.bitfield())
        } else {
            self.bitfield.all_missing_unused_indexes(peer.bitfield())
        };

        if candidates.is_empty() {
            return None;
        }
        self.rarity.first_in(&candidates)
    }

    fn missing_fast_piece_index(&self, peer: &Peer) -> Option<usize> {
        if !peer.fast_extension_enabled() || peer.allowed_fast().is_empty() {
            return None;
        }

        // temporary bitfield holding the allowed pieces the peer has and
        // we still lack
        let mut allowed = vec![0u8; self.bitfield.bitfield_len()];
        for &index in peer.allowed_fast() {
            if index >= self.bitfield.num_pieces() {
                continue;
            }
            if !self.bitfield.has_piece(index) && peer.has_piece(index) {
                allowed[index / 8] |= 1 << (7 - index % 8);
            }
        }

        if self.is_end_game() {
            self.bitfield.missing_index(&allowed)
        } else {
            self.bitfield.missing_unused_index(&allowed)
        }
    }

    fn in_flight_position(&self, index: usize) -> Option<usize> {
        self.in_flight.iter().position(|piece| piece.index() == index)
    }

    fn remove_in_flight(&mut self, index: usize) {
        if let Some(position) = self.in_flight_position(index) {
            self.in_flight.remove(position);
        }
    }

    fn in_flight_completed_length(&self) -> u64 {
        self.in_flight
            .iter()
            .map(|piece| piece.completed_length())
            .sum()
    }

    fn validate_bitfield_len(&self, bits: &[u8]) -> Result<(), StorageError> {
        if bits.len() != self.bitfield.bitfield_len() {
            return Err(StorageError::InvalidBitfieldLength {
                expected: self.bitfield.bitfield_len(),
                actual: bits.len(),
            });
        }
        Ok(())
    }

    fn emit(&self, event: Event) {
        if let Some(event_tx) = &self.event_tx {
            let _ = event_tx.send(event);
        }
    }

    #[cfg(test)]
    pub(crate) fn set_rarity_order(&mut self, orders: &[usize]) {
        self.rarity = RarityIndex::with_order(orders);
    }
}

fn build_disk_adaptor(ctx: &DownloadContext, config: &StorageConfig) -> Box<dyn DiskAdaptor> {
    let mut disk: Box<dyn DiskAdaptor> = match ctx.mode() {
        FileMode::Single => {
            debug!("Instantiating direct disk adaptor");
            Box::new(DirectDiskAdaptor::new(
                ctx.total_length(),
                config.enable_direct_io,
            ))
        }
        FileMode::Multi if config.direct_file_mapping => {
            debug!("Instantiating multi disk adaptor");
            Box::new(MultiDiskAdaptor::new(
                ctx.piece_length(),
                ctx.name().to_string(),
                config.enable_direct_io,
            ))
        }
        FileMode::Multi => {
            debug!("Instantiating copy disk adaptor");
            Box::new(CopyDiskAdaptor::new(
                format!("{}.a2tmp", ctx.name()),
                ctx.total_length(),
                ctx.name().to_string(),
                config.enable_direct_io,
            ))
        }
    };

    disk.set_store_dir(ctx.store_dir().to_path_buf());
    disk.set_file_entries(ctx.file_entries());
    disk
}
