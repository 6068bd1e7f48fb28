use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info};

/// One file of the download as the disk layer sees it: its path, its byte
/// range within the concatenated download, and whether it is currently
/// selected for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub offset: u64,
    pub length: u64,
    pub requested: bool,
}

/// Narrow interface the piece storage drives the disk layer through:
/// completion notification, file-entry enumeration and selective-download
/// registration. Writing blocks and verifying hashes happen elsewhere.
pub trait DiskAdaptor: fmt::Debug {
    fn variant(&self) -> &'static str;

    fn set_store_dir(&mut self, dir: PathBuf);

    fn store_dir(&self) -> &PathBuf;

    fn set_file_entries(&mut self, entries: Vec<FileEntry>);

    fn file_entries(&self) -> &[FileEntry];

    fn file_entry_from_path(&self, path: &str) -> Option<&FileEntry>;

    /// Marks the entry at `path` as selected. Returns false when no entry
    /// matches.
    fn add_download_entry(&mut self, path: &str) -> bool;

    fn remove_all_download_entry(&mut self);

    fn add_all_download_entry(&mut self);

    /// Called once every selected piece is on local storage. Expected to be
    /// a non-blocking enqueue; the adaptors here only record the milestone.
    fn on_download_complete(&mut self);
}

// Store-dir and file-entry bookkeeping shared by all adaptor variants.
#[derive(Debug, Default)]
struct EntryTable {
    store_dir: PathBuf,
    entries: Vec<FileEntry>,
}

impl EntryTable {
    fn entry_from_path(&self, path: &str) -> Option<&FileEntry> {
        self.entries.iter().find(|entry| entry.path == path)
    }

    fn add_download_entry(&mut self, path: &str) -> bool {
        match self.entries.iter_mut().find(|entry| entry.path == path) {
            Some(entry) => {
                entry.requested = true;
                true
            }
            None => false,
        }
    }

    fn set_all_requested(&mut self, requested: bool) {
        for entry in &mut self.entries {
            entry.requested = requested;
        }
    }
}

/// Adaptor for single-file downloads: pieces map straight onto one file.
#[derive(Debug)]
pub struct DirectDiskAdaptor {
    table: EntryTable,
    total_length: u64,
    direct_io: bool,
}

impl DirectDiskAdaptor {
    pub fn new(total_length: u64, direct_io: bool) -> Self {
        Self {
            table: EntryTable::default(),
            total_length,
            direct_io,
        }
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn direct_io(&self) -> bool {
        self.direct_io
    }
}

impl DiskAdaptor for DirectDiskAdaptor {
    fn variant(&self) -> &'static str {
        "direct"
    }

    fn set_store_dir(&mut self, dir: PathBuf) {
        self.table.store_dir = dir;
    }

    fn store_dir(&self) -> &PathBuf {
        &self.table.store_dir
    }

    fn set_file_entries(&mut self, entries: Vec<FileEntry>) {
        self.table.entries = entries;
    }

    fn file_entries(&self) -> &[FileEntry] {
        &self.table.entries
    }

    fn file_entry_from_path(&self, path: &str) -> Option<&FileEntry> {
        self.table.entry_from_path(path)
    }

    fn add_download_entry(&mut self, path: &str) -> bool {
        self.table.add_download_entry(path)
    }

    fn remove_all_download_entry(&mut self) {
        self.table.set_all_requested(false);
    }

    fn add_all_download_entry(&mut self) {
        self.table.set_all_requested(true);
    }

    fn on_download_complete(&mut self) {
        debug!(store_dir = ?self.table.store_dir, "Single-file download complete");
    }
}

/// Adaptor for multi-file downloads with direct file mapping: every file is
/// written in place under the top directory, no staging file involved.
#[derive(Debug)]
pub struct MultiDiskAdaptor {
    table: EntryTable,
    piece_length: u32,
    top_dir: String,
    direct_io: bool,
}

impl MultiDiskAdaptor {
    pub fn new(piece_length: u32, top_dir: String, direct_io: bool) -> Self {
        Self {
            table: EntryTable::default(),
            piece_length,
            top_dir,
            direct_io,
        }
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    pub fn top_dir(&self) -> &str {
        &self.top_dir
    }

    pub fn direct_io(&self) -> bool {
        self.direct_io
    }
}

impl DiskAdaptor for MultiDiskAdaptor {
    fn variant(&self) -> &'static str {
        "multi"
    }

    fn set_store_dir(&mut self, dir: PathBuf) {
        self.table.store_dir = dir;
    }

    fn store_dir(&self) -> &PathBuf {
        &self.table.store_dir
    }

    fn set_file_entries(&mut self, entries: Vec<FileEntry>) {
        self.table.entries = entries;
    }

    fn file_entries(&self) -> &[FileEntry] {
        &self.table.entries
    }

    fn file_entry_from_path(&self, path: &str) -> Option<&FileEntry> {
        self.table.entry_from_path(path)
    }

    fn add_download_entry(&mut self, path: &str) -> bool {
        self.table.add_download_entry(path)
    }

    fn remove_all_download_entry(&mut self) {
        self.table.set_all_requested(false);
    }

    fn add_all_download_entry(&mut self) {
        self.table.set_all_requested(true);
    }

    fn on_download_complete(&mut self) {
        debug!(top_dir = %self.top_dir, "Multi-file download complete");
    }
}

/// Adaptor for multi-file downloads without direct mapping: blocks land in a
/// single temporary file and the real files are carved out of it once the
/// download completes.
#[derive(Debug)]
pub struct CopyDiskAdaptor {
    table: EntryTable,
    temp_file_name: String,
    total_length: u64,
    top_dir: String,
    direct_io: bool,
}

impl CopyDiskAdaptor {
    pub fn new(temp_file_name: String, total_length: u64, top_dir: String, direct_io: bool) -> Self {
        Self {
            table: EntryTable::default(),
            temp_file_name,
            total_length,
            top_dir,
            direct_io,
        }
    }

    pub fn temp_file_name(&self) -> &str {
        &self.temp_file_name
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn top_dir(&self) -> &str {
        &self.top_dir
    }

    pub fn direct_io(&self) -> bool {
        self.direct_io
    }
}

impl DiskAdaptor for CopyDiskAdaptor {
    fn variant(&self) -> &'static str {
        "copy"
    }

    fn set_store_dir(&mut self, dir: PathBuf) {
        self.table.store_dir = dir;
    }

    fn store_dir(&self) -> &PathBuf {
        &self.table.store_dir
    }

    fn set_file_entries(&mut self, entries: Vec<FileEntry>) {
        self.table.entries = entries;
    }

    fn file_entries(&self) -> &[FileEntry] {
        &self.table.entries
    }

    fn file_entry_from_path(&self, path: &str) -> Option<&FileEntry> {
        self.table.entry_from_path(path)
    }

    fn add_download_entry(&mut self, path: &str) -> bool {
        self.table.add_download_entry(path)
    }

    fn remove_all_download_entry(&mut self) {
        self.table.set_all_requested(false);
    }

    fn add_all_download_entry(&mut self) {
        self.table.set_all_requested(true);
    }

    fn on_download_complete(&mut self) {
        let selected = self
            .table
            .entries
            .iter()
            .filter(|entry| entry.requested)
            .count();
        info!(
            temp_file = %self.temp_file_name,
            files = selected,
            "Extracting files from staging file"
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn entries() -> Vec<FileEntry> {
        vec![
            FileEntry {
                path: "top/a.bin".to_string(),
                offset: 0,
                length: 4096,
                requested: true,
            },
            FileEntry {
                path: "top/b.bin".to_string(),
                offset: 4096,
                length: 1024,
                requested: true,
            },
        ]
    }

    #[test]
    fn test_download_entry_selection() {
        let mut adaptor = MultiDiskAdaptor::new(1024, "top".to_string(), false);
        adaptor.set_file_entries(entries());

        adaptor.remove_all_download_entry();
        assert!(adaptor.file_entries().iter().all(|entry| !entry.requested));

        assert!(adaptor.add_download_entry("top/b.bin"));
        assert!(!adaptor.add_download_entry("top/missing.bin"));

        let entry = adaptor.file_entry_from_path("top/b.bin").unwrap();
        assert!(entry.requested);
        assert_eq!(entry.offset, 4096);

        adaptor.add_all_download_entry();
        assert!(adaptor.file_entries().iter().all(|entry| entry.requested));
    }

    #[test]
    fn test_adaptor_variants() {
        let direct = DirectDiskAdaptor::new(4096, true);
        let multi = MultiDiskAdaptor::new(1024, "top".to_string(), false);
        let copy = CopyDiskAdaptor::new("top.a2tmp".to_string(), 5120, "top".to_string(), false);

        assert_eq!(direct.variant(), "direct");
        assert_eq!(multi.variant(), "multi");
        assert_eq!(copy.variant(), "copy");
        assert_eq!(copy.temp_file_name(), "top.a2tmp");
    }
}
