use std::path::{Path, PathBuf};

use crate::disk::FileEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Single,
    Multi,
}

// One file of the download, in torrent order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub path: String,
    pub length: u64,
}

/// Immutable description of a download: name, destination, piece geometry
/// and the file list. Shared read-only by every component.
#[derive(Debug, Clone)]
pub struct DownloadContext {
    name: String,
    store_dir: PathBuf,
    piece_length: u32,
    total_length: u64,
    mode: FileMode,
    files: Vec<FileSpec>,
}

impl DownloadContext {
    pub fn single_file(
        name: impl Into<String>,
        store_dir: impl Into<PathBuf>,
        piece_length: u32,
        total_length: u64,
    ) -> Self {
        let name = name.into();
        let files = vec![FileSpec {
            path: name.clone(),
            length: total_length,
        }];

        Self {
            name,
            store_dir: store_dir.into(),
            piece_length,
            total_length,
            mode: FileMode::Single,
            files,
        }
    }

    pub fn multi_file(
        name: impl Into<String>,
        store_dir: impl Into<PathBuf>,
        piece_length: u32,
        files: Vec<FileSpec>,
    ) -> Self {
        let total_length = files.iter().map(|file| file.length).sum();

        Self {
            name: name.into(),
            store_dir: store_dir.into(),
            piece_length,
            total_length,
            mode: FileMode::Multi,
            files,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn num_pieces(&self) -> usize {
        (self.total_length.div_ceil(u64::from(self.piece_length))) as usize
    }

    pub fn files(&self) -> &[FileSpec] {
        &self.files
    }

    /// Builds the disk-adaptor entry list: each file with its byte offset
    /// within the concatenated download, initially all selected.
    pub fn file_entries(&self) -> Vec<FileEntry> {
        let mut offset = 0u64;
        let mut entries = Vec::with_capacity(self.files.len());

        for file in &self.files {
            entries.push(FileEntry {
                path: file.path.clone(),
                offset,
                length: file.length,
                requested: true,
            });
            offset += file.length;
        }

        entries
    }
}
