use std::{error::Error, fmt::Display};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    // A raw bitfield did not match the expected byte length
    InvalidBitfieldLength { expected: usize, actual: usize },

    // A selective-download path did not resolve to any file entry
    NoSuchFileEntry(String),
}

impl Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::InvalidBitfieldLength { expected, actual } => {
                write!(
                    f,
                    "Bitfield length mismatch: expected {} bytes, got {}",
                    expected, actual
                )
            }
            StorageError::NoSuchFileEntry(path) => {
                write!(f, "No file entry matching \"{}\", aborting download", path)
            }
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display_messages() {
        let error = StorageError::InvalidBitfieldLength {
            expected: 4,
            actual: 2,
        };
        assert_eq!(
            error.to_string(),
            "Bitfield length mismatch: expected 4 bytes, got 2"
        );

        let error = StorageError::NoSuchFileEntry("bundle/a.bin".to_string());
        assert_eq!(
            error.to_string(),
            "No file entry matching \"bundle/a.bin\", aborting download"
        );
    }
}
