use std::fs;

use serde::Deserialize;

const CONFIG_PATH: &str = "config.toml";

// Missing-piece count at which endgame mode engages by default.
pub const DEFAULT_END_GAME_PIECE_NUM: usize = 20;

#[derive(Debug, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    // Hint the disk writer to bypass the page cache
    #[serde(default)]
    pub enable_direct_io: bool,

    // Multi-file mode: write each file in place instead of staging
    // through a single temporary file
    #[serde(default = "default_direct_file_mapping")]
    pub direct_file_mapping: bool,

    #[serde(default = "default_end_game_piece_num")]
    pub end_game_piece_num: usize,
}

fn default_direct_file_mapping() -> bool {
    true
}

fn default_end_game_piece_num() -> usize {
    DEFAULT_END_GAME_PIECE_NUM
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enable_direct_io: false,
            direct_file_mapping: default_direct_file_mapping(),
            end_game_piece_num: default_end_game_piece_num(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Config, Box<dyn std::error::Error>> {
        let toml_str = fs::read_to_string(CONFIG_PATH)?;
        let config: Config = toml::de::from_str(&toml_str)?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let config: Config = toml::de::from_str(
            r#"
            [storage]
            enable_direct_io = true
            direct_file_mapping = false
            end_game_piece_num = 10
            "#,
        )
        .unwrap();

        assert_eq!(
            config,
            Config {
                storage: StorageConfig {
                    enable_direct_io: true,
                    direct_file_mapping: false,
                    end_game_piece_num: 10,
                },
            }
        );
    }

    #[test]
    fn test_parse_config_defaults() {
        // an empty document must yield the defaults for every key
        let config: Config = toml::de::from_str("").unwrap();

        assert_eq!(
            config,
            Config {
                storage: StorageConfig {
                    enable_direct_io: false,
                    direct_file_mapping: true,
                    end_game_piece_num: DEFAULT_END_GAME_PIECE_NUM,
                },
            }
        );
    }
}
