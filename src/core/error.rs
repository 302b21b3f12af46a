use crate::core::key::Key;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Bad block: {0}")]
    BadBlock(String),

    #[error("Out of space: {needed} sectors needed, {available} available after reclamation")]
    SpaceExhausted { needed: usize, available: usize },

    #[error("Block not found: {0}")]
    BlockNotFound(Key),

    #[error("Key not found: {0}")]
    KeyNotFound(Key),

    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedHashAlgorithm(u8),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Sector {sector} is outside the bitmap (length {length})")]
    SectorOutOfRange { sector: u64, length: u64 },

    #[error("Store directory {} is held by another instance", .0.display())]
    DirectoryLocked(PathBuf),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
