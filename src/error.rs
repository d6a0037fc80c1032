use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequencerError {
    #[error("Invalid dimensions: {row_count} rows of {row_length} beats (each must be at least 1, at most 4096 cells in total)")]
    InvalidDimensions { row_count: usize, row_length: usize },

    #[error("Invalid speed: tick interval must be at least 1 ms")]
    InvalidSpeed,

    #[error("Key {key} not found (matrix has keys 1..={cell_count})")]
    KeyNotFound { key: usize, cell_count: usize },

    #[error("Row {row} has note {note}; MIDI notes run 0..=127")]
    InvalidNote { row: usize, note: u8 },

    #[error("Row {row} has no assigned sound")]
    UnmappedRow { row: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Output device error: {0}")]
    Output(String),
}

pub type Result<T> = std::result::Result<T, SequencerError>;
