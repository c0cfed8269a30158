use thiserror::Error;

/// Rejections produced when coordinates fail validation or cannot be obtained.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocationError {
    #[error("Coordinate is not a number")]
    NotANumber,

    #[error("Latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("Longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("Device location unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    #[error("Step {attempted} is out of sequence (expected step {expected})")]
    OutOfSequence { expected: u32, attempted: u32 },
}
