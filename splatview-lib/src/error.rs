use std::{fmt, io};

#[derive(Debug)]
pub enum SplatError {
    Format(String),
    Device(String),
    Load(String),
    Config(String),
    Image(String),
    Superseded,
    IoError(io::Error),
}

impl fmt::Display for SplatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplatError::Format(e) => {
                write!(f, "Malformed splat data: {}", e)
            }
            SplatError::Device(e) => {
                write!(f, "Graphics device error: {}", e)
            }
            SplatError::Load(e) => {
                write!(f, "Failed to load splat source: {}", e)
            }
            SplatError::Config(e) => {
                write!(f, "Invalid render configuration: {}", e)
            }
            SplatError::Image(e) => {
                write!(f, "Failed to write the rendered frame: {}", e)
            }
            SplatError::Superseded => {
                write!(f, "The load was superseded by a newer request.")
            }
            SplatError::IoError(e) => {
                write!(f, "An I/O error occurred: {}", e)
            }
        }
    }
}

impl std::error::Error for SplatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SplatError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SplatError {
    fn from(e: io::Error) -> Self {
        SplatError::IoError(e)
    }
}
