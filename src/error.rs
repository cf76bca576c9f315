use std::fmt;

/// Fatal render failures. A render call that returns one of these produced no
/// output buffer at all.
#[derive(Debug)]
pub enum ContractError {
    FontEmbed(String),
    QrGeneration(String),
    InvalidConfiguration(String),
    Io(std::io::Error),
}

impl fmt::Display for ContractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractError::FontEmbed(message) => write!(f, "font embedding failed: {}", message),
            ContractError::QrGeneration(message) => {
                write!(f, "verification code generation failed: {}", message)
            }
            ContractError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            ContractError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for ContractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ContractError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ContractError {
    fn from(value: std::io::Error) -> Self {
        ContractError::Io(value)
    }
}

/// Recoverable: the text flow engine repairs or drops the offending token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureError {
    UnsupportedGlyph(char),
    UnknownFont(usize),
}

impl fmt::Display for MeasureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasureError::UnsupportedGlyph(ch) => {
                write!(f, "no glyph for U+{:04X}", *ch as u32)
            }
            MeasureError::UnknownFont(index) => write!(f, "font handle {} is not registered", index),
        }
    }
}

impl std::error::Error for MeasureError {}
