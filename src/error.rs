use std::fmt;

#[derive(Debug)]
pub enum ProofsheetError {
    InvalidInput(String),
    SurfaceInit {
        context: String,
        width: u32,
        height: u32,
    },
    Capture(String),
    Pdf(String),
    Io(std::io::Error),
}

impl fmt::Display for ProofsheetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofsheetError::InvalidInput(message) => {
                write!(f, "invalid input: {}", message)
            }
            ProofsheetError::SurfaceInit {
                context,
                width,
                height,
            } => {
                write!(
                    f,
                    "cannot allocate {}x{} raster surface for {}",
                    width, height, context
                )
            }
            ProofsheetError::Capture(message) => {
                write!(f, "page capture failed: {}", message)
            }
            ProofsheetError::Pdf(message) => write!(f, "pdf assembly failed: {}", message),
            ProofsheetError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for ProofsheetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProofsheetError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProofsheetError {
    fn from(value: std::io::Error) -> Self {
        ProofsheetError::Io(value)
    }
}
