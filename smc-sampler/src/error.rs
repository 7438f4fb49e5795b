use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Program build error: {diagnostic}")]
    Build { diagnostic: String },
    #[error("Kernel generation error: {0}")]
    KernelGeneration(String),
    #[error("Property was not verified on sample {sample} (outcome {outcome})")]
    UnverifiedProperty { sample: u64, outcome: i8 },
    #[error("Deadlock occurred on sample {sample}")]
    Deadlock { sample: u64 },
    #[error("Precondition violated: {0}")]
    Precondition(String),
    #[error("Device error during {context}: {message}")]
    Device { context: String, message: String },
    #[error("Invalid model: {0}")]
    InvalidModel(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub fn device(context: impl Into<String>, message: impl std::fmt::Display) -> Self {
        RuntimeError::Device {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
