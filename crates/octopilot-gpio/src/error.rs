use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("failed to initialize pin {0}: {1}")]
    PinInit(u8, String),
    #[error("failed to write pin {0}: {1}")]
    Write(u8, String),
    #[error("failed to register interrupt on pin {0}: {1}")]
    Interrupt(u8, String),
}
