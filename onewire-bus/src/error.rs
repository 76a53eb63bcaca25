use core::fmt::{self, Debug, Display, Formatter};

/// One wire communication error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OneWireError<E> {
    /// Encapsulates the error type from the underlying hardware.
    Other(E),
    /// Indicates that no device is present on the bus.
    NoDevicePresent,
    /// Indicates that a short circuit was detected on the bus.
    ShortCircuit,
    /// Indicates that the operation is not implemented by the bus, such as driving a strong pull-up.
    Unimplemented,
    /// Computed CRC of the ROM is invalid.
    InvalidRomCrc,
    /// The ROM search kept reading identifiers with a bad CRC and gave up.
    ///
    /// The bus is considered too noisy to trust; `failures` is the number of failed passes.
    RomCrcRetriesExceeded {
        /// Number of passes that produced an invalid ROM code.
        failures: u16,
    },
    /// No hardware execution slot was left to run the bus engine on.
    ResourceExhausted,
}

impl<E> From<E> for OneWireError<E> {
    fn from(other: E) -> Self {
        Self::Other(other)
    }
}

impl<E: Display> Display for OneWireError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(e) => write!(f, "bus error: {e}"),
            Self::NoDevicePresent => f.write_str("no device present on the bus"),
            Self::ShortCircuit => f.write_str("short circuit detected on the bus"),
            Self::Unimplemented => f.write_str("operation not supported by the bus"),
            Self::InvalidRomCrc => f.write_str("invalid ROM code CRC"),
            Self::RomCrcRetriesExceeded { failures } => {
                write!(f, "ROM search aborted after {failures} CRC failures")
            }
            Self::ResourceExhausted => f.write_str("no free execution slot for the bus engine"),
        }
    }
}

impl<E: Debug + Display> core::error::Error for OneWireError<E> {}
