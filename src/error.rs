use core::fmt::{self, Debug, Display};

use crate::bus::Timeout;

mod private {
    #[derive(Debug)]
    pub enum Private {}
}

/// The error type used by this library.
///
/// Register access itself cannot fail; errors can only come from the raw
/// GPIOs borrowed for the bit-banged mode switch, or from a bounded
/// completion wait.
pub enum Error<E> {
    /// A GPIO could not be set during the bit-banged mode switch.
    Gpio(E),

    /// A completion poll ran out of its configured spin budget.
    ///
    /// Only produced when the engine was built with
    /// [`WaitPolicy::Spins`](crate::bus::WaitPolicy::Spins); the default
    /// policy polls forever and leaves a wedged controller to the watchdog.
    Timeout,

    #[doc(hidden)]
    __NonExhaustive(private::Private),
}

impl<E> From<Timeout> for Error<E> {
    fn from(_: Timeout) -> Self {
        Error::Timeout
    }
}

impl<E: Debug> Debug for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Gpio(gpio) => write!(f, "Error::Gpio({:?})", gpio),
            Error::Timeout => f.write_str("Error::Timeout"),
            Error::__NonExhaustive(_) => unreachable!(),
        }
    }
}

impl<E: Display> Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Gpio(gpio) => write!(f, "GPIO error: {}", gpio),
            Error::Timeout => f.write_str("transaction completion poll timed out"),
            Error::__NonExhaustive(_) => unreachable!(),
        }
    }
}
