//! Logging macros that forward to the `log` crate when the `log` feature is
//! enabled, and expand to nothing when it is not.

#[cfg(feature = "log")]
macro_rules! info {
    ($($arg:tt)+) => { log::info!($($arg)+) };
}

#[cfg(not(feature = "log"))]
macro_rules! info {
    ($($arg:tt)+) => {};
}

#[cfg(feature = "log")]
macro_rules! trace {
    ($($arg:tt)+) => { log::trace!($($arg)+) };
}

#[cfg(not(feature = "log"))]
macro_rules! trace {
    ($($arg:tt)+) => {};
}

#[cfg(feature = "log")]
macro_rules! error {
    ($($arg:tt)+) => { log::error!($($arg)+) };
}

#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)+) => {};
}
