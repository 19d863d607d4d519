pub mod clock;
pub mod shutdown_signal;
