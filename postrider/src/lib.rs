//! Dispatcher assembly: configuration, wiring, and lifecycle.

pub mod controller;

pub use controller::Postrider;
