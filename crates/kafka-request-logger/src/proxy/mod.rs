//! Reverse proxy host: buffers each exchange and exposes it to the telemetry
//! hooks through the phase accessor traits.

pub mod exchange;
pub mod upstream;
