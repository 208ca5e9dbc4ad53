//! Source modules — spec.md §4.4. Each converts a raw external reading
//! into `Sample`s; the caller (a tokio task in `main.rs`) owns the sample
//! cadence and the `bus.push` call, so every function here stays testable
//! without the bus or a runtime.

pub mod analog;
pub mod can;
pub mod gps;
pub mod imu;
