#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use sensor_core as core;
pub use sensor_entities as entities;

mod admin;
mod args;

pub use self::args::{Args, LogFormat, Runtime};
