extern crate byteorder;
#[macro_use]
extern crate log;
#[macro_use]
extern crate bitflags;

#[macro_use]
pub(crate) mod utils;

pub mod disk;
mod error;
pub mod fs;

pub use error::*;

pub mod part;
pub mod region;

#[cfg(test)]
extern crate better_panic;

#[cfg(test)]
pub(crate) fn tests_init() {
    better_panic::install();
}
