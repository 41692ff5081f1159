#[macro_use]
extern crate serde;

#[macro_use]
extern crate log;

mod audit;
mod ballot;
mod config;
mod decryption;
mod election;
mod elgamal;
mod error;
mod keygen;
mod oracle;
mod params;
mod proof;
mod question;
mod record;
mod serde_hex;
mod service;
mod store;
mod tally;
mod trustee;

pub use audit::*;
pub use ballot::*;
pub use config::*;
pub use decryption::*;
pub use election::*;
pub use elgamal::*;
pub use error::*;
pub use keygen::*;
pub use oracle::*;
pub use params::*;
pub use proof::*;
pub use question::*;
pub use record::*;
pub use serde_hex::*;
pub use service::*;
pub use store::*;
pub use tally::*;
pub use trustee::*;

#[cfg(test)]
mod tests;
