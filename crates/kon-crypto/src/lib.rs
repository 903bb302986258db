#![forbid(unsafe_code)]

pub use sequoia_openpgp as openpgp;

pub mod status;
pub mod userid;

pub mod keys;
pub mod contact;
pub mod x509_bridge;

pub mod envelope;
pub mod stream;
pub mod encrypt;
pub mod decrypt;

#[cfg(test)]
mod test_keys;
#[cfg(test)]
mod proptests;
