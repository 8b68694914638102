//! Errors surfaced by the `hoard` binary.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not open the object store")]
    Storage,
    #[display("could not open the version database")]
    Database,
    #[display("could not query the version database")]
    Query,
}
