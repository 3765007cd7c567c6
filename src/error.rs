use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Which stage of the command failed.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration")]
    Config,
    #[display("storage backend")]
    Storage,
    #[display("catalog")]
    Catalog,
    #[display("executor")]
    Executor,
    #[display("tiering")]
    Tiering,
    #[display("local file {_0}")]
    LocalFile(#[error(not(source))] String),
    #[display("invalid argument: {_0}")]
    Argument(#[error(not(source))] String),
}
