use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Any failed statement, most often `SQLITE_BUSY` after another worker
    /// held the write lock past the busy timeout.
    #[display("queue database error")]
    Database,
    #[display("queue schema could not be brought up to date")]
    Migration,
    /// A column held something its model cannot represent, such as an
    /// unknown freshness or a job payload that is not valid JSON.
    #[display("corrupt queue row: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Only [`Database`](Self::Database) errors may clear up on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }
}
