/// Unit enums are stored as lowercase TEXT columns guarded by a `CHECK`
/// constraint; this keeps both directions of the mapping in one place.
macro_rules! column_enum {
    ($name:ident, $what:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }
        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.pad(self.as_str())
            }
        }
        impl ::std::str::FromStr for $name {
            type Err = $crate::error::Error;
            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => exn::bail!($crate::error::ErrorKind::InvalidData($what)),
                }
            }
        }
    };
}

// Declared after the macro so it is in textual scope.
mod entry;
mod job;

pub use self::entry::{EntryAction, EntryCounts, Freshness, QueueEntry};
pub(crate) use self::entry::EntryRow;
pub use self::job::{JobCounts, JobKind, JobPayload, JobRecord, JobStatus, QueuedUrl};
pub(crate) use self::job::JobRow;

/// Timestamps are stored as Unix seconds.
pub(crate) fn timestamp(seconds: i64, what: &'static str) -> crate::error::Result<time::UtcDateTime> {
    use exn::ResultExt;
    time::UtcDateTime::from_unix_timestamp(seconds).or_raise(|| crate::error::ErrorKind::InvalidData(what))
}
