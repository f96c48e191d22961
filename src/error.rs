use std::{error, fmt, result};

/// Error enumerates over all possible errors cases for the `treapkv`
/// package. Every variant carries a `file:line` prefix identifying where
/// the error was raised, and a human readable message.
#[derive(Clone, Debug)]
pub enum Error {
    /// Supplied key, value or priority violates the item contract.
    InvalidInput(String, String),
    /// Store read/write failure; never recovered inside the package.
    IOError(String, String),
    /// Materialized data failed an integrity check, like an item coming
    /// back without its key, or subtree aggregates that don't add up.
    Corruption(String, String),
    /// Root compare-and-swap lost against another writer; callers may
    /// retry the operation on the new root.
    ConcurrentMutation(String, String),
    /// A key observed present was gone by the time the tree was split,
    /// racing with another deleter.
    ConcurrentDelete(String, String),
    /// Store file is missing or the store is memory-only.
    InvalidFile(String, String),
    /// Error while serializing or deserializing a CBOR record.
    FailCbor(String, String),
    /// Error while encoding or decoding the JSON root location.
    FailJson(String, String),
    /// Error converting from one type to another.
    FailConvert(String, String),
    /// Call the programmer.
    Fatal(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            InvalidInput(p, m) => write!(f, "{} InvalidInput: {}", p, m),
            IOError(p, m) => write!(f, "{} IOError: {}", p, m),
            Corruption(p, m) => write!(f, "{} Corruption: {}", p, m),
            ConcurrentMutation(p, m) => {
                write!(f, "{} ConcurrentMutation: {}", p, m)
            }
            ConcurrentDelete(p, m) => write!(f, "{} ConcurrentDelete: {}", p, m),
            InvalidFile(p, m) => write!(f, "{} InvalidFile: {}", p, m),
            FailCbor(p, m) => write!(f, "{} FailCbor: {}", p, m),
            FailJson(p, m) => write!(f, "{} FailJson: {}", p, m),
            FailConvert(p, m) => write!(f, "{} FailConvert: {}", p, m),
            Fatal(p, m) => write!(f, "{} Fatal: {}", p, m),
        }
    }
}

impl error::Error for Error {}

impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        use Error::*;

        // compare variant tags, prefix and message are incidental.
        matches!(
            (self, other),
            (InvalidInput(_, _), InvalidInput(_, _))
                | (IOError(_, _), IOError(_, _))
                | (Corruption(_, _), Corruption(_, _))
                | (ConcurrentMutation(_, _), ConcurrentMutation(_, _))
                | (ConcurrentDelete(_, _), ConcurrentDelete(_, _))
                | (InvalidFile(_, _), InvalidFile(_, _))
                | (FailCbor(_, _), FailCbor(_, _))
                | (FailJson(_, _), FailJson(_, _))
                | (FailConvert(_, _), FailConvert(_, _))
                | (Fatal(_, _), Fatal(_, _))
        )
    }
}
