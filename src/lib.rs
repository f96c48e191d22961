//! Package implement a persistable, ordered, key/value collection.
//!
//! The collection is organised as a [treap], a randomised balanced binary
//! search tree, that is never mutated in place. Every write operation
//! builds a fresh copy-on-write spine and publishes a new immutable root,
//! which means any number of concurrent readers can traverse their snapshot
//! of the tree while a single writer prepares the next one. Tree nodes and
//! their items can live in memory, in the backing [Store] file, or in both;
//! readers materialize nodes from their file location on demand and an
//! evictor can drop the in-memory copy of anything that is already
//! persisted.
//!
//! Main types of this package:
//!
//! * [Collection], the ordered key/value collection and its public API.
//! * [Store], the append-only backing file providing node/item records
//!   and the free-pool accounting.
//! * [Item], a single key/value entry along with its treap priority.
//!
//! [treap]: https://en.wikipedia.org/wiki/Treap

use std::result;

#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err($crate::Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err($crate::Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err($crate::Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

mod error;
pub mod store;
pub mod treap;
pub mod util;

pub use crate::error::Error;
pub use crate::store::Store;
pub use crate::treap::{Collection, Item, KeyCompare, Loc};

/// Type alias for Result returned by functions of this package.
pub type Result<T> = result::Result<T, Error>;
