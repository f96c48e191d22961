use cbordata::Cborize;
use serde::{Deserialize, Serialize};

const LOC_VER: u32 = 0x00050001;

/// Location of a serialized record inside the backing store file.
///
/// A `Loc` is stable for the lifetime of the store file, append-only
/// writes never move a record once written.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, Cborize)]
pub struct Loc {
    #[serde(rename = "offset")]
    pub fpos: u64,
    pub length: u64,
}

impl Loc {
    const ID: u32 = LOC_VER;

    /// Sentinel standing in for "no location".
    pub const EMPTY: Loc = Loc {
        fpos: u64::MAX,
        length: 0,
    };

    pub fn new(fpos: u64, length: u64) -> Loc {
        Loc { fpos, length }
    }

    /// Return whether this is the empty sentinel.
    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == Loc::EMPTY
    }
}

#[cfg(test)]
#[path = "loc_test.rs"]
mod loc_test;
