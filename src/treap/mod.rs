//! Module implement a copy-on-write treap with lazily persisted nodes.
//!
//! [Collection] type allow concurrent read access and a single serialized
//! writer per root generation. Writes never mutate a published tree;
//! instead the [algebra][self] operations (union, split, join) build a
//! fresh spine and the new root is installed with a compare-and-swap
//! against the witness root the writer started from. Losing the CAS
//! surfaces as `ConcurrentMutation` and retrying is left to the caller.
//!
//! Roots retired by a mutation are tracked by reference counted [RootRef]
//! handles. A retired root that still has readers chains itself to its
//! successor, deferring the successor's reclamation until the last slow
//! reader lets go. Reclamation returns nodes to the store's free pool
//! only when they are provably unreachable.

mod algebra;
mod collection;
mod depth;
mod item;
mod loc;
mod node;
mod root;
mod stats;

pub use collection::{Collection, KeyCompare};
pub use depth::Depth;
pub use item::{Item, ItemRef, MAX_KEY_LEN};
pub use loc::Loc;
pub use node::{Node, NodeLoc};
pub use root::RootRef;
pub use stats::{FreeStats, Stats};

pub(crate) use item::ITEM_HDR_LEN;
pub(crate) use node::NodeRec;
