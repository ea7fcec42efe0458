//! Crate-private helpers: listing field decoding and the signing policy
//! checks shared by refinement and candidate selection.

mod helpers;
pub(crate) mod policy;

pub(crate) use helpers::*;
