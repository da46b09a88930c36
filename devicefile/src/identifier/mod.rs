//! Device identifiers and the traits they are made of.

pub mod decompose;
pub mod schema;
pub mod traits;

pub use decompose::{DecompositionCache, ValidDeviceList};
pub use schema::{IdentifierSchema, SchemaDef, Segment, TraitDomain};
pub use traits::TraitSet;
