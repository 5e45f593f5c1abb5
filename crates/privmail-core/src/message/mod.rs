//! Message Model and Normalizer
//!
//! An owned message representation (ordered headers plus a recursive MIME
//! part tree) and the normalizer that converts it into the structured
//! document tree used for condition evaluation.

mod model;
mod normalize;

pub use model::{EmailMessage, Header, MimePart, PartBody};
pub use normalize::{normalize, DocNode, MarkupOutcome, NormalizedDocument, NormalizedPart};
