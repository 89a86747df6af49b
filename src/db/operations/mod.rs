pub mod concepts;
pub mod questions;
pub mod reviews;

pub use concepts::{Concept, NewConcept, ProgressSummary};
pub use questions::{GeneratedQuestion, NewQuestion};
pub use reviews::{ReviewRecord, ReviewRef};
