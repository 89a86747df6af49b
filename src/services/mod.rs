pub mod answer;
pub mod constraint;
pub mod generator;
pub mod language;
pub mod lexicon;
pub mod llm_provider;
pub mod scheduler;
pub mod srs;
pub mod vocabulary;
