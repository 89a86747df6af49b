pub mod config;
pub mod db;
pub mod engine;
pub mod logging;
pub mod response;
pub mod services;
pub mod types;
pub mod workers;

pub use engine::PracticeEngine;
pub use response::{FallbackMode, PracticeError, Severity};
pub use services::language::Language;
pub use services::scheduler::PracticeItem;
pub use types::{QuestionType, Scope};
