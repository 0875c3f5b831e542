//! Offline evaluation of the question-answering pipeline over labeled cases.

pub mod cases;
pub mod evaluator;
pub mod metrics;
pub mod report;

pub use cases::{load_cases, parse_cases, EvalCase};
pub use evaluator::{CaseRecord, EvalResult, Evaluator, QualityMetrics};
pub use metrics::{nearest_rank, Summary};
