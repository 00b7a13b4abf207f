//! Selection and fee aggregation logic behind the payment screens

pub mod exam_policy;
pub mod exam_selection;
pub mod fee_aggregator;

pub use exam_policy::{resolve_terms, ExamTerms, TermsSource};
pub use exam_selection::{ExamSelection, SelectedExamInfo};
pub use fee_aggregator::{FeeAggregator, FeeSummary, Recalculation};
