//! Input and output guardrails applied around every solver call.

pub mod input;
pub mod output;

pub use input::{
    check_math_patterns, comprehensive_input_validation, is_valid_math_input,
    validate_math_content_safety, InputValidation, PatternVerdict,
};
pub use output::{
    format_error_message, simplify_output, validate_mathematical_accuracy, validate_output_safety,
    AccuracyReport, ErrorKind,
};
