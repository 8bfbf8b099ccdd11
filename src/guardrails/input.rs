use crate::llm::ChatModel;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static NON_MATH_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^(hi|hello|hey|how are you|what's up|good morning|good afternoon)\b",
        r"\b(weather|news|sports|politics|food|music|movie)\b",
        r"^(thank you|thanks|bye|goodbye|see you)\b",
        r"\b(tell me a joke|story|poem)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static UNSAFE_INPUT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(hack|cheat|exploit|bypass)",
        r"(illegal|fraud|scam)",
        r"(violent|harmful|dangerous)",
        r"(explicit|inappropriate|adult)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

// A lone x, y or z; "2x" counts, "box" does not.
static VARIABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^A-Za-z])[xyz]($|[^A-Za-z])").unwrap());

const MATH_KEYWORDS: &[&str] = &[
    "solve",
    "equation",
    "derivative",
    "integral",
    "limit",
    "function",
    "calculate",
    "find",
    "simplify",
    "expand",
    "factor",
    "graph",
    "algebra",
    "calculus",
    "geometry",
    "trigonometry",
    "statistics",
    "polynomial",
    "logarithm",
    "exponential",
    "matrix",
    "vector",
    "theorem",
    "proof",
    "formula",
    "inequality",
    "system",
];

const MATH_SYMBOLS: &[char] = &['+', '-', '*', '/', '=', '^', '√', '∫', '∂'];

/// Outcome of the cheap, model-free part of input validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternVerdict {
    TooShort,
    NonMath,
    Math,
    Ambiguous,
}

pub fn check_math_patterns(text: &str) -> PatternVerdict {
    let trimmed = text.trim();
    if trimmed.chars().count() < 2 {
        return PatternVerdict::TooShort;
    }

    let lower = trimmed.to_lowercase();
    if let Some(pattern) = NON_MATH_PATTERNS.iter().find(|re| re.is_match(&lower)) {
        debug!("Input guardrail: non-math pattern {}", pattern.as_str());
        return PatternVerdict::NonMath;
    }

    let has_keyword = MATH_KEYWORDS.iter().any(|k| lower.contains(k));
    let has_symbol = trimmed.contains(MATH_SYMBOLS) || VARIABLE_RE.is_match(trimmed);
    if has_keyword || has_symbol {
        PatternVerdict::Math
    } else {
        PatternVerdict::Ambiguous
    }
}

fn classifier_prompt(text: &str) -> String {
    format!(
        r#"You are a strict math question classifier for an educational system.

Analyze this input and determine if it's a mathematics-related question or request.

Input: "{text}"

Consider it valid ONLY if it's asking about:
- Solving equations or mathematical problems
- Mathematical concepts, theories, or explanations
- Calculations, derivatives, integrals, etc.
- Geometry, algebra, calculus, statistics, etc.
- Mathematical proofs or formulas

Consider it INVALID if it's:
- General conversation (greetings, how are you, etc.)
- Non-math subjects (weather, news, sports, etc.)
- Personal questions or casual chat
- Requests for stories, jokes, or non-educational content

Respond with exactly 'VALID' or 'INVALID' - nothing else."#
    )
}

/// Decide whether `text` is a math question. Ambiguous inputs go to the
/// classifier model when one is available.
pub async fn is_valid_math_input(text: &str, classifier: Option<&dyn ChatModel>) -> bool {
    match check_math_patterns(text) {
        PatternVerdict::Math => {
            debug!("✅ Input guardrail: math keywords/symbols detected");
            true
        }
        PatternVerdict::TooShort | PatternVerdict::NonMath => {
            info!("❌ Input guardrail rejected input");
            false
        }
        PatternVerdict::Ambiguous => {
            let Some(model) = classifier else {
                debug!("Input guardrail: ambiguous input and no classifier");
                return false;
            };
            match model.complete(&classifier_prompt(text)).await {
                Ok(reply) => {
                    let reply = reply.trim().to_uppercase();
                    let valid = reply.contains("VALID") && !reply.contains("INVALID");
                    info!("🤖 Input guardrail classifier said {reply}");
                    valid
                }
                Err(e) => {
                    warn!("⚠️ Input guardrail classifier failed: {e}");
                    false
                }
            }
        }
    }
}

pub fn validate_math_content_safety(text: &str) -> bool {
    let lower = text.to_lowercase();
    match UNSAFE_INPUT_PATTERNS.iter().find(|re| re.is_match(&lower)) {
        Some(pattern) => {
            warn!("⚠️ Safety guardrail: inappropriate pattern {}", pattern.as_str());
            false
        }
        None => true,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputValidation {
    pub is_valid: bool,
    pub is_math_related: bool,
    pub is_safe: bool,
    pub confidence_score: f32,
    pub reason: String,
}

pub async fn comprehensive_input_validation(
    text: &str,
    classifier: Option<&dyn ChatModel>,
) -> InputValidation {
    let mut result = InputValidation {
        is_safe: validate_math_content_safety(text),
        ..InputValidation::default()
    };
    if !result.is_safe {
        result.reason = "Content failed safety validation".to_string();
        return result;
    }

    result.is_math_related = is_valid_math_input(text, classifier).await;
    if !result.is_math_related {
        result.reason = "Input is not mathematics-related".to_string();
        return result;
    }

    result.is_valid = true;
    result.confidence_score = 0.95;
    result.reason = "Input passed all validation checks".to_string();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ServerError, llm::tests::ScriptedChat};

    #[test]
    fn pattern_verdicts() {
        assert_eq!(check_math_patterns(" a "), PatternVerdict::TooShort);
        assert_eq!(check_math_patterns("Hello there"), PatternVerdict::NonMath);
        assert_eq!(check_math_patterns("what's the weather"), PatternVerdict::NonMath);
        assert_eq!(check_math_patterns("thanks a lot"), PatternVerdict::NonMath);
        assert_eq!(check_math_patterns("Solve 2x + 3 = 7"), PatternVerdict::Math);
        assert_eq!(check_math_patterns("what is 7 * 8"), PatternVerdict::Math);
        assert_eq!(check_math_patterns("what is ∫ sin"), PatternVerdict::Math);
        assert_eq!(check_math_patterns("Derivative of sin"), PatternVerdict::Math);
        assert_eq!(check_math_patterns("what is 2x"), PatternVerdict::Math);
        assert_eq!(check_math_patterns("what is pi"), PatternVerdict::Ambiguous);
    }

    #[test]
    fn words_containing_greetings_or_variables_are_not_misread() {
        // "hierarchy" starts with "hi"; "box" contains "x".
        assert_eq!(
            check_math_patterns("hierarchy of number sets"),
            PatternVerdict::Ambiguous
        );
        assert_eq!(check_math_patterns("what is a box"), PatternVerdict::Ambiguous);
    }

    #[tokio::test]
    async fn ambiguous_input_uses_classifier() {
        let chat = ScriptedChat::new(vec![Ok(" valid\n".into()), Ok("INVALID".into())]);
        assert!(is_valid_math_input("what is pi", Some(&chat)).await);
        assert!(!is_valid_math_input("what is love", Some(&chat)).await);
        assert_eq!(chat.prompt_count(), 2);
        assert!(chat.prompts.lock().unwrap()[0].contains("Input: \"what is pi\""));
    }

    #[tokio::test]
    async fn clear_inputs_skip_classifier() {
        let chat = ScriptedChat::always("VALID");
        assert!(is_valid_math_input("solve x = 2", Some(&chat)).await);
        assert!(!is_valid_math_input("hey", Some(&chat)).await);
        assert_eq!(chat.prompt_count(), 0);
    }

    #[tokio::test]
    async fn ambiguous_input_without_working_classifier_is_rejected() {
        assert!(!is_valid_math_input("what is pi", None).await);
        let chat = ScriptedChat::new(vec![Err(ServerError::Llm("quota".into()))]);
        assert!(!is_valid_math_input("what is pi", Some(&chat)).await);
    }

    #[test]
    fn safety_patterns() {
        assert!(validate_math_content_safety("Solve x^2 = 9"));
        assert!(!validate_math_content_safety("how to HACK my grade calculator"));
        assert!(!validate_math_content_safety("a dangerous integral"));
    }

    #[tokio::test]
    async fn comprehensive_validation_reasons() {
        let unsafe_input = comprehensive_input_validation("cheat on x + 1 = 2", None).await;
        assert!(!unsafe_input.is_valid);
        assert!(!unsafe_input.is_safe);
        assert_eq!(unsafe_input.reason, "Content failed safety validation");

        let chatter = comprehensive_input_validation("good morning!", None).await;
        assert!(chatter.is_safe);
        assert!(!chatter.is_math_related);
        assert_eq!(chatter.reason, "Input is not mathematics-related");
        assert_eq!(chatter.confidence_score, 0.0);

        let ok = comprehensive_input_validation("Factor x^2 - 9", None).await;
        assert!(ok.is_valid && ok.is_safe && ok.is_math_related);
        assert_eq!(ok.confidence_score, 0.95);
        assert_eq!(ok.reason, "Input passed all validation checks");
    }
}
