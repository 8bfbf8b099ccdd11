use regex::{Captures, Regex};
use serde::Serialize;
use std::sync::LazyLock;
use tracing::warn;

pub const EMPTY_OUTPUT_MESSAGE: &str =
    "❌ Sorry, I couldn't generate a proper explanation for this math question.";
pub const UNSAFE_OUTPUT_MESSAGE: &str =
    "❌ Response failed safety validation. Please try asking your question differently.";

static TRIPLE_BREAK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n\s*\n").unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static LIST_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(\d+)[ \t]*\.[ \t]*([^\W\d])").unwrap());
static COLON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z])[ \t]*:[ \t]*([A-Z])").unwrap());
static DEBUG_LINE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)DEBUG:.*(\n|$)",
        r"(?i)Retrieved Answer:.*(\n|$)",
        r"(?i)Match score:.*(\n|$)",
        r"(?i)Explanation:[ \t]*\n",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static UNSAFE_OUTPUT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(hack|cheat|plagiarize)",
        r"(inappropriate|explicit|adult)",
        r"(illegal|fraud|scam)",
        r"(violent|harmful|dangerous)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static STEP_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(step|Step|STEP)").unwrap());
static FINAL_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(final answer|answer is|answer:)").unwrap());
static ANSWER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)([a-z]\s*=\s*[^,\n]+)",
        r"(?i)(therefore[^.]*\.)",
        r"(?i)(the result is[^.]*\.)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static STEP_LINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^(Step \d+)").unwrap());
static NUMBERED_LINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^(\d+\.)").unwrap());
static ASSIGNMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z]\s*=\s*[^,\n\s*]+").unwrap());
static BLANK_LINES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

static VAR_ASSIGNMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z]\s*=\s*[a-z]").unwrap());
static STRUCTURE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(step|Step|\d+\.)").unwrap());

const CONCLUSION_KEYWORDS: &[&str] = &["therefore", "so the answer", "final answer", "result is"];
const ACCURACY_SYMBOLS: &[char] = &['=', '+', '-', '*', '/', '^', '√', '²', '³'];

/// Clean, safety-check and format a model response for a student.
pub fn simplify_output(output: &str) -> String {
    if output.trim().is_empty() {
        return EMPTY_OUTPUT_MESSAGE.to_string();
    }

    let cleaned = clean_response_text(output);
    if !validate_output_safety(&cleaned) {
        return UNSAFE_OUTPUT_MESSAGE.to_string();
    }

    add_student_formatting(&ensure_educational_format(&cleaned))
}

pub fn clean_response_text(text: &str) -> String {
    let text = TRIPLE_BREAK_RE.replace_all(text, "\n\n");
    let text = SPACES_RE.replace_all(&text, " ");
    let text = text.trim();

    let text = LIST_MARKER_RE.replace_all(text, "${1}. ${2}");
    let mut text = COLON_RE.replace_all(&text, "${1}: ${2}").into_owned();

    for re in DEBUG_LINE_RES.iter() {
        text = re.replace_all(&text, "").into_owned();
    }

    text.trim().to_string()
}

pub fn validate_output_safety(text: &str) -> bool {
    let lower = text.to_lowercase();
    match UNSAFE_OUTPUT_PATTERNS.iter().find(|re| re.is_match(&lower)) {
        Some(pattern) => {
            warn!("⚠️ Output safety guardrail: {}", pattern.as_str());
            false
        }
        None => true,
    }
}

pub fn ensure_educational_format(text: &str) -> String {
    let mut text = text.to_string();

    if !STEP_WORD_RE.is_match(&text) && !text.contains("1.") && !text.contains("2.") {
        text = format!("Let me solve this step by step:\n\n{text}");
    }

    if !FINAL_MARKER_RE.is_match(&text) {
        let answer = ANSWER_PATTERNS
            .iter()
            .find_map(|re| re.captures(&text))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string());

        if let Some(answer) = answer {
            if !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("\n🎯 **Final Answer:** {answer}"));
        }
    }

    text
}

pub fn add_student_formatting(text: &str) -> String {
    let text = STEP_LINE_RE.replace_all(text, "📝 ${1}");
    let text = NUMBERED_LINE_RE.replace_all(&text, "📝 ${1}");

    let source = text.as_ref();
    let mut text = ASSIGNMENT_RE
        .replace_all(source, |caps: &Captures| {
            let m = &caps[0];
            let start = caps.get(0).map_or(0, |g| g.start());
            if source[..start].ends_with("**") {
                m.to_string()
            } else {
                format!("**{m}**")
            }
        })
        .into_owned();

    if text.chars().count() > 500 && !text.contains("**Final Answer:**") && !text.contains('🎯') {
        let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        if let Some(line) = lines.iter_mut().find(|line| {
            let lower = line.to_lowercase();
            CONCLUSION_KEYWORDS.iter().any(|k| lower.contains(k))
        }) {
            *line = format!("🎯 {line}");
        }
        text = lines.join("\n");
    }

    BLANK_LINES_RE
        .replace_all(&text, "\n\n")
        .trim()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyReport {
    pub is_mathematically_sound: bool,
    pub confidence: f32,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Heuristic notation check; it never proves a result wrong.
pub fn validate_mathematical_accuracy(response: &str) -> AccuracyReport {
    let mut report = AccuracyReport {
        is_mathematically_sound: true,
        confidence: 0.8,
        warnings: Vec::new(),
        suggestions: Vec::new(),
    };

    if VAR_ASSIGNMENT_RE.is_match(response) {
        report.confidence += 0.1;
    }

    if STRUCTURE_RE.is_match(response) {
        report.confidence += 0.1;
        report
            .suggestions
            .push("Good step-by-step structure detected".to_string());
    } else {
        report
            .warnings
            .push("Consider adding more step-by-step explanation".to_string());
    }

    if !response.contains(ACCURACY_SYMBOLS) {
        report.warnings.push(
            "No mathematical symbols detected - may need more detailed calculations".to_string(),
        );
        report.confidence -= 0.2;
    }

    report
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoMatch,
    InvalidInput,
    LowConfidence,
    NoWebResults,
    Unexpected,
}

pub fn format_error_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NoMatch => {
            r#"🔍 **Question Not Found**

I couldn't find this specific question in my math knowledge base.

💡 **Try asking about:**
- Solving equations (like x² + 5x + 6 = 0)
- Derivatives and integrals
- Algebraic expressions
- Geometry problems
- Basic arithmetic operations

📚 **Example questions I can help with:**
- "What is the derivative of x² + 3x?"
- "Solve the equation 2x + 5 = 11"
- "How do I factor x² - 9?""#
        }
        ErrorKind::InvalidInput => {
            r#"❌ **Invalid Question**

Please ask a mathematics-related question only.

✅ **Valid examples:**
- Solve x + 5 = 10
- What is the derivative of x²?
- How do I calculate the area of a circle?
- Factor x² - 4x + 3

❌ **Not valid:**
- General conversation
- Non-math subjects
- Personal questions"#
        }
        ErrorKind::LowConfidence => {
            r#"🤔 **Similar Question Found (Low Confidence)**

I found a somewhat related question, but I'm not confident it matches what you're asking.

💭 **Suggestion:** Try rephrasing your question or asking about a more specific math topic.

📚 **My knowledge base covers:**
- Algebra and equations
- Calculus (derivatives, integrals)
- Geometry and trigonometry
- Basic arithmetic operations"#
        }
        ErrorKind::NoWebResults | ErrorKind::Unexpected => {
            "❌ An unexpected error occurred. Please try again."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_unsafe_outputs_are_replaced() {
        assert_eq!(simplify_output("  \n "), EMPTY_OUTPUT_MESSAGE);
        assert_eq!(
            simplify_output("You could just cheat: x = 2"),
            UNSAFE_OUTPUT_MESSAGE
        );
    }

    #[test]
    fn cleaning_removes_debug_lines_and_whitespace() {
        let raw = "DEBUG: score 0.9\nRetrieved Answer: 4\nThe   sum\t is 4.\n\n\n\n1 .  Add";
        let cleaned = clean_response_text(raw);
        assert_eq!(cleaned, "The sum is 4.\n\n1. Add");
    }

    #[test]
    fn cleaning_keeps_decimals_intact() {
        assert_eq!(clean_response_text("pi is about 3.14 here"), "pi is about 3.14 here");
        assert_eq!(clean_response_text("note:Remember"), "note: Remember");
    }

    #[test]
    fn cleaning_keeps_line_start_decimals_intact() {
        assert_eq!(
            clean_response_text("The answer:\n3.14 is approximately pi"),
            "The answer:\n3.14 is approximately pi"
        );
        assert_eq!(clean_response_text("2.Divide by 2"), "2. Divide by 2");
    }

    #[test]
    fn educational_format_adds_intro_and_final_answer() {
        let out = ensure_educational_format("Subtract 3 from both sides, x = 4");
        assert!(out.starts_with("Let me solve this step by step:\n\n"));
        assert!(out.ends_with("\n🎯 **Final Answer:** x = 4"));
    }

    #[test]
    fn educational_format_respects_existing_structure() {
        let text = "Step 1: add.\nThe final answer is 9";
        assert_eq!(ensure_educational_format(text), text);

        let therefore = ensure_educational_format("1. Expand.\nTherefore the area is 25π.");
        assert!(therefore.ends_with("🎯 **Final Answer:** Therefore the area is 25π."));
    }

    #[test]
    fn student_formatting_marks_steps_and_bolds_assignments() {
        let out = add_student_formatting("Step 1 isolate\n2. so x = 5, done");
        assert_eq!(out, "📝 Step 1 isolate\n📝 2. so **x = 5**, done");
    }

    #[test]
    fn simplify_is_stable_when_applied_twice() {
        let once = simplify_output("Subtract 3.\nSo x = 4");
        let twice = simplify_output(&once);
        assert_eq!(once, twice);
        assert!(once.contains("**x = 4**"));
        assert!(!once.contains("****"));
    }

    #[test]
    fn long_text_gets_conclusion_marker() {
        let filler = "We keep working on the expression carefully. ".repeat(12);
        let text = format!("{filler}\nTherefore it converges");
        let out = add_student_formatting(&text);
        assert!(out.contains("\n🎯 Therefore it converges"));
    }

    #[test]
    fn accuracy_report_scores() {
        let good = validate_mathematical_accuracy("Step 1: let y = x + 1");
        assert!((good.confidence - 1.0).abs() < 1e-6);
        assert_eq!(good.suggestions, vec!["Good step-by-step structure detected"]);
        assert!(good.warnings.is_empty());

        let bare = validate_mathematical_accuracy("It is four");
        assert!((bare.confidence - 0.6).abs() < 1e-6);
        assert_eq!(bare.warnings.len(), 2);
        assert!(bare.is_mathematically_sound);
    }

    #[test]
    fn error_messages() {
        assert!(format_error_message(ErrorKind::NoMatch).contains("Question Not Found"));
        assert!(format_error_message(ErrorKind::InvalidInput).contains("Invalid Question"));
        assert_eq!(
            format_error_message(ErrorKind::NoWebResults),
            "❌ An unexpected error occurred. Please try again."
        );
    }
}
