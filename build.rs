use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding the crate's own Rust sources.
const SOURCE_DIRS: [&str; 5] = ["crf", "shared", "src", "tests", "benches"];

const FORBIDDEN_WORDS: [&str; 14] = [
    "FIXED",
    "CORRECTED",
    "FIX",
    "FIXES",
    "NEW",
    "CHANGED",
    "CHANGES",
    "CHANGE",
    "MODIFIED",
    "MODIFIES",
    "MODIFY",
    "UPDATED",
    "UPDATES",
    "UPDATE",
];

/// One hygiene rule: which lines to look at, how to judge them, and how to
/// explain a failure.
enum Rule {
    UnderscorePrefix,
    ForbiddenWords,
    StarsInComment,
    AllCapsComment,
    AllowDeadCode,
}

impl Rule {
    fn pattern(&self) -> &'static str {
        match self {
            Self::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b",
            Self::ForbiddenWords => {
                r"(//|/\*).*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)"
            }
            Self::StarsInComment => r"(//|/\*).*\*\*",
            Self::AllCapsComment => r"(//|/\*).*",
            Self::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        }
    }

    fn applies_to_build_script(&self) -> bool {
        matches!(self, Self::UnderscorePrefix)
    }

    fn is_violation(&self, line: &str) -> bool {
        match self {
            Self::UnderscorePrefix => !is_comment(line) && !underscore_only_in_string(line),
            Self::ForbiddenWords => true,
            Self::StarsInComment => {
                !is_doc_comment(line) || FORBIDDEN_WORDS.iter().any(|w| line.contains(w))
            }
            Self::AllCapsComment => comment_text(line).is_some_and(|text| {
                let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
                !letters.is_empty() && letters.iter().all(|c| c.is_uppercase())
            }),
            Self::AllowDeadCode => true,
        }
    }

    fn explain(&self) -> &'static str {
        match self {
            Self::UnderscorePrefix => {
                "underscore-prefixed variables\n\n⚠️ Underscore-prefixed variable names are not allowed in this project.\n   Either use the variable (removing the underscore) or remove it completely.\n"
            }
            Self::ForbiddenWords => {
                "forbidden comment patterns\n\n⚠️ Changelog-style words (FIXED, CHANGED, UPDATED, NEW, ...) are STRICTLY FORBIDDEN in comments.\n   Describe what the code does, not how it got there.\n"
            }
            Self::StarsInComment => {
                "forbidden comment patterns\n\n⚠️ The '**' pattern is not allowed in regular comments (but is allowed in doc comments).\n"
            }
            Self::AllCapsComment => {
                "comments with all uppercase alphabetic characters\n\n⚠️ Comments where all alphabetic characters are uppercase are STRICTLY FORBIDDEN in this project.\n   STRONGLY CONSIDER deleting the comment completely.\n"
            }
            Self::AllowDeadCode => {
                "#[allow(dead_code)] attributes\n\n⚠️ #[allow(dead_code)] attributes are STRICTLY FORBIDDEN in this project.\n   Either use the code (removing the attribute) or remove it completely.\n"
            }
        }
    }
}

// Collects every matching line of one file that the rule judges a violation.
struct ViolationCollector<'a> {
    rule: &'a Rule,
    violations: Vec<String>,
    file_path: PathBuf,
}

impl<'a> ViolationCollector<'a> {
    fn new(rule: &'a Rule, file_path: &Path) -> Self {
        Self {
            rule,
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} violations in {}:\n",
            self.violations.len(),
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str("\n   Rule: ");
        error_msg.push_str(self.rule.explain());
        Some(error_msg)
    }
}

impl Sink for ViolationCollector<'_> {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        if self.rule.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//") || (trimmed.contains("/*") && !trimmed.contains("*/let"))
}

fn is_doc_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("///") || trimmed.starts_with("//!")
}

// True when an underscore on the line sits inside a string literal.
fn underscore_only_in_string(line: &str) -> bool {
    line.contains('"')
        && line
            .split('"')
            .enumerate()
            .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

// The text of a whole-line comment with its marker removed.
fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    for marker in ["///", "//!", "//"] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }
    let start = trimmed.find("/*")?;
    let rest = &trimmed[start + 2..];
    Some(match rest.find("*/") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    })
}

fn rust_sources() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn scan(rule: &Rule, sources: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(rule.pattern())?;
    let mut searcher = Searcher::new();

    let build_script = PathBuf::from("build.rs");
    let extra = rule.applies_to_build_script().then_some(&build_script);
    for path in sources.iter().chain(extra) {
        let mut collector = ViolationCollector::new(rule, path);
        searcher.search_path(&matcher, path, &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message() {
            return Err(error_message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    manually_check_for_unused_variables();

    let sources = rust_sources();
    let rules = [
        Rule::UnderscorePrefix,
        Rule::ForbiddenWords,
        Rule::StarsInComment,
        Rule::AllCapsComment,
        Rule::AllowDeadCode,
    ];
    for rule in &rules {
        if let Err(e) = scan(rule, &sources) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

// Compiles this script on its own with the strict lints the crate uses.
fn manually_check_for_unused_variables() {
    let status = std::process::Command::new("rustc")
        .args([
            "--edition",
            "2021",
            "-D",
            "unused_variables",
            "-D",
            "dead_code",
            "-D",
            "unused_imports",
            "--crate-type",
            "bin",
            "--error-format",
            "human",
            "--emit",
            "metadata",
            "-o",
        ])
        .arg(std::env::temp_dir().join("crimecrf-build-check"))
        .arg("build.rs")
        .output();

    match status {
        Ok(output) if !output.status.success() => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            for (needle, what) in [
                ("unused variable", "Unused variables"),
                ("is never used", "Unused functions"),
                ("unused import", "Unused imports"),
            ] {
                if stderr.contains(needle) {
                    eprintln!("\n❌ ERROR: {what} detected in build.rs!");
                    eprintln!("{stderr}");
                    eprintln!("\n⚠️ {what} are STRICTLY FORBIDDEN in this project.");
                    std::process::exit(1);
                }
            }
        }
        Ok(_) => {}
        Err(_) => {
            eprintln!(
                "cargo:warning=Could not check for unused variables/functions/imports in build.rs"
            );
        }
    }
}
