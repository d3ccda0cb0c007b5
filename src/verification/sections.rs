//! Required-section checks

use super::{PolicyCheck, ValidationInput};
use crate::config::PolicyConfig;
use crate::models::{IssueCode, ValidationIssue};
use serde_json::json;

const SOURCES_SECTION: &str = "Sources";

/// Plan-mandated sections must be present and non-empty. A missing
/// "Sources" section is an error; everything else is a warning.
pub struct RequiredSectionsCheck;

impl PolicyCheck for RequiredSectionsCheck {
    fn name(&self) -> &'static str {
        "required_sections"
    }

    fn check(&self, input: &ValidationInput<'_>, _config: &PolicyConfig, issues: &mut Vec<ValidationIssue>) {
        for required in &input.plan.sections {
            let found = input.sections.iter().find(|s| s.is_titled(required));

            match found {
                None if required.eq_ignore_ascii_case(SOURCES_SECTION) => {
                    issues.push(ValidationIssue::error(
                        IssueCode::NoSourcesSection,
                        "Response has no Sources section",
                    ));
                }
                None => {
                    issues.push(
                        ValidationIssue::warning(
                            IssueCode::MissingSection,
                            format!("Required section \"{}\" is missing", required),
                        )
                        .with_meta(json!({ "section": required })),
                    );
                }
                Some(section) if section.content.trim().is_empty() => {
                    issues.push(
                        ValidationIssue::warning(
                            IssueCode::EmptySection,
                            format!("Section \"{}\" is empty", required),
                        )
                        .with_meta(json!({ "section": required })),
                    );
                }
                Some(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Section;
    use crate::verification::tests::{fixture, input};

    #[test]
    fn test_missing_and_empty_sections() {
        let mut fx = fixture("", 0, 0);
        fx.plan.sections = vec!["Problem".into(), "Solution".into(), "Risks".into(), "Sources".into()];
        fx.sections = vec![
            Section::new("problem", "Rent is high"),
            Section::new("Solution", "   "),
        ];

        let mut issues = Vec::new();
        RequiredSectionsCheck.check(&input(&fx), &PolicyConfig::default(), &mut issues);

        let codes: Vec<IssueCode> = issues.iter().map(|i| i.code).collect();
        assert_eq!(
            codes,
            vec![IssueCode::EmptySection, IssueCode::MissingSection, IssueCode::NoSourcesSection]
        );
        assert_eq!(issues.iter().filter(|i| i.is_error()).count(), 1);
    }
}
