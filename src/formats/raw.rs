//! Raw text manifest patcher using regex extraction
//!
//! The rule's extraction pattern must use named capture groups: `name`
//! (or `n`) identifies the package, `version` (or `version_alt`) captures
//! the version span. Replacement happens by splicing at the captured byte
//! offsets rather than a string-wide find/replace, so two packages pinned
//! to an identical version string never contaminate each other.
//!
//! Constraint handling: when the pattern has a separate `constraint`
//! group, only the numeric version is replaced. Otherwise, when the
//! captured text itself starts with a constraint character (one of
//! `^~<>=!`), the package's constraint is re-prepended so it is not
//! silently dropped.

use crate::config::RuleConfig;
use crate::domain::Package;
use crate::error::FormatError;
use crate::formats::FormatUpdater;
use regex::Regex;

/// Updater for raw-text manifests (requirements.txt and similar)
#[derive(Debug)]
pub struct RawUpdater;

impl FormatUpdater for RawUpdater {
    fn update_version(
        &self,
        content: &[u8],
        package: &Package,
        rule: &RuleConfig,
        target: &str,
    ) -> Result<Vec<u8>, FormatError> {
        let pattern = rule
            .extraction
            .as_ref()
            .and_then(|e| e.pattern.as_deref())
            .filter(|p| !p.is_empty())
            .ok_or(FormatError::MissingExtractionPattern)?;

        let regex = Regex::new(pattern).map_err(|e| FormatError::InvalidPattern {
            message: e.to_string(),
        })?;
        let has_constraint_group = regex
            .capture_names()
            .any(|name| name == Some("constraint"));

        let text = std::str::from_utf8(content).map_err(|e| FormatError::InvalidPattern {
            message: format!("content is not valid UTF-8: {e}"),
        })?;

        let captures = regex
            .captures_iter(text)
            .find(|caps| {
                let name = caps
                    .name("name")
                    .or_else(|| caps.name("n"))
                    .map(|m| m.as_str().trim());
                name.is_some_and(|n| n.eq_ignore_ascii_case(&package.name))
            })
            .ok_or_else(|| FormatError::PackageNotFound {
                package: package.name.clone(),
                manifest: package.source.display().to_string(),
            })?;

        let version_match = captures
            .name("version")
            .or_else(|| captures.name("version_alt"))
            .ok_or_else(|| FormatError::MissingVersionGroup {
                package: package.name.clone(),
            })?;

        let (start, end) = (version_match.start(), version_match.end());
        if start > text.len() || end > text.len() || start > end {
            return Err(FormatError::InvalidVersionSpan {
                package: package.name.clone(),
            });
        }

        let captured = version_match.as_str();
        let replacement = if has_constraint_group {
            target.to_string()
        } else if captured
            .chars()
            .next()
            .is_some_and(|c| matches!(c, '^' | '~' | '<' | '>' | '=' | '!'))
        {
            format!("{}{}", package.constraint, target)
        } else {
            target.to_string()
        };

        let mut result = String::with_capacity(text.len() + replacement.len());
        result.push_str(&text[..start]);
        result.push_str(&replacement);
        result.push_str(&text[end..]);
        Ok(result.into_bytes())
    }
}
