//! Execute-request classification.
//!
//! One explicit grammar over the magic-command surface: an optional leading
//! `%<name> <arg>?%` marker, or one of the legacy bare prefixes (`%python`,
//! `%storejson <ident>`). Classification is pure and never touches the
//! network.

use thiserror::Error;

/// The classified intent of one execute request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Forward the payload to the remote query endpoint unchanged.
    PassThrough { payload: String },
    /// Run the payload on the embedded interpreter.
    SubInterpreter { payload: String },
    /// Forward the payload, then bind the tabular result to `target`.
    Export { payload: String, target: String },
}

/// Classification error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("Export directive requires a target variable name")]
    MissingExportTarget,
}

const INTERP_MARKER: &str = "python";
const EXPORT_MARKER: &str = "export";
const STORE_MARKER: &str = "storejson";

/// Classify raw cell text into exactly one directive.
///
/// # Errors
/// Returns `MissingExportTarget` when an export form names no identifier.
pub fn classify(raw: &str) -> Result<Directive, ClassifyError> {
    let text = raw.trim();

    if let Some((name, arg, rest)) = parse_marker(text) {
        match name {
            INTERP_MARKER => {
                return Ok(Directive::SubInterpreter {
                    payload: rest.trim().to_string(),
                });
            }
            EXPORT_MARKER | STORE_MARKER => {
                let target = arg
                    .filter(|a| is_identifier(a))
                    .ok_or(ClassifyError::MissingExportTarget)?;
                return Ok(Directive::Export {
                    payload: rest.trim().to_string(),
                    target: target.to_string(),
                });
            }
            _ => {} // unknown marker: treat the whole text as a plain query
        }
    }

    if let Some(rest) = strip_legacy_prefix(text, INTERP_MARKER) {
        return Ok(Directive::SubInterpreter {
            payload: rest.trim().to_string(),
        });
    }

    if let Some(rest) = strip_legacy_prefix(text, STORE_MARKER) {
        let mut parts = rest.trim().splitn(2, char::is_whitespace);
        let target = parts
            .next()
            .filter(|t| is_identifier(t))
            .ok_or(ClassifyError::MissingExportTarget)?;
        let payload = parts.next().unwrap_or_default();
        return Ok(Directive::Export {
            payload: payload.trim().to_string(),
            target: target.to_string(),
        });
    }

    Ok(Directive::PassThrough {
        payload: text.to_string(),
    })
}

/// Parse a `%<name> <arg>?%rest` marker, returning (name, arg, rest).
fn parse_marker(text: &str) -> Option<(&str, Option<&str>, &str)> {
    let body = text.strip_prefix('%')?;
    let close = body.find('%')?;
    let inner = &body[..close];
    let rest = &body[close + 1..];

    // Markers fit on one line; a '%' past a newline belongs to the payload.
    if inner.contains('\n') {
        return None;
    }

    let mut tokens = inner.split_whitespace();
    let name = tokens.next()?;
    let arg = tokens.next();
    if tokens.next().is_some() {
        return None;
    }
    Some((name, arg, rest))
}

/// Strip a legacy bare `%<name>` prefix followed by whitespace or
/// end-of-input.
fn strip_legacy_prefix<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let rest = text.strip_prefix('%')?.strip_prefix(name)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest)
    } else {
        None
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_pass_through() {
        let directive = classify("  select * from users  ").unwrap();
        assert_eq!(
            directive,
            Directive::PassThrough {
                payload: "select * from users".to_string()
            }
        );
    }

    #[test]
    fn test_interpreter_marker() {
        let directive = classify("%python% print(1)").unwrap();
        assert_eq!(
            directive,
            Directive::SubInterpreter {
                payload: "print(1)".to_string()
            }
        );
    }

    #[test]
    fn test_legacy_interpreter_prefix() {
        let directive = classify("%python\nprint(1)").unwrap();
        assert_eq!(
            directive,
            Directive::SubInterpreter {
                payload: "print(1)".to_string()
            }
        );
    }

    #[test]
    fn test_export_marker_with_target() {
        let directive = classify("%export myvar%select 1").unwrap();
        assert_eq!(
            directive,
            Directive::Export {
                payload: "select 1".to_string(),
                target: "myvar".to_string()
            }
        );
    }

    #[test]
    fn test_export_marker_without_target_is_an_error() {
        let err = classify("%export%select 1").unwrap_err();
        assert_eq!(err, ClassifyError::MissingExportTarget);
    }

    #[test]
    fn test_export_marker_with_invalid_target_is_an_error() {
        let err = classify("%export 1abc%select 1").unwrap_err();
        assert_eq!(err, ClassifyError::MissingExportTarget);
    }

    #[test]
    fn test_legacy_storejson_prefix() {
        let directive = classify("%storejson df select 1").unwrap();
        assert_eq!(
            directive,
            Directive::Export {
                payload: "select 1".to_string(),
                target: "df".to_string()
            }
        );
    }

    #[test]
    fn test_legacy_storejson_without_target_is_an_error() {
        let err = classify("%storejson").unwrap_err();
        assert_eq!(err, ClassifyError::MissingExportTarget);
    }

    #[test]
    fn test_unknown_marker_falls_back_to_pass_through() {
        let directive = classify("%magic%select 1").unwrap();
        assert_eq!(
            directive,
            Directive::PassThrough {
                payload: "%magic%select 1".to_string()
            }
        );
    }

    #[test]
    fn test_modulo_in_query_is_not_a_marker() {
        let directive = classify("select 10 % 3").unwrap();
        assert!(matches!(directive, Directive::PassThrough { .. }));
    }

    #[test]
    fn test_marker_does_not_span_lines() {
        let directive = classify("%select\nfoo % bar").unwrap();
        assert_eq!(
            directive,
            Directive::PassThrough {
                payload: "%select\nfoo % bar".to_string()
            }
        );
    }
}
