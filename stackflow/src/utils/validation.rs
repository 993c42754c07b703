//! Naming rules for units, repositories and image tags.

use crate::errors::DefinitionError;
use regex::Regex;
use std::sync::OnceLock;

fn unit_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Stack names: a letter followed by letters, digits or hyphens.
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,127}$").expect("valid regex"))
}

fn repository_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$")
            .expect("valid regex")
    })
}

fn image_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("valid regex"))
}

/// Validates a resource unit name.
///
/// # Errors
///
/// Returns [`DefinitionError::InvalidName`] if the name is not a valid stack name.
pub fn validate_unit_name(name: &str) -> Result<(), DefinitionError> {
    if unit_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(DefinitionError::InvalidName {
            name: name.to_string(),
            reason: "must start with a letter and contain only letters, digits and hyphens \
                     (max 128)"
                .to_string(),
        })
    }
}

/// Returns true if `name` is a valid container repository name.
#[must_use]
pub fn is_valid_repository(name: &str) -> bool {
    name.len() <= 256 && repository_pattern().is_match(name)
}

/// Returns true if `tag` is a valid container image tag.
#[must_use]
pub fn is_valid_image_tag(tag: &str) -> bool {
    image_tag_pattern().is_match(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_names() {
        assert!(validate_unit_name("MensajeServiceStack").is_ok());
        assert!(validate_unit_name("a-1").is_ok());
        assert!(validate_unit_name("1stack").is_err());
        assert!(validate_unit_name("my_stack").is_err());
        assert!(validate_unit_name("").is_err());
    }

    #[test]
    fn test_repository_names() {
        assert!(is_valid_repository("mensaje-service"));
        assert!(is_valid_repository("team/mensaje-service-tests"));
        assert!(!is_valid_repository("Mensaje"));
        assert!(!is_valid_repository("-leading"));
    }

    #[test]
    fn test_image_tags() {
        assert!(is_valid_image_tag("latest"));
        assert!(is_valid_image_tag("v1.2.3-rc_1"));
        assert!(!is_valid_image_tag(".hidden"));
        assert!(!is_valid_image_tag("has space"));
    }
}
