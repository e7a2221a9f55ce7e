//! Identifier rules shared by the pipeline, the HTTP API and the CLI.

const MAX_SLUG_LEN: usize = 64;
const MAX_TENANT_NAME_LEN: usize = 64;

fn validate_name(
    name: &str,
    entity: &str,
    max_len: usize,
    allow_underscore: bool,
) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{entity} cannot be empty"));
    }
    if name.len() > max_len {
        return Err(format!("{entity} cannot exceed {max_len} characters"));
    }
    let valid_char =
        |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || (allow_underscore && c == '_');
    if !name.chars().all(valid_char) {
        let allowed = if allow_underscore {
            "lowercase letters, digits, hyphens, and underscores"
        } else {
            "lowercase letters, digits, and hyphens"
        };
        return Err(format!("{entity} can only contain {allowed}"));
    }
    if name.starts_with(['-', '_']) || name.ends_with(['-', '_']) {
        return Err(format!(
            "{entity} cannot start or end with a hyphen or underscore"
        ));
    }
    Ok(())
}

/// Project slugs: lowercase alphanumerics and hyphens.
pub fn validate_slug(slug: &str) -> Result<(), String> {
    validate_name(slug, "Slug", MAX_SLUG_LEN, false)
}

pub fn validate_tenant_name(name: &str) -> Result<(), String> {
    validate_name(name, "Tenant name", MAX_TENANT_NAME_LEN, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_slugs() {
        for slug in ["app", "my-app", "app2", "a"] {
            assert!(validate_slug(slug).is_ok(), "{slug}");
        }
    }

    #[test]
    fn test_invalid_slugs() {
        for slug in ["", "My-App", "my_app", "-app", "app-", "app/x", "../app", "app.js"] {
            assert!(validate_slug(slug).is_err(), "{slug}");
        }
        assert!(validate_slug(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_tenant_names() {
        assert!(validate_tenant_name("default").is_ok());
        assert!(validate_tenant_name("site_2").is_ok());
        assert!(validate_tenant_name(".incoming").is_err());
        assert!(validate_tenant_name("_site").is_err());
    }
}
