use anyhow::{Result, bail};

/// Maximum length of a namespace name (a DNS-1123 label).
pub const MAX_NAMESPACE_NAME_LEN: usize = 63;

/// Check that `name` can name a namespace and therefore a Subnamespace.
pub fn validate_name(name: &str) -> Result<()> {
    let Some(first) = name.chars().next() else {
        bail!("namespace name must not be empty");
    };
    if name.len() > MAX_NAMESPACE_NAME_LEN {
        bail!(
            "namespace name '{}' is {} characters long, the limit is {}",
            name,
            name.len(),
            MAX_NAMESPACE_NAME_LEN
        );
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        bail!(
            "namespace name '{}' contains '{}', only [a-z0-9-] is allowed",
            name,
            bad
        );
    }
    if first == '-' || name.ends_with('-') {
        bail!("namespace name '{}' must begin and end with [a-z0-9]", name);
    }
    Ok(())
}

/// Validate a quota resource name such as `pods`, `requests.cpu` or
/// `count/deployments.apps`.
pub fn validate_resource_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("resource name must not be empty");
    }
    if name.len() > 253 {
        bail!("resource name '{}' exceeds 253 characters", name);
    }
    if name.starts_with(['.', '/', '-']) || name.ends_with(['.', '/', '-']) {
        bail!("resource name '{}' must start and end with an alphanumeric character", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '/'))
    {
        bail!(
            "resource name '{}' must contain only letters, digits, '-', '.' and '/'",
            name
        );
    }
    Ok(())
}
