use anyhow::{Result, bail};

use crate::options::{GpuSelection, LaunchOptions};

/// Validate a DNS-label style object name (pod, service, volume claim).
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_object_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Named servers end up inside object names, so they follow the same charset.
/// The empty string is the default server.
pub fn validate_server_name(server: &str) -> Result<()> {
    if server.is_empty() {
        return Ok(());
    }
    validate_object_name(server)
}

/// Environment variable names: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_env_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => bail!("invalid environment variable name '{}'", name),
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("invalid environment variable name '{}'", name);
    }
    Ok(())
}

/// Reject launch options no backend could honor.
pub fn validate_options(options: &LaunchOptions) -> Result<()> {
    if let Some(cpu) = options.cpu_limit
        && !(cpu.is_finite() && cpu > 0.0)
    {
        bail!("cpu_limit must be a positive number (got {})", cpu);
    }
    if let Some(raw) = options.gpus.as_deref() {
        GpuSelection::parse(raw)?;
    }
    for name in options.env.keys() {
        validate_env_name(name)?;
    }
    if let Some(image) = options.image.as_deref()
        && image.trim().is_empty()
    {
        bail!("image must not be empty when given");
    }
    Ok(())
}
