use std::fmt::Write as _;
use std::path::Path;

use anyhow::bail;
use indoc::indoc;
use serde::Deserialize;
use toml::Value;

use crate::Config;

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let mut raw_config: Value = toml::from_str(&content)?;

    expand_env_placeholders(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate_has_routes(&config)?;

    Ok(config)
}

pub(crate) fn validate_has_routes(config: &Config) -> anyhow::Result<()> {
    if config.proxy.is_none() && config.agents.is_empty() {
        bail!(indoc! {r#"
            No routes configured. Tapes needs a default proxy route or at least one agent to forward anything.

            Example configuration:

              [proxy]
              provider = "ollama"
              upstream = "http://localhost:11434"

              [agents.coder]
              provider = "anthropic"
              upstream = "https://api.anthropic.com"
              token = "{{ env.ANTHROPIC_API_KEY }}"
        "#});
    }

    Ok(())
}

/// Expand `{{ env.NAME }}` placeholders in every string value, tracking the
/// path for error messages.
fn expand_env_placeholders<'a>(
    path: &mut Vec<Result<&'a str, usize>>,
    value: &'a mut Value,
) -> anyhow::Result<()> {
    match value {
        Value::String(s) => {
            if let Err(err) = expand_in_place(s) {
                let mut p = String::new();

                for segment in path {
                    match segment {
                        Ok(s) => {
                            p.push_str(s);
                            p.push('.');
                        }
                        Err(i) => write!(p, "[{i}]")?,
                    }
                }

                if p.ends_with('.') {
                    p.pop();
                }

                bail!("Failed to expand value at path '{p}': {err}");
            }
        }
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_env_placeholders(path, value)?;
                path.pop();
            }
        }
        Value::Table(table) => {
            for (key, value) in table.iter_mut() {
                path.push(Ok(key.as_str()));
                expand_env_placeholders(path, value)?;
                path.pop();
            }
        }
        _ => {}
    }

    Ok(())
}

fn expand_in_place(s: &mut String) -> anyhow::Result<()> {
    if !s.contains("{{") {
        return Ok(());
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s.as_str();

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find("}}") else {
            bail!("unterminated '{{{{' placeholder");
        };

        let inner = after[..end].trim();
        let Some(name) = inner.strip_prefix("env.") else {
            bail!("unsupported placeholder '{{{{ {inner} }}}}', expected '{{{{ env.NAME }}}}'");
        };

        match std::env::var(name.trim()) {
            Ok(value) => out.push_str(&value),
            Err(_) => bail!("environment variable '{}' is not set", name.trim()),
        }

        rest = &after[end + 2..];
    }

    out.push_str(rest);
    *s = out;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_placeholders_expand() {
        temp_env::with_var("TAPES_TEST_TOKEN", Some("sk-123"), || {
            let mut value = "Bearer {{ env.TAPES_TEST_TOKEN }}".to_string();
            expand_in_place(&mut value).unwrap();
            assert_eq!(value, "Bearer sk-123");
        });
    }

    #[test]
    fn missing_env_var_fails() {
        temp_env::with_var_unset("TAPES_TEST_MISSING", || {
            let mut value = "{{ env.TAPES_TEST_MISSING }}".to_string();
            assert!(expand_in_place(&mut value).is_err());
        });
    }

    #[test]
    fn plain_strings_pass_through() {
        let mut value = "no placeholders here".to_string();
        expand_in_place(&mut value).unwrap();
        assert_eq!(value, "no placeholders here");
    }

    #[test]
    fn missing_routes_fail_validation() {
        let config: Config = toml::from_str("").unwrap();
        assert!(validate_has_routes(&config).is_err());
    }
}
