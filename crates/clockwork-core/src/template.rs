//! Token substitution for remote url and body fields.
//!
//! Tokens have the shape `{{ident}}`. Recognized identifiers are a handful
//! of date formats plus `env.NAME` lookups. `{{{{` escapes a literal `{{`.

use chrono::{DateTime, Local, SecondsFormat, Utc};

use crate::error::Error;

/// Substitute every `{{ident}}` token in `input`, using `now` for date
/// tokens. Unknown identifiers and unclosed tokens fail with
/// [`Error::BadTemplate`].
pub fn render(input: &str, now: DateTime<Utc>) -> Result<String, Error> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];

        if let Some(stripped) = after.strip_prefix("{{") {
            out.push_str("{{");
            rest = stripped;
            continue;
        }

        let close = after
            .find("}}")
            .ok_or_else(|| Error::BadTemplate("unclosed token".to_string()))?;
        let ident = after[..close].trim();
        out.push_str(&resolve(ident, now)?);
        rest = &after[close + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

fn resolve(ident: &str, now: DateTime<Utc>) -> Result<String, Error> {
    if let Some(name) = ident.strip_prefix("env.") {
        return std::env::var(name)
            .map_err(|_| Error::BadTemplate(format!("environment variable {name} is not set")));
    }

    match ident {
        "date.rfc3339" => Ok(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
        "date.rfc3339_local" => Ok(now
            .with_timezone(&Local)
            .to_rfc3339_opts(SecondsFormat::Secs, false)),
        "date.ymd" => Ok(now.format("%Y-%m-%d").to_string()),
        "date.ymd_local" => Ok(now.with_timezone(&Local).format("%Y-%m-%d").to_string()),
        "date.unix" => Ok(now.timestamp().to_string()),
        _ => Err(Error::BadTemplate(format!("unknown token {ident:?}"))),
    }
}
