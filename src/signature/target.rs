//! Target variable seeding
//!
//! A `Target` is the string mapping every template in a signature is
//! resolved against. It starts from the decomposed scan URL and grows with
//! variable rows, origin responses and conclusion writes.

use std::collections::HashMap;

use crate::app::Config;

/// Variables visible to templates and expressions
pub type Target = HashMap<String, String>;

/// Decompose a URL into the initial target variables
pub fn parse_target(raw: &str) -> Target {
    let mut target = Target::new();
    let raw = raw.trim();
    if raw.is_empty() {
        return target;
    }
    target.insert("Raw".into(), raw.to_string());

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };

    let parsed = match url::Url::parse(&with_scheme) {
        Ok(u) if u.host_str().is_some() => u,
        _ => {
            target.insert("URL".into(), raw.to_string());
            return target;
        }
    };

    let scheme = parsed.scheme().to_string();
    let domain = parsed.host_str().unwrap_or_default().to_string();
    let host = match parsed.port() {
        Some(port) => format!("{}:{}", domain, port),
        None => domain.clone(),
    };
    let port = parsed
        .port_or_known_default()
        .unwrap_or(if scheme == "https" { 443 } else { 80 });
    let path = parsed.path().to_string();
    let base_url = format!("{}://{}", scheme, host);

    let extension = path
        .rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .map(|(_, ext)| format!(".{}", ext))
        .unwrap_or_default();

    target.insert("Scheme".into(), scheme);
    target.insert("Domain".into(), domain);
    target.insert("Host".into(), host);
    target.insert("Port".into(), port.to_string());
    target.insert("Query".into(), parsed.query().unwrap_or_default().to_string());
    target.insert("URL".into(), format!("{}{}", base_url, path));
    target.insert("BaseURL".into(), base_url);
    target.insert("Path".into(), path);
    target.insert("Extension".into(), extension);
    target
}

/// Environment-derived variables
pub fn more_variables(config: &Config) -> Target {
    let mut target = Target::new();

    if let Some(root) = &config.general.root_dir {
        target.insert("homePath".into(), root.display().to_string());
    }
    target.insert(
        "proxy".into(),
        config.scanner.proxy.clone().unwrap_or_default(),
    );
    target.insert("output".into(), config.output.dir.display().to_string());
    if let Some(oob) = &config.oob.callback_host {
        target.insert("oob".into(), oob.clone());
    }
    target
}
