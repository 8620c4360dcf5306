//! Request building
//!
//! Turns a request template plus the merged target into concrete requests.
//! Fuzz signatures hand the resolved base request to the generator engine.

use super::{resolve, resolve_all};
use crate::fuzzer::generator;
use crate::http::{parse_raw_request, Request};
use crate::signature::{RequestTemplate, Signature, SignatureType, Target};

/// Build the concrete requests for one template and one target
///
/// Requests whose URL resolves empty are dropped.
pub fn build(
    template: &RequestTemplate,
    signature: &Signature,
    target: &Target,
    payloads: &[String],
) -> Vec<Request> {
    if signature.sign_type != SignatureType::Fuzz {
        return build_plain(template, target).into_iter().collect();
    }

    let Some(mut base) = base_request(template, target) else {
        return Vec::new();
    };
    apply_options(&mut base, template, target);

    if base.middleware_only {
        resolve_expressions(&mut base, template, target);
        return vec![base];
    }
    if template.generators.is_empty() {
        tracing::debug!(signature = %signature.id, "Fuzz request without generators produces nothing");
        return Vec::new();
    }
    // Expressions are resolved per payload by the generator
    base.detections = template.detections.clone();
    base.conclusions = template.conclusions.clone();
    base.middlewares = template.middlewares.clone();
    base.conditions = template.conditions.clone();
    generator::generate(&base, template, target, payloads)
}

/// Build one request without generator fan-out
///
/// Origins and precondition requests always go through here, whatever the
/// signature type.
pub fn build_plain(template: &RequestTemplate, target: &Target) -> Option<Request> {
    let mut base = base_request(template, target)?;
    apply_options(&mut base, template, target);
    resolve_expressions(&mut base, template, target);
    Some(base)
}

fn apply_options(base: &mut Request, template: &RequestTemplate, target: &Target) {
    base.follow_redirects = template.redirect;
    base.repeat = template.repeat.max(1);
    base.timeout = template.timeout;
    if !template.res.is_empty() {
        base.raw_response = Some(resolve(&template.res, target));
    }
}

fn resolve_expressions(base: &mut Request, template: &RequestTemplate, target: &Target) {
    base.detections = resolve_all(&template.detections, target);
    base.conclusions = resolve_all(&template.conclusions, target);
    base.middlewares = resolve_all(&template.middlewares, target);
    base.conditions = resolve_all(&template.conditions, target);
}

fn base_request(template: &RequestTemplate, target: &Target) -> Option<Request> {
    if !template.raw.is_empty() {
        let raw = resolve(&template.raw, target);
        return match parse_raw_request(&raw) {
            Ok(request) => Some(request),
            Err(e) => {
                tracing::debug!(error = %e, "Dropping unparseable raw request");
                None
            }
        };
    }

    if template.is_middleware_only() {
        let url = target.get("URL").cloned().unwrap_or_default();
        if url.is_empty() {
            return None;
        }
        return Some(Request {
            method: resolve(&template.method, target).to_uppercase(),
            url,
            middleware_only: true,
            ..Default::default()
        });
    }

    let url = resolve(&template.url, target).trim().to_string();
    if url.is_empty() {
        tracing::trace!("Dropping request with empty URL");
        return None;
    }

    let method = resolve(&template.method, target).trim().to_uppercase();
    Some(Request {
        method: if method.is_empty() { "GET".to_string() } else { method },
        url,
        headers: template
            .header_pairs()
            .into_iter()
            .map(|(k, v)| (resolve(&k, target), resolve(&v, target)))
            .collect(),
        body: resolve(&template.body, target),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn target() -> Target {
        let mut target = crate::signature::parse_target("http://example.com/app");
        target.insert("user".into(), "admin".into());
        target
    }

    fn single() -> Signature {
        Signature {
            id: "t".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_structured_request() {
        let template = RequestTemplate {
            method: "post".into(),
            url: "{{.BaseURL}}/login".into(),
            headers: vec![HashMap::from([("X-User".into(), "{{.user}}".into())])],
            body: "u={{.user}}".into(),
            detections: vec!["StringSearch('response', '{{.user}}')".into()],
            repeat: 0,
            ..Default::default()
        };

        let requests = build(&template, &single(), &target(), &[]);
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.method, "POST");
        assert_eq!(req.url, "http://example.com/login");
        assert_eq!(req.header("X-User"), Some("admin"));
        assert_eq!(req.body, "u=admin");
        assert_eq!(req.detections, vec!["StringSearch('response', 'admin')"]);
        assert_eq!(req.repeat, 1);
    }

    #[test]
    fn test_empty_url_is_dropped() {
        let template = RequestTemplate {
            url: "{{.nothing}}".into(),
            ..Default::default()
        };
        assert!(build(&template, &single(), &target(), &[]).is_empty());
    }

    #[test]
    fn test_raw_override_wins() {
        let template = RequestTemplate {
            url: "http://ignored.test/".into(),
            raw: "PUT /x HTTP/1.1\nHost: {{.Host}}\n\nbody".into(),
            detections: vec!["StatusCode() == 201".into()],
            ..Default::default()
        };
        let requests = build(&template, &single(), &target(), &[]);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "PUT");
        assert_eq!(requests[0].url, "https://example.com/x");
        assert_eq!(requests[0].detections, vec!["StatusCode() == 201"]);
    }

    #[test]
    fn test_middleware_only() {
        let template = RequestTemplate {
            middlewares: vec!["InvokeCmd('echo {{.Host}}')".into()],
            ..Default::default()
        };
        let requests = build(&template, &single(), &target(), &[]);
        assert_eq!(requests.len(), 1);
        assert!(requests[0].middleware_only);
        assert_eq!(requests[0].method, "");
        assert_eq!(requests[0].url, "http://example.com/app");
        assert_eq!(requests[0].middlewares, vec!["InvokeCmd('echo example.com')"]);
    }

    #[test]
    fn test_canned_response() {
        let template = RequestTemplate {
            url: "{{.URL}}".into(),
            res: "HTTP/1.1 200 OK\n\n{{.user}}".into(),
            ..Default::default()
        };
        let requests = build(&template, &single(), &target(), &[]);
        assert_eq!(requests[0].raw_response.as_deref(), Some("HTTP/1.1 200 OK\n\nadmin"));
    }

    #[test]
    fn test_fuzz_delegates_to_generators() {
        let sign = Signature {
            id: "f".into(),
            sign_type: SignatureType::Fuzz,
            ..Default::default()
        };
        let template = RequestTemplate {
            url: "http://x/?a=1&b=2".into(),
            generators: vec!["Query('{{.payload}}')".into()],
            detections: vec!["StringSearch('response', '{{.payload}}')".into()],
            ..Default::default()
        };
        let requests = build(&template, &sign, &Target::new(), &["PWNED".to_string()]);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].detections, vec!["StringSearch('response', 'PWNED')"]);
        assert_eq!(requests[0].payload.as_deref(), Some("PWNED"));
    }

    #[test]
    fn test_plain_build_ignores_fuzz_type() {
        let template = RequestTemplate {
            url: "{{.BaseURL}}/baseline".into(),
            detections: vec!["StringSearch('response', '{{.user}}')".into()],
            ..Default::default()
        };
        let request = build_plain(&template, &target()).unwrap();
        assert_eq!(request.url, "http://example.com/baseline");
        assert_eq!(request.detections, vec!["StringSearch('response', 'admin')"]);
        assert!(request.payload.is_none());

        let fuzz = Signature {
            id: "f".into(),
            sign_type: SignatureType::Fuzz,
            ..Default::default()
        };
        assert!(build(&template, &fuzz, &target(), &["x".to_string()]).is_empty());
    }
}
