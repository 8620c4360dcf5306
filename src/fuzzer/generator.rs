//! Generator engine
//!
//! Fuzz requests carry generator expressions such as `Query("{{.payload}}")`
//! or `Path("{{.payload}}", "*")`. Every payload is run through every
//! generator, and each call yields one request per injection point.

use serde_json::Value as Json;

use super::encoding::Encoding;
use crate::error::ScriptError;
use crate::http::Request;
use crate::scripting::{self, Args, Host, Value};
use crate::signature::{RequestTemplate, Target};
use crate::template::{resolve, resolve_all};

const DEFAULT_METHODS: &[&str] = &["GET", "POST", "PUT", "HEAD", "PATCH"];
const MAX_JSON_DEPTH: usize = 3;

/// Expand a base request through the template's generators
pub fn generate(
    base: &Request,
    template: &RequestTemplate,
    target: &Target,
    payloads: &[String],
) -> Vec<Request> {
    let encoding = Encoding::parse(&template.encoding);
    let mut requests = Vec::new();

    for payload in payloads {
        let payload = resolve(payload, target);
        for generator in &template.generators {
            let mut host = GeneratorHost {
                base,
                target,
                payload: &payload,
                encoding,
                produced: Vec::new(),
            };
            match scripting::run(generator, &mut host) {
                Ok(_) => requests.extend(host.produced),
                Err(e) => tracing::debug!(generator = %generator, error = %e, "Generator failed"),
            }
        }
    }
    requests
}

/// A generated request and the value it replaced
struct Injection {
    request: Request,
    original: String,
}

struct GeneratorHost<'a> {
    base: &'a Request,
    target: &'a Target,
    payload: &'a str,
    encoding: Encoding,
    produced: Vec<Request>,
}

impl GeneratorHost<'_> {
    fn vars(&self, original: &str) -> Target {
        let mut vars = self.target.clone();
        vars.insert("payload".into(), self.payload.to_string());
        vars.insert("original".into(), original.to_string());
        vars
    }

    /// Resolve the injection template for a given original value
    fn value(&self, template: &str, original: &str, encode: bool) -> String {
        let value = resolve(template, &self.vars(original));
        if encode {
            self.encoding.encode(&value)
        } else {
            value
        }
    }

    /// Resolve per-payload expressions and record the request
    fn emit(&mut self, injection: Injection) {
        let vars = self.vars(&injection.original);
        let mut request = injection.request.fork();
        request.payload = Some(self.payload.to_string());
        request.detections = resolve_all(&request.detections, &vars);
        request.conclusions = resolve_all(&request.conclusions, &vars);
        request.middlewares = resolve_all(&request.middlewares, &vars);
        request.conditions = resolve_all(&request.conditions, &vars);
        self.produced.push(request);
    }

    fn parse_url(&self) -> Result<url::Url, ScriptError> {
        url::Url::parse(&self.base.url)
            .map_err(|e| ScriptError::ExecutionError(format!("cannot inject into '{}': {}", self.base.url, e)))
    }

    fn query(&self, template: &str, name: Option<String>) -> Result<Vec<Injection>, ScriptError> {
        let url = self.parse_url()?;
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        let positions: Vec<usize> = match &name {
            Some(name) => match pairs.iter().position(|(k, _)| k == name) {
                Some(index) => vec![index],
                None => vec![pairs.len()],
            },
            None => (0..pairs.len()).collect(),
        };

        Ok(positions
            .into_iter()
            .map(|index| {
                let mut pairs = pairs.clone();
                let original = pairs.get(index).map(|(_, v)| v.clone()).unwrap_or_default();
                // The query serializer escapes the value itself
                let value = self.value(template, &original, false);
                match pairs.get_mut(index) {
                    Some(pair) => pair.1 = value,
                    None => pairs.push((name.clone().unwrap_or_default(), value)),
                }

                let mut url = url.clone();
                url.query_pairs_mut().clear().extend_pairs(pairs.iter());
                let mut request = self.base.clone();
                request.url = url.to_string();
                Injection { request, original }
            })
            .collect())
    }

    fn body(&self, template: &str, name: Option<String>) -> Result<Vec<Injection>, ScriptError> {
        let body = self.base.body.trim();
        if body.starts_with('{') || body.starts_with('[') {
            if let Ok(json) = serde_json::from_str::<Json>(body) {
                return Ok(self.json_body(template, json, name));
            }
        }
        Ok(self.form_body(template, name))
    }

    fn json_body(&self, template: &str, json: Json, name: Option<String>) -> Vec<Injection> {
        let paths = match name {
            Some(name) => vec![name.split('.').map(PathSegment::parse).collect()],
            None => {
                let mut leaves = Vec::new();
                collect_leaves(&json, &mut Vec::new(), &mut leaves);
                leaves
            }
        };

        paths
            .into_iter()
            .filter_map(|path| {
                let mut json = json.clone();
                let slot = slot_mut(&mut json, &path)?;
                let original = match &*slot {
                    Json::String(s) => s.clone(),
                    Json::Null => String::new(),
                    other => other.to_string(),
                };
                *slot = Json::String(self.value(template, &original, true));

                let mut request = self.base.clone();
                request.body = json.to_string();
                Some(Injection { request, original })
            })
            .collect()
    }

    fn form_body(&self, template: &str, name: Option<String>) -> Vec<Injection> {
        let params: Vec<(String, Option<String>)> = self
            .base
            .body
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((k, v)) => (k.to_string(), Some(v.to_string())),
                None => (p.to_string(), None),
            })
            .collect();

        let positions: Vec<usize> = match &name {
            Some(name) => match params.iter().position(|(k, _)| k == name) {
                Some(index) => vec![index],
                None => vec![params.len()],
            },
            None => (0..params.len()).collect(),
        };

        positions
            .into_iter()
            .map(|index| {
                let mut params = params.clone();
                let original = params
                    .get(index)
                    .and_then(|(_, v)| v.clone())
                    .unwrap_or_default();
                let value = self.value(template, &original, true);
                match params.get_mut(index) {
                    Some(param) => param.1 = Some(value),
                    None => params.push((name.clone().unwrap_or_default(), Some(value))),
                }

                let mut request = self.base.clone();
                request.body = params
                    .iter()
                    .map(|(k, v)| match v {
                        Some(v) => format!("{}={}", k, v),
                        None => k.clone(),
                    })
                    .collect::<Vec<_>>()
                    .join("&");
                Injection { request, original }
            })
            .collect()
    }

    fn path(&self, template: &str, position: &str) -> Result<Vec<Injection>, ScriptError> {
        let url = self.parse_url()?;
        let segments: Vec<String> = url.path().split('/').map(|s| s.to_string()).collect();
        let last = segments.len().saturating_sub(1).max(1);

        // Joined as text: `Url::set_path` would collapse `..` segments
        let prefix = &url[..url::Position::BeforePath];
        let suffix = &url[url::Position::AfterPath..];
        let rebuild = |segments: &[String], original: String| {
            let mut request = self.base.clone();
            request.url = format!("{}{}{}", prefix, segments.join("/"), suffix);
            Injection { request, original }
        };

        let position = position.trim();
        if position == "ext" {
            let Some((stem, ext)) = segments.get(last).and_then(|s| s.rsplit_once('.')) else {
                return Ok(Vec::new());
            };
            let mut segments = segments.clone();
            let original = ext.to_string();
            segments[last] = format!("{}.{}", stem, self.value(template, &original, true));
            return Ok(vec![rebuild(&segments, original)]);
        }

        let indexes: Vec<usize> = match position {
            "" | "last" => vec![last],
            "*" => (1..segments.len()).collect(),
            list => list
                .split(',')
                .filter_map(|i| i.trim().parse::<usize>().ok())
                .filter(|i| *i >= 1)
                .collect(),
        };

        Ok(indexes
            .into_iter()
            .filter(|i| *i < segments.len().max(2))
            .map(|i| {
                let mut segments = segments.clone();
                if segments.len() <= i {
                    segments.resize(i + 1, String::new());
                }
                let original = segments[i].clone();
                segments[i] = self.value(template, &original, true);
                rebuild(&segments, original)
            })
            .collect())
    }

    fn header(&self, template: &str, name: &str) -> Injection {
        let original = self.base.header(name).unwrap_or_default().to_string();
        let mut request = self.base.clone();
        request.set_header(name, &self.value(template, &original, true));
        Injection { request, original }
    }

    fn cookie(&self, template: &str, name: Option<String>) -> Injection {
        let existing = self.base.header("Cookie").map(|c| c.to_string());
        let mut request = self.base.clone();

        let (cookie, original) = match (existing, name) {
            (None, None) => (self.value(template, "", true), String::new()),
            (Some(all), None) => (self.value(template, &all, true), all),
            (None, Some(name)) => (format!("{}={}", name, self.value(template, "", true)), String::new()),
            (Some(all), Some(name)) => {
                let mut cookies: Vec<(String, String)> = all
                    .split(';')
                    .map(|c| c.trim())
                    .filter(|c| !c.is_empty())
                    .map(|c| match c.split_once('=') {
                        Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
                        None => (c.to_string(), String::new()),
                    })
                    .collect();
                let original = cookies
                    .iter()
                    .find(|(k, _)| *k == name)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                let value = self.value(template, &original, true);
                match cookies.iter_mut().find(|(k, _)| *k == name) {
                    Some(cookie) => cookie.1 = value,
                    None => cookies.push((name, value)),
                }
                let joined = cookies
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join("; ");
                (joined, original)
            }
        };

        request.set_header("Cookie", &cookie);
        Injection { request, original }
    }

    fn methods(&self, methods: Vec<String>) -> Vec<Injection> {
        let methods: Vec<String> = if methods.is_empty() {
            DEFAULT_METHODS.iter().map(|m| m.to_string()).collect()
        } else {
            methods.into_iter().map(|m| m.to_uppercase()).collect()
        };

        let sources: Vec<Request> = if self.produced.is_empty() {
            vec![self.base.clone()]
        } else {
            self.produced.clone()
        };

        sources
            .iter()
            .flat_map(|source| {
                methods.iter().map(move |method| {
                    let mut request = source.clone();
                    let original = std::mem::replace(&mut request.method, method.clone());
                    Injection { request, original }
                })
            })
            .collect()
    }
}

impl Host for GeneratorHost<'_> {
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, ScriptError> {
        let args = Args::new(name, args);
        let injections = match name {
            "Query" => self.query(&args.str(0)?, args.opt_str(1))?,
            "Body" => self.body(&args.str(0)?, args.opt_str(1))?,
            "Path" => self.path(&args.str(0)?, &args.opt_str(1).unwrap_or_default())?,
            "Header" => vec![self.header(&args.str(0)?, &args.str(1)?)],
            "Cookie" => vec![self.cookie(&args.str(0)?, args.opt_str(1))],
            "Method" => self.methods(args.strings()),
            _ => return Err(ScriptError::UnknownFunction(name.to_string())),
        };

        let count = injections.len();
        for injection in injections {
            self.emit(injection);
        }
        Ok(Value::Number(count as f64))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    fn parse(raw: &str) -> Self {
        match raw.parse::<usize>() {
            Ok(index) => PathSegment::Index(index),
            Err(_) => PathSegment::Key(raw.to_string()),
        }
    }
}

fn collect_leaves(json: &Json, path: &mut Vec<PathSegment>, leaves: &mut Vec<Vec<PathSegment>>) {
    match json {
        Json::Object(map) if path.len() < MAX_JSON_DEPTH => {
            for (key, value) in map {
                path.push(PathSegment::Key(key.clone()));
                collect_leaves(value, path, leaves);
                path.pop();
            }
        }
        Json::Array(items) if path.len() < MAX_JSON_DEPTH => {
            for (index, value) in items.iter().enumerate() {
                path.push(PathSegment::Index(index));
                collect_leaves(value, path, leaves);
                path.pop();
            }
        }
        Json::Object(_) | Json::Array(_) => {}
        _ if !path.is_empty() => leaves.push(path.clone()),
        _ => {}
    }
}

/// Walk to a slot, creating missing object keys along the way
fn slot_mut<'a>(json: &'a mut Json, path: &[PathSegment]) -> Option<&'a mut Json> {
    let mut current = json;
    for segment in path {
        current = match (segment, current) {
            (PathSegment::Index(i), Json::Array(items)) => items.get_mut(*i)?,
            (PathSegment::Index(i), Json::Object(map)) => {
                map.entry(i.to_string()).or_insert(Json::Null)
            }
            (PathSegment::Key(key), Json::Object(map)) => {
                map.entry(key.clone()).or_insert(Json::Null)
            }
            _ => return None,
        };
    }
    Some(current)
}
