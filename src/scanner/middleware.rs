//! Request middlewares
//!
//! Middlewares run after conditions and before sending. They may rewrite
//! the request or run a command whose output replaces the HTTP exchange.

use std::net::{IpAddr, ToSocketAddrs};

use crate::error::ScriptError;
use crate::http::Request;
use crate::scripting::{self, command, Args, Host, Value};
use crate::signature::parse_target;
use crate::template::resolve;

/// Run middleware expressions on a blocking thread
///
/// Returns the possibly rewritten request and the collected command output.
pub async fn apply(request: Request, allow_commands: bool) -> (Request, String) {
    let fallback = request.clone();
    let result = tokio::task::spawn_blocking(move || apply_blocking(request, allow_commands)).await;
    match result {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(error = %e, "Middleware task failed");
            (fallback, String::new())
        }
    }
}

fn apply_blocking(request: Request, allow_commands: bool) -> (Request, String) {
    let expressions = request.middlewares.clone();
    let mut host = MiddlewareHost {
        request,
        allow_commands,
        output: String::new(),
    };
    for expression in &expressions {
        if let Err(e) = scripting::run(expression, &mut host) {
            tracing::debug!(expression = %expression, error = %e, "Middleware failed");
        }
    }
    (host.request, host.output)
}

struct MiddlewareHost {
    request: Request,
    allow_commands: bool,
    output: String,
}

impl MiddlewareHost {
    /// Point the URL at the resolved address and keep the name in `Host`
    fn pin_to_ip(&mut self) -> Result<String, ScriptError> {
        let mut url = url::Url::parse(&self.request.url)
            .map_err(|e| ScriptError::ExecutionError(format!("Host2IP: {}", e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| ScriptError::ExecutionError("Host2IP: URL has no host".into()))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        let addresses: Vec<IpAddr> = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| ScriptError::ExecutionError(format!("Host2IP: {}: {}", host, e)))?
            .map(|a| a.ip())
            .collect();
        let ip = addresses
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addresses.first())
            .copied()
            .ok_or_else(|| ScriptError::ExecutionError(format!("Host2IP: {} did not resolve", host)))?;

        let host_header = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.clone(),
        };
        url.set_ip_host(ip)
            .map_err(|_| ScriptError::ExecutionError(format!("Host2IP: cannot use {}", ip)))?;

        self.request.url = url.to_string();
        self.request.set_header("Host", &host_header);
        tracing::debug!(host = %host, ip = %ip, "Pinned request to address");
        Ok(ip.to_string())
    }
}

impl Host for MiddlewareHost {
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, ScriptError> {
        let args = Args::new(name, args);
        match name {
            "Host2IP" => Ok(Value::Str(self.pin_to_ip()?)),
            "InvokeCmd" => {
                let vars = parse_target(&self.request.url);
                let cmd = resolve(&args.str(0)?, &vars);
                let output = command::shell(name, &cmd, self.allow_commands)?;
                self.output.push_str(&output);
                Ok(Value::Bool(true))
            }
            _ => Err(ScriptError::UnknownFunction(name.to_string())),
        }
    }
}
