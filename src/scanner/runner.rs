//! One signature against one URL
//!
//! Filtering checksums and origins go first, then the precondition group,
//! then the main requests. Sequential runs build each request right before
//! it is sent so it sees the writes of the requests before it.

use std::sync::Arc;

use super::dispatcher::{Dispatcher, RunContext};
use super::filter::ChecksumFilter;
use super::record::{Exchange, Origins, RecordLog, RecordState};
use crate::fuzzer::load_payloads;
use crate::http::Request;
use crate::signature::{
    more_variables, parse_target, MatchPolicy, RequestTemplate, Signature, SignatureType, Target,
};
use crate::template::{build, build_plain, expand, VariableRow};

/// Per-run settings taken from configuration
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Worker count when a signature does not set one
    pub threads: usize,
    /// Allow command built-ins while expanding variables
    pub allow_commands: bool,
    /// Variables every target starts with
    pub globals: Target,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            threads: 10,
            allow_commands: false,
            globals: Target::new(),
        }
    }
}

impl RunnerOptions {
    pub fn from_config(config: &crate::app::Config) -> Self {
        Self {
            threads: config.scanner.threads,
            allow_commands: config.scripting.allow_external_commands,
            globals: more_variables(config),
        }
    }
}

/// How templates turn into requests
#[derive(Clone, Copy)]
enum Expansion<'a> {
    /// One request per template, whatever the signature type
    Plain,
    /// Generator fan-out for fuzz signatures
    Payloads(&'a [String]),
}

/// Runs signatures against targets
#[derive(Clone)]
pub struct Runner {
    dispatcher: Dispatcher,
    filter: Option<ChecksumFilter>,
    options: RunnerOptions,
}

impl Runner {
    pub fn new(dispatcher: Dispatcher, options: RunnerOptions) -> Self {
        Self {
            dispatcher,
            filter: None,
            options,
        }
    }

    /// Collect "not found" checksums before each signature
    pub fn with_filter(mut self, filter: ChecksumFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Run every stage of a signature, pushing records to `log` as they finish
    pub async fn run(&self, url: &str, signature: Arc<Signature>, log: &RecordLog) {
        let mut target = parse_target(url);
        target.extend(self.options.globals.clone());
        let mut ctx = RunContext::new(signature.clone(), target);

        if let Some(filter) = &self.filter {
            let checksums = filter.checksums(url, &signature).await;
            if !checksums.is_empty() {
                tracing::debug!(signature = %signature.id, url, count = checksums.len(), "Filtering checksums");
                ctx.checksums = Arc::new(checksums);
            }
        }

        let origins = self.send_origins(&ctx, log).await;
        ctx.origins = Arc::new(origins);

        let seed = ctx.target.read().clone();
        let mut rows = expand(&signature, &seed, self.options.allow_commands);
        if rows.is_empty() {
            rows.push(VariableRow::new());
        }
        let payloads = if signature.sign_type == SignatureType::Fuzz {
            load_payloads(&signature, &seed)
        } else {
            Vec::new()
        };

        if !signature.crequests.is_empty() {
            let states = self
                .run_in_order(&signature.crequests, &rows, Expansion::Plain, &ctx, log)
                .await;
            if !precondition_met(signature.match_policy, &states) {
                tracing::debug!(signature = %signature.id, url, "Precondition group not satisfied");
                return;
            }
            tracing::debug!(signature = %signature.id, url, "Precondition group passed");
        }

        let expansion = Expansion::Payloads(&payloads);
        if self.is_sequential(&signature) {
            self.run_in_order(&signature.requests, &rows, expansion, &ctx, log).await;
            return;
        }

        let requests = rows
            .iter()
            .flat_map(|row| {
                let vars = ctx.snapshot(row);
                let built: Vec<_> = signature
                    .requests
                    .iter()
                    .flat_map(|template| build_requests(template, &ctx, &vars, expansion))
                    .collect();
                built.into_iter().map(move |request| (request, vars.clone()))
            })
            .collect::<Vec<_>>();
        let threads = self.threads_for(&signature);
        tracing::debug!(signature = %signature.id, url, count = requests.len(), threads, "Dispatching requests");
        self.dispatcher.run_parallel(requests, &ctx, threads, log).await;
    }

    async fn send_origins(&self, ctx: &RunContext, log: &RecordLog) -> Origins {
        let signature = &ctx.signature;
        let templates: Vec<(&str, &RequestTemplate)> = signature
            .origin
            .iter()
            .map(|t| ("", t))
            .chain(signature.origins.iter().map(|o| (o.label.as_str(), &o.origin_req)))
            .collect();

        let mut origins = Origins::default();
        for (label, template) in templates {
            let vars = ctx.target.read().clone();
            let Some(request) = build_plain(template, &vars) else {
                continue;
            };
            for record in self.dispatcher.execute(request, vars.clone(), ctx).await {
                if let Some(response) = &record.response {
                    origins.insert(
                        label,
                        Exchange {
                            request: record.request.clone(),
                            response: response.clone(),
                        },
                    );
                }
                log.push(record);
            }
        }
        origins
    }

    /// Build and send each request only once the previous one is done
    ///
    /// Returns the final state of every record sent, in order.
    async fn run_in_order(
        &self,
        templates: &[RequestTemplate],
        rows: &[VariableRow],
        expansion: Expansion<'_>,
        ctx: &RunContext,
        log: &RecordLog,
    ) -> Vec<RecordState> {
        let mut states = Vec::new();
        for row in rows {
            for template in templates {
                let vars = ctx.snapshot(row);
                for request in build_requests(template, ctx, &vars, expansion) {
                    let vars = ctx.snapshot(row);
                    for record in self.dispatcher.execute(request, vars, ctx).await {
                        states.push(record.state);
                        log.push(record);
                    }
                }
            }
        }
        states
    }

    fn is_sequential(&self, signature: &Signature) -> bool {
        if signature.single || signature.sign_type == SignatureType::Routine {
            return true;
        }
        if signature.has_conclusions() {
            if signature.parallel {
                tracing::warn!(
                    signature = %signature.id,
                    "Signature is parallel but has conclusions; running it sequentially"
                );
            }
            return true;
        }
        false
    }

    fn threads_for(&self, signature: &Signature) -> usize {
        if signature.single {
            1
        } else if signature.threads > 0 {
            signature.threads
        } else {
            self.options.threads.max(1)
        }
    }
}

fn build_requests(
    template: &RequestTemplate,
    ctx: &RunContext,
    vars: &Target,
    expansion: Expansion<'_>,
) -> Vec<Request> {
    match expansion {
        Expansion::Plain => build_plain(template, vars).into_iter().collect(),
        Expansion::Payloads(payloads) => build(template, &ctx.signature, vars, payloads),
    }
}

/// Whether the precondition records satisfy the signature's policy
fn precondition_met(policy: MatchPolicy, states: &[RecordState]) -> bool {
    let matched = states.iter().filter(|s| **s == RecordState::Matched).count();
    match policy {
        MatchPolicy::All => !states.is_empty() && matched == states.len(),
        MatchPolicy::Any => matched > 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RecordState::*;

    #[test]
    fn test_precondition_policies() {
        assert!(!precondition_met(MatchPolicy::All, &[Matched, NotMatched]));
        assert!(precondition_met(MatchPolicy::Any, &[Matched, NotMatched]));
        assert!(!precondition_met(MatchPolicy::All, &[Matched, Abandoned]));
        assert!(precondition_met(MatchPolicy::All, &[Matched, Matched]));

        assert!(!precondition_met(MatchPolicy::All, &[]));
        assert!(!precondition_met(MatchPolicy::Any, &[]));
    }
}
