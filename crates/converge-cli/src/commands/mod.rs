//! CLI commands
//!
//! Shared argument groups for building probes, predicates and policies live
//! here; each subcommand flattens the ones it needs.

use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use converge::config::ConvergeConfig;
use converge::policy::parse_duration;
use converge::probe::{CommandRunner, FieldQueryProbe, HttpProbe, ProbeSpec, ProcessRunner, ShellProbe};
use converge::{PollPolicy, Predicate, Probe};

use crate::{Error, Result};

pub mod haproxy;
pub mod rollout;
pub mod sample;
pub mod wait;

/// Extension trait to convert errors with Display to CLI Error::CommandFailed.
pub trait CommandErrorExt<T> {
    /// Convert an error to `Error::CommandFailed` using its Display implementation.
    fn cmd_err(self) -> Result<T>;
}

impl<T, E: Display> CommandErrorExt<T> for std::result::Result<T, E> {
    fn cmd_err(self) -> Result<T> {
        self.map_err(|e| Error::command_failed(e.to_string()))
    }
}

/// Process runner configured from the CLI config
pub fn runner(config: &ConvergeConfig) -> Arc<dyn CommandRunner> {
    let mut runner = ProcessRunner::new().with_timeout(config.command_timeout);
    if let Some(ref kubeconfig) = config.kubeconfig {
        runner = runner.with_kubeconfig(kubeconfig);
    }
    Arc::new(runner)
}

/// What to probe: exactly one of `--exec`, `--query`, `--url`
#[derive(Args, Debug, Default)]
pub struct ProbeArgs {
    /// Program to run; its arguments follow `--`
    #[arg(long, value_name = "PROGRAM")]
    pub exec: Option<String>,

    /// Field query target as KIND/NAME, or KIND with --selector
    #[arg(long, value_name = "KIND[/NAME]", requires = "jsonpath")]
    pub query: Option<String>,

    /// JSONPath expression for --query, e.g. '{.metadata.generation}'
    #[arg(long)]
    pub jsonpath: Option<String>,

    /// Label selector for --query
    #[arg(long, short = 'l')]
    pub selector: Option<String>,

    /// Namespace for --query
    #[arg(long, short = 'n')]
    pub namespace: Option<String>,

    /// URL to request with curl
    #[arg(long)]
    pub url: Option<String>,

    /// Request header for --url, "Name: value" (repeatable)
    #[arg(long = "header", short = 'H', value_name = "NAME: VALUE")]
    pub headers: Vec<String>,

    /// Pin HOST:PORT:ADDRESS for --url (repeatable)
    #[arg(long, value_name = "HOST:PORT:ADDRESS")]
    pub resolve: Vec<String>,

    /// Skip TLS verification for --url
    #[arg(long, short = 'k')]
    pub insecure: bool,

    /// Cookie jar read and written by every --url request
    #[arg(long)]
    pub cookie_jar: Option<PathBuf>,

    /// Arguments for --exec
    #[arg(last = true, value_name = "ARGS")]
    pub args: Vec<String>,
}

impl ProbeArgs {
    /// Build the probe, rejecting zero or several probe kinds
    pub fn build(&self, config: &ConvergeConfig) -> Result<ProbeSpec> {
        let kinds = [self.exec.is_some(), self.query.is_some(), self.url.is_some()];
        if kinds.iter().filter(|set| **set).count() != 1 {
            return Err(Error::invalid_args(
                "exactly one of --exec, --query or --url is required",
            ));
        }
        if !self.args.is_empty() && self.exec.is_none() {
            return Err(Error::invalid_args("arguments after -- need --exec"));
        }
        let runner = runner(config);

        if let Some(ref program) = self.exec {
            return Ok(ShellProbe::new(runner, program, self.args.iter().cloned()).into());
        }

        if let Some(ref query) = self.query {
            let jsonpath = self.jsonpath.clone().unwrap_or_default();
            let probe = match (query.split_once('/'), &self.selector) {
                (Some((kind, name)), None) => {
                    FieldQueryProbe::new(runner, &config.cli, kind, name, jsonpath)
                }
                (None, Some(selector)) => {
                    FieldQueryProbe::by_selector(runner, &config.cli, query, selector, jsonpath)
                }
                _ => {
                    return Err(Error::invalid_args(
                        "--query takes KIND/NAME, or KIND together with --selector",
                    ))
                }
            };
            let probe = match self.namespace {
                Some(ref ns) => probe.in_namespace(ns),
                None => probe,
            };
            return Ok(probe.into());
        }

        let url = self.url.clone().unwrap_or_default();
        let mut probe = HttpProbe::new(runner, &config.curl, url);
        for header in &self.headers {
            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| Error::invalid_args(format!("header {:?} is not NAME: VALUE", header)))?;
            probe = probe.header(name.trim(), value.trim());
        }
        for pin in &self.resolve {
            let (host, port, address) = parse_resolve(pin)?;
            probe = probe.resolve(host, port, address);
        }
        if self.insecure {
            probe = probe.insecure();
        }
        if let Some(ref jar) = self.cookie_jar {
            probe = probe.cookie_jar(jar);
        }
        Ok(probe.into())
    }
}

/// Split a curl `--resolve` pin into host, port and address
pub fn parse_resolve(pin: &str) -> Result<(&str, u16, &str)> {
    let mut parts = pin.splitn(3, ':');
    match (parts.next(), parts.next().map(str::parse::<u16>), parts.next()) {
        (Some(host), Some(Ok(port)), Some(address)) if !host.is_empty() && !address.is_empty() => {
            Ok((host, port, address))
        }
        _ => Err(Error::invalid_args(format!(
            "--resolve {:?} is not HOST:PORT:ADDRESS",
            pin
        ))),
    }
}

/// Match rule: exactly one kind of predicate
#[derive(Args, Debug, Default)]
pub struct PredicateArgs {
    /// Output equals this value (surrounding whitespace ignored)
    #[arg(long)]
    pub equals: Option<String>,

    /// Output contains this text (repeatable: all must be present)
    #[arg(long)]
    pub contains: Vec<String>,

    /// Output does not contain this text
    #[arg(long)]
    pub not_contains: Option<String>,

    /// Output matches this regular expression
    #[arg(long, value_name = "REGEX")]
    pub matches: Option<String>,
}

impl PredicateArgs {
    /// Build the predicate, rejecting zero or several kinds
    pub fn build(&self) -> Result<Predicate> {
        let kinds = [
            self.equals.is_some(),
            !self.contains.is_empty(),
            self.not_contains.is_some(),
            self.matches.is_some(),
        ];
        if kinds.iter().filter(|set| **set).count() != 1 {
            return Err(Error::invalid_args(
                "exactly one of --equals, --contains, --not-contains or --matches is required",
            ));
        }
        if let Some(ref value) = self.equals {
            return Ok(Predicate::equals(value));
        }
        if let Some(ref value) = self.not_contains {
            return Ok(Predicate::not_contains(value));
        }
        if let Some(ref pattern) = self.matches {
            return Ok(Predicate::matches(pattern)?);
        }
        Ok(match self.contains.as_slice() {
            [single] => Predicate::contains(single),
            many => Predicate::contains_all(many.iter().cloned()),
        })
    }
}

/// Deadline and cadence, defaulting to the config's policy for the probe's latency class
#[derive(Args, Debug, Default)]
pub struct PolicyArgs {
    /// Total time to wait, e.g. 500ms, 30s, 5m
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Time between attempts
    #[arg(long, value_parser = parse_duration)]
    pub interval: Option<Duration>,
}

impl PolicyArgs {
    /// Fill unset values from `default`
    pub fn resolve(&self, default: PollPolicy) -> PollPolicy {
        PollPolicy::new(
            self.timeout.unwrap_or(default.timeout),
            self.interval.unwrap_or(default.interval),
        )
    }

    /// Policy for `probe`, using the config's default for its latency class
    pub fn for_probe<P: Probe + ?Sized>(&self, config: &ConvergeConfig, probe: &P) -> PollPolicy {
        self.resolve(config.policy_for(probe.latency()))
    }
}
