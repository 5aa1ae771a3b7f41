//! Probes: side-effect-free reads against the system under test.
//!
//! Every probe kind is built from typed fields into an argument vector and
//! executed without a shell, so there is no quoting layer to get wrong.
//!
//! - [`ShellProbe`] runs a program, typically `oc exec` into a pod
//! - [`FieldQueryProbe`] runs `oc get ... -o jsonpath=...`
//! - [`HttpProbe`] runs curl and keeps status line, headers and body
//!
//! All of them go through a [`CommandRunner`], which tests replace with a mock.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

#[cfg(test)]
use mockall::automock;

use crate::policy::LatencyClass;
use crate::{Error, Result};

/// Marker appended by curl `-w` so the status code can be split from the body
pub const CURL_STATUS_MARKER: &str = "\n__HTTP_STATUS__";

/// Default per-command timeout for spawned processes
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default `--max-time` for a single curl request
pub const DEFAULT_CURL_MAX_TIME: Duration = Duration::from_secs(10);

// =============================================================================
// Command execution
// =============================================================================

/// Captured output of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal
    pub status: Option<i32>,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Output of a process that exited 0
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Output of a process that exited with `code`
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the process exited 0
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Executes external programs on behalf of probes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and capture its output.
    ///
    /// A non-zero exit is not an error at this layer; probes decide what it means.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// [`CommandRunner`] backed by tokio processes
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    kubeconfig: Option<PathBuf>,
    timeout: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl ProcessRunner {
    /// Runner with the default timeout and the ambient kubeconfig
    pub fn new() -> Self {
        Self::default()
    }

    /// Export `KUBECONFIG` to every spawned process
    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Kill processes that run longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref kubeconfig) = self.kubeconfig {
            cmd.env("KUBECONFIG", kubeconfig);
        }

        trace!(command = %display_command(program, args), "spawning");
        let child = cmd.spawn().map_err(|e| {
            let described = display_command(program, args);
            match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    Error::probe_permanent(described, format!("failed to spawn {}: {}", program, e))
                }
                _ => Error::probe(described, format!("failed to spawn {}: {}", program, e)),
            }
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(Error::probe(
                    display_command(program, args),
                    format!("timed out after {:?}", self.timeout),
                ))
            }
        };

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Render a command line for logs and error messages
pub fn display_command(program: &str, args: &[String]) -> String {
    let mut out = quote_arg(program);
    for arg in args {
        out.push(' ');
        out.push_str(&quote_arg(arg));
    }
    out
}

fn quote_arg(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| !c.is_whitespace() && !matches!(c, '\'' | '"' | '\\' | '$' | '`' | '*'));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

// =============================================================================
// Probe trait
// =============================================================================

/// A read that produces a textual observation.
///
/// Must be idempotent from the caller's point of view; the poller calls it
/// repeatedly.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Short description for logs and errors
    fn describe(&self) -> String;

    /// How long this kind of probe usually takes to converge
    fn latency(&self) -> LatencyClass;

    /// Execute once
    async fn observe(&self) -> Result<String>;
}

async fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
) -> Result<CommandOutput> {
    let output = runner.run(program, args).await?;
    if output.success() {
        return Ok(output);
    }
    let detail = match output.stderr.trim() {
        "" => output.stdout.trim(),
        stderr => stderr,
    };
    Err(Error::probe(
        display_command(program, args),
        format!(
            "exit status {}: {}",
            output
                .status
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            detail
        ),
    ))
}

// =============================================================================
// ShellProbe
// =============================================================================

/// Runs a program and observes its stdout
#[derive(Clone)]
pub struct ShellProbe {
    runner: Arc<dyn CommandRunner>,
    program: String,
    args: Vec<String>,
    latency: LatencyClass,
}

impl ShellProbe {
    /// Run `program` with `args`
    pub fn new<I, S>(runner: Arc<dyn CommandRunner>, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            runner,
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            latency: LatencyClass::Fast,
        }
    }

    /// `<cli> exec -n <namespace> <pod> [-c <container>] -- <command...>`
    pub fn exec_in_pod<I, S>(
        runner: Arc<dyn CommandRunner>,
        cli: &str,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        command: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = vec![
            "exec".to_string(),
            "-n".to_string(),
            namespace.to_string(),
            pod.to_string(),
        ];
        if let Some(container) = container {
            args.push("-c".to_string());
            args.push(container.to_string());
        }
        args.push("--".to_string());
        args.extend(command.into_iter().map(Into::into));
        Self::new(runner, cli, args)
    }

    /// Override the latency class
    pub fn with_latency(mut self, latency: LatencyClass) -> Self {
        self.latency = latency;
        self
    }

    /// Arguments passed to the program
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl Probe for ShellProbe {
    fn describe(&self) -> String {
        display_command(&self.program, &self.args)
    }

    fn latency(&self) -> LatencyClass {
        self.latency
    }

    async fn observe(&self) -> Result<String> {
        let output = run_checked(self.runner.as_ref(), &self.program, &self.args).await?;
        Ok(output.stdout)
    }
}

// =============================================================================
// FieldQueryProbe
// =============================================================================

/// Which objects a field query reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTarget {
    /// A single named object
    Name(String),
    /// Every object matching a label selector
    Selector(String),
}

/// `<cli> get <kind> <target> [-n <ns>] -o jsonpath=<expr>`
#[derive(Clone)]
pub struct FieldQueryProbe {
    runner: Arc<dyn CommandRunner>,
    cli: String,
    kind: String,
    target: QueryTarget,
    namespace: Option<String>,
    jsonpath: String,
}

impl FieldQueryProbe {
    /// Query a field of a named object
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        cli: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        jsonpath: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            cli: cli.into(),
            kind: kind.into(),
            target: QueryTarget::Name(name.into()),
            namespace: None,
            jsonpath: jsonpath.into(),
        }
    }

    /// Query a field across objects matching `selector`
    pub fn by_selector(
        runner: Arc<dyn CommandRunner>,
        cli: impl Into<String>,
        kind: impl Into<String>,
        selector: impl Into<String>,
        jsonpath: impl Into<String>,
    ) -> Self {
        Self {
            target: QueryTarget::Selector(selector.into()),
            ..Self::new(runner, cli, kind, String::new(), jsonpath)
        }
    }

    /// Restrict the query to a namespace
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Arguments passed to the CLI
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["get".to_string(), self.kind.clone()];
        match &self.target {
            QueryTarget::Name(name) => args.push(name.clone()),
            QueryTarget::Selector(selector) => {
                args.push("-l".to_string());
                args.push(selector.clone());
            }
        }
        if let Some(ref ns) = self.namespace {
            args.push("-n".to_string());
            args.push(ns.clone());
        }
        args.push("-o".to_string());
        args.push(format!("jsonpath={}", self.jsonpath));
        args
    }
}

#[async_trait]
impl Probe for FieldQueryProbe {
    fn describe(&self) -> String {
        display_command(&self.cli, &self.args())
    }

    fn latency(&self) -> LatencyClass {
        LatencyClass::Fast
    }

    async fn observe(&self) -> Result<String> {
        let output = run_checked(self.runner.as_ref(), &self.cli, &self.args()).await?;
        Ok(output.stdout.trim().to_string())
    }
}

// =============================================================================
// HttpProbe
// =============================================================================

/// Parsed curl response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpObservation {
    /// Status code, 0 when no response was received
    pub status: u16,
    /// Header lines of the final response, status line excluded
    pub headers: Vec<(String, String)>,
    /// Every header block received, status lines included
    pub head: String,
    /// Response body
    pub body: String,
}

impl HttpObservation {
    /// First header with this name, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Headers followed by body, the text predicates run against
    pub fn text(&self) -> String {
        format!("{}{}", self.head, self.body)
    }
}

/// Split curl output produced with `-D - -w <marker>%{http_code}`
pub fn parse_curl_output(output: &str) -> HttpObservation {
    let (rest, status) = match output.rfind(CURL_STATUS_MARKER) {
        Some(idx) => {
            let status = output[idx + CURL_STATUS_MARKER.len()..]
                .trim()
                .parse()
                .unwrap_or(0);
            (&output[..idx], status)
        }
        None => (output, 0),
    };

    // Interim responses (100 Continue) produce extra header blocks; keep them
    // all in `head` and parse only the last one.
    let mut remaining = rest;
    let mut head = String::new();
    let mut last_block = "";
    while remaining.starts_with("HTTP/") {
        let (block_end, sep_len) = match (remaining.find("\r\n\r\n"), remaining.find("\n\n")) {
            (Some(crlf), Some(lf)) if lf < crlf => (lf, 2),
            (Some(crlf), _) => (crlf, 4),
            (None, Some(lf)) => (lf, 2),
            (None, None) => (remaining.len(), 0),
        };
        let block = &remaining[..block_end];
        head.push_str(&remaining[..block_end + sep_len]);
        last_block = block;
        remaining = &remaining[block_end + sep_len..];
    }

    let headers = last_block
        .lines()
        .skip(1)
        .filter_map(|line| {
            let (k, v) = line.split_once(':')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect();

    HttpObservation {
        status,
        headers,
        head,
        body: remaining.to_string(),
    }
}

/// curl request built from typed fields
#[derive(Clone)]
pub struct HttpProbe {
    runner: Arc<dyn CommandRunner>,
    curl: String,
    url: String,
    method: Option<String>,
    headers: Vec<(String, String)>,
    resolve: Vec<String>,
    insecure: bool,
    cookie_jar: Option<PathBuf>,
    max_time: Duration,
}

impl HttpProbe {
    /// GET `url` with the given curl binary
    pub fn new(runner: Arc<dyn CommandRunner>, curl: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            runner,
            curl: curl.into(),
            url: url.into(),
            method: None,
            headers: Vec::new(),
            resolve: Vec::new(),
            insecure: false,
            cookie_jar: None,
            max_time: DEFAULT_CURL_MAX_TIME,
        }
    }

    /// Use another method than GET
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Add a request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Pin `host:port` to `address`, bypassing DNS
    pub fn resolve(mut self, host: &str, port: u16, address: &str) -> Self {
        self.resolve.push(format!("{}:{}:{}", host, port, address));
        self
    }

    /// Skip TLS verification
    pub fn insecure(mut self) -> Self {
        self.insecure = true;
        self
    }

    /// Read and write cookies from `path`, for sticky-session checks
    pub fn cookie_jar(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookie_jar = Some(path.into());
        self
    }

    /// Cap a single request
    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.max_time = max_time;
        self
    }

    /// Arguments passed to curl
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-sS".to_string(),
            "-D".to_string(),
            "-".to_string(),
            "--max-time".to_string(),
            format_max_time(self.max_time),
        ];
        if self.insecure {
            args.push("-k".to_string());
        }
        if let Some(ref method) = self.method {
            args.push("-X".to_string());
            args.push(method.clone());
        }
        for (name, value) in &self.headers {
            args.push("-H".to_string());
            args.push(format!("{}: {}", name, value));
        }
        for pin in &self.resolve {
            args.push("--resolve".to_string());
            args.push(pin.clone());
        }
        if let Some(ref jar) = self.cookie_jar {
            let jar = jar.to_string_lossy().into_owned();
            args.push("-b".to_string());
            args.push(jar.clone());
            args.push("-c".to_string());
            args.push(jar);
        }
        args.push("-w".to_string());
        args.push(format!("{}%{{http_code}}", CURL_STATUS_MARKER));
        args.push(self.url.clone());
        args
    }

    /// Execute once and keep the response structure
    pub async fn observe_http(&self) -> Result<HttpObservation> {
        let output = run_checked(self.runner.as_ref(), &self.curl, &self.args()).await?;
        let observation = parse_curl_output(&output.stdout);
        if observation.status == 0 {
            return Err(Error::probe(
                self.describe(),
                "no HTTP response received".to_string(),
            ));
        }
        debug!(url = %self.url, status = observation.status, "http probe answered");
        Ok(observation)
    }
}

/// curl takes fractional seconds; zero would mean no limit at all
fn format_max_time(max_time: Duration) -> String {
    max_time.as_secs_f64().max(0.001).to_string()
}

#[async_trait]
impl Probe for HttpProbe {
    fn describe(&self) -> String {
        match self.method {
            Some(ref method) => format!("{} {}", method, self.url),
            None => format!("GET {}", self.url),
        }
    }

    fn latency(&self) -> LatencyClass {
        LatencyClass::Slow
    }

    async fn observe(&self) -> Result<String> {
        Ok(self.observe_http().await?.text())
    }
}

// =============================================================================
// Tagged union and closure adapter
// =============================================================================

/// Any of the built-in probe kinds
#[derive(Clone)]
pub enum ProbeSpec {
    /// Program execution
    Shell(ShellProbe),
    /// HTTP request through curl
    Http(HttpProbe),
    /// JSONPath field query
    FieldQuery(FieldQueryProbe),
}

impl From<ShellProbe> for ProbeSpec {
    fn from(p: ShellProbe) -> Self {
        ProbeSpec::Shell(p)
    }
}

impl From<HttpProbe> for ProbeSpec {
    fn from(p: HttpProbe) -> Self {
        ProbeSpec::Http(p)
    }
}

impl From<FieldQueryProbe> for ProbeSpec {
    fn from(p: FieldQueryProbe) -> Self {
        ProbeSpec::FieldQuery(p)
    }
}

#[async_trait]
impl Probe for ProbeSpec {
    fn describe(&self) -> String {
        match self {
            ProbeSpec::Shell(p) => p.describe(),
            ProbeSpec::Http(p) => p.describe(),
            ProbeSpec::FieldQuery(p) => p.describe(),
        }
    }

    fn latency(&self) -> LatencyClass {
        match self {
            ProbeSpec::Shell(p) => p.latency(),
            ProbeSpec::Http(p) => p.latency(),
            ProbeSpec::FieldQuery(p) => p.latency(),
        }
    }

    async fn observe(&self) -> Result<String> {
        match self {
            ProbeSpec::Shell(p) => p.observe().await,
            ProbeSpec::Http(p) => p.observe().await,
            ProbeSpec::FieldQuery(p) => p.observe().await,
        }
    }
}

/// Probe backed by an async closure
pub struct FnProbe<F> {
    description: String,
    latency: LatencyClass,
    f: F,
}

impl<F, Fut> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    /// Wrap `f` as a [`LatencyClass::Fast`] probe
    pub fn new(description: impl Into<String>, f: F) -> Self {
        Self {
            description: description.into(),
            latency: LatencyClass::Fast,
            f,
        }
    }

    /// Override the latency class
    pub fn with_latency(mut self, latency: LatencyClass) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl<F, Fut> Probe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    fn describe(&self) -> String {
        self.description.clone()
    }

    fn latency(&self) -> LatencyClass {
        self.latency
    }

    async fn observe(&self) -> Result<String> {
        (self.f)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::{always, eq};
    use rstest::rstest;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exec_in_pod_builds_typed_args() {
        let runner = Arc::new(MockCommandRunner::new());
        let probe = ShellProbe::exec_in_pod(
            runner,
            "oc",
            "openshift-ingress",
            "router-default-abc",
            Some("router"),
            ["cat", "/var/lib/haproxy/conf/haproxy.config"],
        );
        assert_eq!(
            probe.args(),
            strings(&[
                "exec",
                "-n",
                "openshift-ingress",
                "router-default-abc",
                "-c",
                "router",
                "--",
                "cat",
                "/var/lib/haproxy/conf/haproxy.config"
            ])
        );
    }

    #[tokio::test]
    async fn shell_probe_returns_stdout() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .with(eq("oc"), always())
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok("ROUTER_THREADS=4\n")));
        let probe = ShellProbe::new(Arc::new(runner), "oc", ["get", "pods"]);
        assert_eq!(probe.observe().await.unwrap(), "ROUTER_THREADS=4\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_transient_probe_error() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_, _| {
            Ok(CommandOutput::failed(
                1,
                "Error from server (NotFound): pods \"x\" not found",
            ))
        });
        let probe = ShellProbe::new(Arc::new(runner), "oc", ["get", "pod", "x"]);
        let err = probe.observe().await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("exit status 1"));
        assert!(err.to_string().contains("NotFound"));
    }

    #[test]
    fn field_query_args_by_name_and_selector() {
        let runner: Arc<dyn CommandRunner> = Arc::new(MockCommandRunner::new());
        let by_name = FieldQueryProbe::new(
            runner.clone(),
            "oc",
            "deployment",
            "router-default",
            "{.metadata.generation}",
        )
        .in_namespace("openshift-ingress");
        assert_eq!(
            by_name.args(),
            strings(&[
                "get",
                "deployment",
                "router-default",
                "-n",
                "openshift-ingress",
                "-o",
                "jsonpath={.metadata.generation}"
            ])
        );

        let by_selector = FieldQueryProbe::by_selector(
            runner,
            "kubectl",
            "pods",
            "app=web",
            "{.items[*].metadata.name}",
        );
        assert_eq!(
            by_selector.args(),
            strings(&[
                "get",
                "pods",
                "-l",
                "app=web",
                "-o",
                "jsonpath={.items[*].metadata.name}"
            ])
        );
        assert_eq!(
            by_selector.describe(),
            "kubectl get pods -l app=web -o 'jsonpath={.items[*].metadata.name}'"
        );
    }

    #[tokio::test]
    async fn field_query_trims_output() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_, _| Ok(CommandOutput::ok("  3\n")));
        let probe = FieldQueryProbe::new(Arc::new(runner), "oc", "deploy", "d", "{.x}");
        assert_eq!(probe.observe().await.unwrap(), "3");
    }

    #[test]
    fn http_probe_args() {
        let runner: Arc<dyn CommandRunner> = Arc::new(MockCommandRunner::new());
        let probe = HttpProbe::new(runner, "curl", "https://app.apps.example.com/path")
            .insecure()
            .header("Host", "app.apps.example.com")
            .resolve("app.apps.example.com", 443, "10.0.0.5")
            .cookie_jar("/tmp/jar")
            .max_time(Duration::from_secs(5));
        let args = probe.args();
        assert_eq!(&args[..5], &strings(&["-sS", "-D", "-", "--max-time", "5"])[..]);
        assert!(args.contains(&"-k".to_string()));
        assert!(args.contains(&"Host: app.apps.example.com".to_string()));
        assert!(args.contains(&"app.apps.example.com:443:10.0.0.5".to_string()));
        assert!(args.windows(2).any(|w| w == ["-b", "/tmp/jar"]));
        assert!(args.windows(2).any(|w| w == ["-c", "/tmp/jar"]));
        assert_eq!(args.last().unwrap(), "https://app.apps.example.com/path");
        assert_eq!(probe.describe(), "GET https://app.apps.example.com/path");
    }

    #[test]
    fn curl_max_time_keeps_fractions() {
        assert_eq!(format_max_time(Duration::from_millis(1500)), "1.5");
        assert_eq!(format_max_time(Duration::from_secs(5)), "5");
        assert_eq!(format_max_time(Duration::ZERO), "0.001");

        let runner: Arc<dyn CommandRunner> = Arc::new(MockCommandRunner::new());
        let probe = HttpProbe::new(runner, "curl", "http://x/").max_time(Duration::from_millis(250));
        assert!(probe.args().windows(2).any(|w| w == ["--max-time", "0.25"]));
    }

    #[test]
    fn parse_curl_output_splits_head_and_body() {
        let raw = "HTTP/1.1 200 OK\r\nset-cookie: abc=123; path=/\r\nX-Frame-Options: DENY\r\n\r\nHello-OpenShift web-2\n__HTTP_STATUS__200";
        let obs = parse_curl_output(raw);
        assert_eq!(obs.status, 200);
        assert_eq!(obs.header("x-frame-options"), Some("DENY"));
        assert_eq!(obs.header("Set-Cookie"), Some("abc=123; path=/"));
        assert_eq!(obs.body, "Hello-OpenShift web-2");
        assert!(obs.text().starts_with("HTTP/1.1 200 OK"));
        assert!(obs.text().ends_with("web-2"));
    }

    #[test]
    fn parse_curl_output_keeps_last_header_block() {
        let raw = "HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nlocation: /x\r\n\r\ndone\n__HTTP_STATUS__201";
        let obs = parse_curl_output(raw);
        assert_eq!(obs.status, 201);
        assert_eq!(obs.header("location"), Some("/x"));
        assert!(obs.head.contains("100 Continue"));
        assert_eq!(obs.body, "done");
    }

    #[rstest]
    #[case::no_marker("curl: (7) Failed to connect")]
    #[case::no_response("\n__HTTP_STATUS__000")]
    fn parse_curl_output_without_response(#[case] raw: &str) {
        assert_eq!(parse_curl_output(raw).status, 0);
    }

    #[tokio::test]
    async fn http_probe_without_response_is_probe_error() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_, _| Ok(CommandOutput::ok("\n__HTTP_STATUS__000")));
        let probe = HttpProbe::new(Arc::new(runner), "curl", "http://x");
        let err = probe.observe().await.unwrap_err();
        assert!(matches!(err, Error::Probe { transient: true, .. }));
    }

    #[tokio::test]
    async fn probe_spec_delegates() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_, _| Ok(CommandOutput::ok("HTTP/1.1 503 Service Unavailable\r\n\r\n\n__HTTP_STATUS__503")));
        let spec: ProbeSpec = HttpProbe::new(Arc::new(runner), "curl", "http://x").into();
        assert_eq!(spec.latency(), LatencyClass::Slow);
        assert!(spec.observe().await.unwrap().contains("503"));
    }

    #[test]
    fn display_command_quotes_only_when_needed() {
        assert_eq!(
            display_command("oc", &strings(&["exec", "pod", "--", "sh", "-c", "echo $HOME"])),
            "oc exec pod -- sh -c 'echo $HOME'"
        );
        assert_eq!(display_command("x", &strings(&["it's"])), r"x 'it'\''s'");
        assert_eq!(display_command("x", &strings(&[""])), "x ''");
    }

    #[tokio::test]
    async fn process_runner_reports_missing_binary_as_permanent() {
        let runner = ProcessRunner::new();
        let err = runner
            .run("definitely-not-a-real-binary-4f2a", &[])
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn fn_probe_runs_closure() {
        let probe = FnProbe::new("static", || async { Ok("value".to_string()) })
            .with_latency(LatencyClass::Rollout);
        assert_eq!(probe.describe(), "static");
        assert_eq!(probe.latency(), LatencyClass::Rollout);
        assert_eq!(probe.observe().await.unwrap(), "value");
    }
}
