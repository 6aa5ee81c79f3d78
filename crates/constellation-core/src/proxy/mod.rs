//! The broker: spawns the backend server and relays line-delimited JSON-RPC
//! between it and the client.
//!
//! Two relay loops run on their own threads. The client→server loop gates
//! `tools/call` requests through the policy engine and writes denials back
//! to the client inline, before its next read. The server→client loop
//! filters tool-list responses. The loops share only the audit logger and
//! the client-side writer; each pipe end has exactly one owner.

pub mod jsonrpc;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use serde_json::Value;
use tracing::warn;

use self::jsonrpc::{deny_response, filter_tool_list, Envelope};
use crate::audit::{redact_secrets, AuditLogger, ToolCallEvent};
use crate::policy::PolicyEngine;

/// Maximum accepted line length in either direction; longer lines are
/// framing errors and are dropped.
const MAX_LINE_BYTES: usize = 1024 * 1024;

type ClientWriter = Mutex<Box<dyn Write + Send>>;

/// Proxy behavior beyond the policy itself.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Server name from the policy file; stamped on audit records.
    pub server_name: String,
    /// Policy file path recorded in the startup audit event.
    pub policy_path: String,
    /// Evaluate and audit but never deny.
    pub dry_run: bool,
    /// Env-name → reference map, used to redact colliding argument names in
    /// audit records.
    pub secret_refs: BTreeMap<String, String>,
}

/// A running proxied server: the child process plus everything the two
/// relay loops need.
pub struct Proxy {
    child: Child,
    engine: Arc<PolicyEngine>,
    logger: Arc<AuditLogger>,
    config: ProxyConfig,
}

impl Drop for Proxy {
    fn drop(&mut self) {
        // Best-effort cleanup
        let _ = self.child.kill();
    }
}

impl Proxy {
    /// Spawn the backend with the parent's environment overlaid by the
    /// resolved secrets, then record the startup audit event.
    ///
    /// stdin/stdout are piped for the protocol; stderr stays attached to
    /// the parent and is never inspected.
    pub fn spawn(
        command: &str,
        args: &[String],
        extra_env: &BTreeMap<String, String>,
        engine: PolicyEngine,
        logger: Arc<AuditLogger>,
        config: ProxyConfig,
    ) -> io::Result<Self> {
        let child = Command::new(command)
            .args(args)
            .envs(extra_env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        logger.log_startup(&config.server_name, &config.policy_path);

        Ok(Self {
            child,
            engine: Arc::new(engine),
            logger,
            config,
        })
    }

    /// Broker this process's stdin/stdout against the child until the
    /// client closes its end, then reap the child and return its exit code.
    pub fn run(mut self) -> io::Result<i32> {
        let child_stdin = self.child.stdin.take().expect("child stdin");
        let child_stdout = self.child.stdout.take().expect("child stdout");

        let client_out: Arc<ClientWriter> = Arc::new(Mutex::new(Box::new(io::stdout())));

        let server_relay = ServerRelay {
            allowed: self.engine.allowed_tools(),
        };
        let client_relay = ClientRelay {
            engine: self.engine.clone(),
            logger: self.logger.clone(),
            config: self.config.clone(),
        };

        let out = client_out.clone();
        let server_to_client = thread::spawn(move || server_relay.run(child_stdout, &out));

        let out = client_out.clone();
        let client_to_server = thread::spawn(move || {
            let stdin = io::stdin();
            let mut server_in = child_stdin;
            client_relay.run(stdin.lock(), &mut server_in, &out)
            // server_in drops here, closing the child's stdin
        });

        if let Err(err) = join_relay(client_to_server, "client relay") {
            warn!("client relay ended with error: {err}");
        }

        // Client EOF closed the child's stdin; wait for the child, then
        // drain the server-side relay.
        let status = self.child.wait()?;
        if let Err(err) = join_relay(server_to_client, "server relay") {
            warn!("server relay ended with error: {err}");
        }

        self.logger.log_shutdown(&self.config.server_name);
        Ok(status.code().unwrap_or(1))
    }
}

fn join_relay(handle: thread::JoinHandle<io::Result<()>>, name: &str) -> io::Result<()> {
    handle
        .join()
        .map_err(|_| io::Error::other(format!("{name} panicked")))?
}

/// Client→server relay: policy gate, audit, denial synthesis.
struct ClientRelay {
    engine: Arc<PolicyEngine>,
    logger: Arc<AuditLogger>,
    config: ProxyConfig,
}

impl ClientRelay {
    /// Read client lines until EOF. Denials are written inline, so a second
    /// message is never ingested while the first is still owed a reply.
    fn run(
        &self,
        client_in: impl Read,
        server_in: &mut dyn Write,
        client_out: &ClientWriter,
    ) -> io::Result<()> {
        let mut reader = BufReader::new(client_in);
        let mut line = Vec::new();
        loop {
            match read_frame(&mut reader, &mut line)? {
                Frame::Eof => return Ok(()),
                Frame::Oversize => {
                    warn!("dropping oversize client line (> {MAX_LINE_BYTES} bytes)");
                    continue;
                }
                Frame::Line => {}
            }
            let Ok(text) = std::str::from_utf8(&line) else {
                warn!("dropping non-UTF-8 client line");
                continue;
            };
            if let Err(err) = self.handle_line(text, server_in, client_out) {
                // Pipe gone on either side; stop and let the caller reap
                // the child.
                warn!("stopping client relay: {err}");
                return Ok(());
            }
        }
    }

    fn handle_line(
        &self,
        line: &str,
        server_in: &mut dyn Write,
        client_out: &ClientWriter,
    ) -> io::Result<()> {
        let envelope = match Envelope::parse(line) {
            Ok(envelope) => envelope,
            Err(err) => {
                // The proxy is not a protocol validator; the server may
                // accept shapes we do not model.
                warn!("failed to parse client message, forwarding raw: {err}");
                return forward(server_in, line);
            }
        };

        if !envelope.is_tool_call() {
            return forward(server_in, line);
        }

        let Some(params) = envelope.tool_call_params() else {
            warn!("failed to parse tool call params, forwarding raw");
            return forward(server_in, line);
        };

        let start = Instant::now();
        let decision = self.engine.evaluate(&params.name, &params.arguments);
        let duration_ms = start.elapsed().as_millis() as u64;

        // Audit before the forward or denial write, so the log is a
        // conservative trace of everything the child may have seen.
        self.logger.log_tool_call(ToolCallEvent {
            server: self.config.server_name.clone(),
            tool: params.name.clone(),
            arguments: redact_secrets(&params.arguments, &self.config.secret_refs),
            decision: if decision.allow { "allow" } else { "deny" }.to_string(),
            matched_rule: decision.matched_rule,
            reason: Some(decision.reason.clone()),
            duration_ms: Some(duration_ms),
        });

        if decision.allow || self.config.dry_run {
            return forward(server_in, line);
        }

        // Denied: the child never sees the request.
        let id = envelope.id.unwrap_or(Value::Null);
        write_line(client_out, &deny_response(id, &decision.reason))
    }
}

/// Server→client relay: tool-list filtering, everything else verbatim.
struct ServerRelay {
    allowed: std::collections::BTreeSet<String>,
}

impl ServerRelay {
    fn run(&self, server_out: impl Read, client_out: &ClientWriter) -> io::Result<()> {
        let mut reader = BufReader::new(server_out);
        let mut line = Vec::new();
        loop {
            match read_frame(&mut reader, &mut line)? {
                Frame::Eof => return Ok(()),
                Frame::Oversize => {
                    warn!("dropping oversize server line (> {MAX_LINE_BYTES} bytes)");
                    continue;
                }
                Frame::Line => {}
            }
            let Ok(text) = std::str::from_utf8(&line) else {
                warn!("dropping non-UTF-8 server line");
                continue;
            };
            write_line(client_out, &self.handle_line(text))?;
        }
    }

    /// The line to deliver: filtered when it is a tool-list response,
    /// untouched otherwise.
    fn handle_line<'a>(&self, line: &'a str) -> Cow<'a, str> {
        match filter_tool_list(line, &self.allowed) {
            Some(filtered) => Cow::Owned(filtered),
            None => Cow::Borrowed(line),
        }
    }
}

enum Frame {
    Line,
    Oversize,
    Eof,
}

/// Read one newline-delimited frame into `buf` (delimiter and any trailing
/// `\r` stripped), enforcing the length bound. An oversize frame is
/// consumed up to its delimiter and reported without content.
fn read_frame(reader: &mut impl BufRead, buf: &mut Vec<u8>) -> io::Result<Frame> {
    buf.clear();
    let mut oversize = false;
    loop {
        let chunk = reader.fill_buf()?;
        if chunk.is_empty() {
            // EOF: an unterminated trailing frame still counts
            return Ok(match (buf.is_empty(), oversize) {
                (_, true) => Frame::Oversize,
                (true, false) => Frame::Eof,
                (false, false) => Frame::Line,
            });
        }

        match chunk.iter().position(|&byte| byte == b'\n') {
            Some(pos) => {
                if !oversize {
                    if buf.len() + pos > MAX_LINE_BYTES {
                        oversize = true;
                        buf.clear();
                    } else {
                        buf.extend_from_slice(&chunk[..pos]);
                    }
                }
                reader.consume(pos + 1);
                if oversize {
                    return Ok(Frame::Oversize);
                }
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                return Ok(Frame::Line);
            }
            None => {
                let len = chunk.len();
                if !oversize {
                    if buf.len() + len > MAX_LINE_BYTES {
                        oversize = true;
                        buf.clear();
                    } else {
                        buf.extend_from_slice(chunk);
                    }
                }
                reader.consume(len);
            }
        }
    }
}

fn forward(server_in: &mut dyn Write, line: &str) -> io::Result<()> {
    server_in.write_all(line.as_bytes())?;
    server_in.write_all(b"\n")?;
    server_in.flush()
}

fn write_line(out: &ClientWriter, line: &str) -> io::Result<()> {
    let mut writer = out.lock().map_err(|err| io::Error::other(err.to_string()))?;
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}
