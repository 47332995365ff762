//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::rc::Rc;

use crate::backend::{
    ApiMethod, ApiRequest, ApiResponse, BackendError, BackendFuture, WorkspaceTransport,
};
use crate::runner::{CommandOutput, CommandRunner, InvocationContext, RunnerError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Working directory and environment overlay.
    pub context: InvocationContext,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns the first `count` arguments joined by spaces, which for
    /// Terraform identifies the subcommand (`workspace new`, `plan`).
    #[must_use]
    pub fn leading_args(&self, count: usize) -> String {
        self.args
            .iter()
            .take(count)
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Returns `true` when any argument equals `needle`.
    #[must_use]
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|arg| arg.to_string_lossy() == needle)
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a successful exit status with `stdout`.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    /// Number of queued responses not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.responses.borrow().len()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        context: &InvocationContext,
    ) -> Result<CommandOutput, RunnerError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            context: context.clone(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| RunnerError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Request captured by [`RecordingTransport`], with the authorisation
/// header rendered for assertions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: ApiMethod,
    /// Absolute request URL.
    pub url: String,
    /// Rendered `Authorization` header value.
    pub authorization: String,
    /// `Content-Type` header value.
    pub content_type: String,
    /// JSON body, when the request carries one.
    pub body: Option<serde_json::Value>,
}

/// Hosted-workspace transport that records requests and replies from a
/// queue, answering `200` with an empty body once the queue is drained.
#[derive(Clone, Debug, Default)]
pub struct RecordingTransport {
    responses: Rc<RefCell<VecDeque<Result<ApiResponse, BackendError>>>>,
    requests: Rc<RefCell<Vec<RecordedRequest>>>,
}

impl RecordingTransport {
    /// Creates a transport with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response with `status` and `body`.
    pub fn push_response(&self, status: u16, body: impl Into<String>) {
        self.responses.borrow_mut().push_back(Ok(ApiResponse {
            status,
            body: body.into(),
        }));
    }

    /// Queues a transport-level failure.
    pub fn push_transport_error(&self, message: impl Into<String>) {
        self.responses
            .borrow_mut()
            .push_back(Err(BackendError::Transport {
                message: message.into(),
            }));
    }

    /// Returns a snapshot of the requests sent so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.borrow().clone()
    }
}

impl WorkspaceTransport for RecordingTransport {
    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> BackendFuture<'a, ApiResponse, BackendError> {
        Box::pin(async move {
            self.requests.borrow_mut().push(RecordedRequest {
                method: request.method,
                url: request.url.clone(),
                authorization: request.authorization_header(),
                content_type: String::from(request.content_type()),
                body: request.body.clone(),
            });
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| {
                    Ok(ApiResponse {
                        status: 200,
                        body: String::new(),
                    })
                })
        })
    }
}

/// Produces a `terraform output -json` document with string outputs.
#[must_use]
pub fn json_outputs(outputs: &[(&str, &str, bool)]) -> String {
    let entries = outputs
        .iter()
        .map(|(name, value, sensitive)| {
            (
                (*name).to_owned(),
                serde_json::json!({"sensitive": sensitive, "type": "string", "value": value}),
            )
        })
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(entries).to_string()
}
