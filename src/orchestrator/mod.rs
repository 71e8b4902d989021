//! Session orchestrator.
//!
//! Drives one session through a fixed pipeline. Every step runs only after the previous
//! one succeeded; the first failure ends the session as `Failed(step)` and is returned
//! to the caller unchanged apart from the step name.

use std::{fmt, io::Write, path::PathBuf, sync::Arc, time::Duration};

use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use crate::authority::{AuthorityHandle, CredentialSource, Keypair};
use crate::config::{EndpointConfig, SessionParams};
use crate::connection::{ConnectionHandle, ConnectionState, Transport};
use crate::error::{InterfaceLoadError, SessionError};
use crate::interface::{GasPassAccount, InterfaceDescription, ProgramInterface, SessionAccounts};
use crate::program::GasPassState;
use crate::wire::Address;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    Connect,
    BindAuthority,
    LoadInterface,
    Initialize,
    Topup,
    SubmitTx,
    PrintState,
    Withdraw,
}

impl Step {
    /// The full session, in order.
    pub const SEQUENCE: [Step; 7] = [
        Step::Connect,
        Step::BindAuthority,
        Step::LoadInterface,
        Step::Initialize,
        Step::Topup,
        Step::SubmitTx,
        Step::PrintState,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::Connect => "connect",
            Step::BindAuthority => "bindAuthority",
            Step::LoadInterface => "loadInterface",
            Step::Initialize => "initialize",
            Step::Topup => "topup",
            Step::SubmitTx => "submitTx",
            Step::PrintState => "printState",
            Step::Withdraw => "withdraw",
        }
    }

    fn reached(self) -> SessionState {
        match self {
            Step::Connect => SessionState::ConnectionEstablished,
            Step::BindAuthority => SessionState::AuthorityBound,
            Step::LoadInterface => SessionState::InterfaceLoaded,
            Step::Initialize => SessionState::Initialized,
            Step::Topup => SessionState::ToppedUp,
            Step::SubmitTx => SessionState::Submitted,
            Step::PrintState => SessionState::StatePrinted,
            Step::Withdraw => SessionState::Withdrawn,
        }
    }

    fn progress_line(self) -> &'static str {
        match self {
            Step::Connect => "✅ Connected to Solana cluster",
            Step::BindAuthority => "✅ Provider connected",
            Step::LoadInterface => "✅ GAS PASS program loaded",
            Step::Initialize => "✅ Program initialized",
            Step::Topup => "✅ Account topped up",
            Step::SubmitTx => "✅ Transaction submitted",
            Step::PrintState => "✅ State printed",
            Step::Withdraw => "✅ Funds withdrawn",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Start,
    ConnectionEstablished,
    AuthorityBound,
    InterfaceLoaded,
    Initialized,
    ToppedUp,
    Submitted,
    Withdrawn,
    StatePrinted,
    Completed,
    Failed(Step),
}

/// What the session does after the interface is loaded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SessionPlan {
    /// initialize, topup, submitTx, printState.
    #[default]
    FullSequence,
    InspectState,
    Withdraw { amount: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub step: Step,
    /// Signature, address or version reported by the step.
    pub detail: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub steps: Vec<StepOutcome>,
    pub state: SessionState,
    pub gas_pass_account: Address,
    pub final_state: Option<GasPassState>,
}

impl SessionReport {
    pub fn steps_executed(&self) -> usize {
        self.steps.len()
    }
}

/// Receives the human-readable progress of a session.
pub trait ProgressSink: Send {
    fn started(&mut self) {}

    fn step_completed(&mut self, outcome: &StepOutcome);

    fn completed(&mut self, report: &SessionReport);

    fn failed(&mut self, error: &SessionError);
}

/// Prints progress lines to one writer and the failure report to another.
/// The binary uses stdout and stderr.
pub struct ConsoleSink<W: Write + Send, E: Write + Send = W> {
    out: W,
    err: E,
}

impl ConsoleSink<std::io::Stdout, std::io::Stderr> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout(), std::io::stderr())
    }
}

impl<W: Write + Send, E: Write + Send> ConsoleSink<W, E> {
    pub fn new(out: W, err: E) -> Self {
        Self { out, err }
    }

    /// The progress and failure writers.
    pub fn into_inner(self) -> (W, E) {
        (self.out, self.err)
    }

    // progress output is best effort
    fn line(&mut self, text: fmt::Arguments<'_>) {
        let _ = writeln!(self.out, "{text}");
    }
}

impl<W: Write + Send, E: Write + Send> ProgressSink for ConsoleSink<W, E> {
    fn started(&mut self) {
        self.line(format_args!("🚀 GAS PASS - Advanced Solana Gas Solution"));
        self.line(format_args!("Initializing transaction execution..."));
    }

    fn step_completed(&mut self, outcome: &StepOutcome) {
        self.line(format_args!("{}", outcome.step.progress_line()));
        if outcome.step == Step::PrintState {
            if let Some(detail) = &outcome.detail {
                self.line(format_args!("   {detail}"));
            }
        }
    }

    fn completed(&mut self, report: &SessionReport) {
        self.line(format_args!(
            "🎉 GAS PASS execution completed successfully! ({} steps)",
            report.steps_executed()
        ));
    }

    fn failed(&mut self, error: &SessionError) {
        let _ = self.out.flush();
        let _ = writeln!(self.err, "❌ Error during execution: {error}");
    }
}

/// Where the interface description is read from at the load step.
#[derive(Clone, Debug, Default)]
pub enum DescriptionSource {
    #[default]
    Bundled,
    Path(PathBuf),
    Inline(String),
}

impl DescriptionSource {
    pub fn load(&self) -> Result<InterfaceDescription, InterfaceLoadError> {
        match self {
            DescriptionSource::Bundled => InterfaceDescription::bundled(),
            DescriptionSource::Path(path) => InterfaceDescription::read(path),
            DescriptionSource::Inline(text) => InterfaceDescription::parse(text),
        }
    }
}

/// One orchestrator instance. Independent sessions share nothing but the transport.
pub struct Session {
    endpoint: EndpointConfig,
    connection: Option<ConnectionState>,
    transport: Arc<dyn Transport>,
    credential: CredentialSource,
    description: DescriptionSource,
    gas_pass: GasPassAccount,
    params: SessionParams,
    call_timeout: Option<Duration>,
    state: SessionState,
}

impl Session {
    /// Defaults: no credential, bundled description, a fresh gas pass keypair.
    pub fn new(endpoint: EndpointConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            connection: None,
            transport,
            credential: CredentialSource::None,
            description: DescriptionSource::Bundled,
            gas_pass: GasPassAccount::Keypair(Arc::new(Keypair::generate())),
            params: SessionParams::default(),
            call_timeout: None,
            state: SessionState::Start,
        }
    }

    pub fn with_credential(mut self, credential: CredentialSource) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_description(mut self, description: DescriptionSource) -> Self {
        self.description = description;
        self
    }

    pub fn with_gas_pass(mut self, gas_pass: GasPassAccount) -> Self {
        self.gas_pass = gas_pass;
        self
    }

    pub fn with_params(mut self, params: SessionParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Option<Duration>) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// State of the last run's connection; `None` until a handshake succeeded.
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.connection
    }

    pub fn gas_pass_address(&self) -> Address {
        self.gas_pass.address()
    }

    pub async fn run(
        &mut self,
        plan: &SessionPlan,
        sink: &mut dyn ProgressSink,
    ) -> Result<SessionReport, SessionError> {
        let span = info_span!(
            "session",
            program = %self.endpoint.program_id(),
            gas_pass = %self.gas_pass.address()
        );
        self.state = SessionState::Start;
        self.connection = None;
        sink.started();

        let mut report = SessionReport {
            steps: Vec::new(),
            state: SessionState::Start,
            gas_pass_account: self.gas_pass.address(),
            final_state: None,
        };
        match self.execute(plan, sink, &mut report).instrument(span).await {
            Ok(()) => {
                self.state = SessionState::Completed;
                report.state = SessionState::Completed;
                info!(steps = report.steps_executed(), "session completed");
                sink.completed(&report);
                Ok(report)
            }
            Err(err) => {
                self.state = SessionState::Failed(err.step);
                warn!(step = %err.step, error = %err.cause, "session failed");
                sink.failed(&err);
                Err(err)
            }
        }
    }

    fn advance(
        &mut self,
        step: Step,
        detail: Option<String>,
        sink: &mut dyn ProgressSink,
        report: &mut SessionReport,
    ) {
        self.state = step.reached();
        report.state = self.state;
        info!(%step, detail = detail.as_deref().unwrap_or(""), "step completed");
        let outcome = StepOutcome { step, detail };
        sink.step_completed(&outcome);
        report.steps.push(outcome);
    }

    async fn execute(
        &mut self,
        plan: &SessionPlan,
        sink: &mut dyn ProgressSink,
        report: &mut SessionReport,
    ) -> Result<(), SessionError> {
        let mut connection = ConnectionHandle::connect(
            self.endpoint.clone(),
            Arc::clone(&self.transport),
            self.call_timeout,
        )
        .await
        .map_err(SessionError::at(Step::Connect))?;
        self.connection = Some(connection.state());
        let version = connection.node_version().to_string();
        self.advance(Step::Connect, Some(version), sink, report);

        let outcome = self.execute_connected(&connection, plan, sink, report).await;
        connection.close();
        self.connection = Some(connection.state());
        outcome
    }

    async fn execute_connected(
        &mut self,
        connection: &ConnectionHandle,
        plan: &SessionPlan,
        sink: &mut dyn ProgressSink,
        report: &mut SessionReport,
    ) -> Result<(), SessionError> {
        let credential = self
            .credential
            .acquire()
            .map_err(SessionError::at(Step::BindAuthority))?;
        let authority = AuthorityHandle::bind(connection, credential)
            .map_err(SessionError::at(Step::BindAuthority))?;
        self.advance(
            Step::BindAuthority,
            Some(authority.address().to_string()),
            sink,
            report,
        );

        let description = self
            .description
            .load()
            .map_err(SessionError::at(Step::LoadInterface))?;
        let accounts = SessionAccounts {
            gas_pass: self.gas_pass.clone(),
            executor: self.params.executor,
        };
        let program = ProgramInterface::load(
            description,
            self.endpoint.program_id(),
            &authority,
            accounts,
        )
        .map_err(SessionError::at(Step::LoadInterface))?;
        self.advance(
            Step::LoadInterface,
            Some(program.program_id().to_string()),
            sink,
            report,
        );

        match plan {
            SessionPlan::FullSequence => {
                let signature = program
                    .initialize(self.params.nonce)
                    .await
                    .map_err(SessionError::at(Step::Initialize))?;
                self.advance(Step::Initialize, Some(signature), sink, report);

                let signature = program
                    .topup(self.params.topup_amount)
                    .await
                    .map_err(SessionError::at(Step::Topup))?;
                self.advance(Step::Topup, Some(signature), sink, report);

                let signature = program
                    .submit_tx(&self.params.payload)
                    .await
                    .map_err(SessionError::at(Step::SubmitTx))?;
                self.advance(Step::SubmitTx, Some(signature), sink, report);
            }
            SessionPlan::InspectState => {}
            SessionPlan::Withdraw { amount } => {
                let signature = program
                    .withdraw(*amount)
                    .await
                    .map_err(SessionError::at(Step::Withdraw))?;
                self.advance(Step::Withdraw, Some(signature), sink, report);
            }
        }

        let state = program
            .print_state()
            .await
            .map_err(SessionError::at(Step::PrintState))?;
        self.advance(Step::PrintState, Some(state.to_string()), sink, report);
        report.final_state = Some(state);
        Ok(())
    }
}
