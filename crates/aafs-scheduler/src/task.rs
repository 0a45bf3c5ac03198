//! Pending tasks: the unit of scheduled work in the queue.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Event id carried by shutdown tasks.
pub const EVID_SHUTDOWN: &str = "===shutdown===";
/// Event id carried by feed-poll control tasks.
pub const EVID_POLL: &str = "===poll===";
/// Submitter id for tasks the dispatcher chains itself.
pub const SUBID_AAFS: &str = "AAFS";
/// Submitter id for tasks posted from the command line.
pub const SUBID_CLI: &str = "CLI";

/// Execution time for a shutdown request: ahead of any real event.
pub const EXEC_TIME_SHUTDOWN: i64 = 20_000_000;
/// Earliest time an ordinary queued task may carry.
pub const EXEC_TIME_MIN_WAITING: i64 = 1;
/// Cutoff that makes every waiting task ready.
pub const EXEC_TIME_FAR_FUTURE: i64 = 1_000_000_000_000_000;

/// Handler selector. Stored as its integer code so unknown codes survive a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opcode {
    NoOp,
    Shutdown,
    ConsoleMessage,
    GenForecast,
    GenPdlReport,
    GenExpire,
    IntakeSync,
    IntakePdl,
    AnalystIntervene,
    PollStart,
    PollStop,
    PollRun,
}

impl Opcode {
    pub const ALL: [Opcode; 12] = [
        Opcode::NoOp,
        Opcode::Shutdown,
        Opcode::ConsoleMessage,
        Opcode::GenForecast,
        Opcode::GenPdlReport,
        Opcode::GenExpire,
        Opcode::IntakeSync,
        Opcode::IntakePdl,
        Opcode::AnalystIntervene,
        Opcode::PollStart,
        Opcode::PollStop,
        Opcode::PollRun,
    ];

    /// Opcodes of tasks that a timeline chains for itself.
    pub const DELAYED_TIMELINE: [Opcode; 3] =
        [Opcode::GenForecast, Opcode::GenPdlReport, Opcode::GenExpire];

    pub fn code(self) -> i32 {
        match self {
            Opcode::NoOp => 1,
            Opcode::Shutdown => 2,
            Opcode::ConsoleMessage => 3,
            Opcode::GenForecast => 4,
            Opcode::GenPdlReport => 5,
            Opcode::GenExpire => 6,
            Opcode::IntakeSync => 7,
            Opcode::IntakePdl => 8,
            Opcode::AnalystIntervene => 9,
            Opcode::PollStart => 11,
            Opcode::PollStop => 12,
            Opcode::PollRun => 13,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Opcode::NoOp => "OPCODE_NO_OP",
            Opcode::Shutdown => "OPCODE_SHUTDOWN",
            Opcode::ConsoleMessage => "OPCODE_CON_MESSAGE",
            Opcode::GenForecast => "OPCODE_GEN_FORECAST",
            Opcode::GenPdlReport => "OPCODE_GEN_PDL_REPORT",
            Opcode::GenExpire => "OPCODE_GEN_EXPIRE",
            Opcode::IntakeSync => "OPCODE_INTAKE_SYNC",
            Opcode::IntakePdl => "OPCODE_INTAKE_PDL",
            Opcode::AnalystIntervene => "OPCODE_ANALYST_INTERVENE",
            Opcode::PollStart => "OPCODE_POLL_START",
            Opcode::PollStop => "OPCODE_POLL_STOP",
            Opcode::PollRun => "OPCODE_POLL_RUN",
        }
    }
}

/// Display name for a raw opcode, including ones no handler knows.
pub fn opcode_name(code: i32) -> String {
    match Opcode::from_code(code) {
        Some(op) => op.as_str().to_string(),
        None => format!("OPCODE_UNKNOWN({code})"),
    }
}

/// A task as stored in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTask {
    /// Idempotency key, stable across stage and restart.
    pub record_key: String,
    pub event_id: String,
    /// Original earliest execution instant; base for retry arithmetic.
    pub sched_time: i64,
    /// Current eligibility instant; moves when the task is staged.
    pub exec_time: i64,
    pub submit_time: i64,
    pub submit_id: String,
    pub opcode: i32,
    pub stage: i32,
    /// Opaque JSON payload.
    pub details: String,
    pub active: bool,
    /// Activations since the task was submitted or last staged.
    pub attempt: u32,
    /// Dispatcher holding the current activation.
    pub owner: Option<String>,
    /// True-time instant after which another dispatcher may take the activation over.
    pub lease_until: i64,
}

impl PendingTask {
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_code(self.opcode)
    }

    /// Left active by an earlier activation that never disposed of it.
    pub fn is_restarted(&self) -> bool {
        self.attempt > 1
    }

    pub fn summary(&self) -> String {
        format!(
            "{} event={} exec={} stage={} attempt={} key={}",
            opcode_name(self.opcode),
            self.event_id,
            self.exec_time,
            self.stage,
            self.attempt,
            self.record_key
        )
    }
}

/// A task about to be submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub record_key: String,
    pub event_id: String,
    pub sched_time: i64,
    pub submit_time: i64,
    pub submit_id: String,
    pub opcode: i32,
    pub stage: i32,
    pub details: String,
}

impl NewTask {
    /// New task with a random key and an empty payload.
    pub fn new(
        event_id: impl Into<String>,
        opcode: Opcode,
        sched_time: i64,
        submit_time: i64,
        submit_id: impl Into<String>,
    ) -> Self {
        Self {
            record_key: uuid::Uuid::new_v4().simple().to_string(),
            event_id: event_id.into(),
            sched_time,
            submit_time,
            submit_id: submit_id.into(),
            opcode: opcode.code(),
            stage: 0,
            details: "{}".into(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.record_key = key.into();
        self
    }

    pub fn with_stage(mut self, stage: i32) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = details;
        self
    }

    /// Waiting task as it will sit in the queue.
    pub fn into_pending(self) -> PendingTask {
        PendingTask {
            record_key: self.record_key,
            event_id: self.event_id,
            sched_time: self.sched_time,
            exec_time: self.sched_time,
            submit_time: self.submit_time,
            submit_id: self.submit_id,
            opcode: self.opcode,
            stage: self.stage,
            details: self.details,
            active: false,
            attempt: 0,
            owner: None,
            lease_until: 0,
        }
    }
}

/// Deterministic key for a follow-up task, so a re-run parent re-creates the same child.
pub fn derive_key(parent_key: &str, tag: &str) -> String {
    let digest = Sha256::digest(format!("{parent_key}/{tag}").as_bytes());
    digest.iter().take(16).map(|b| format!("{b:02x}")).collect()
}
