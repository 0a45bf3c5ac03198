//! Result codes and task dispositions.
//!
//! A handler answers every task with a [`Disposition`]: delete it silently,
//! stage it to run again, or log a [`ResultCode`] and delete it.

use serde::{Deserialize, Serialize};

/// Outcome recorded in the task log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    Success,
    TaskCorrupt,
    TimelineCorrupt,
    TimelineNotFound,
    TimelineNotActive,
    TimelineTaskMismatch,
    TimelineComcatFail,
    TimelineWithdraw,
    TimelineForeshock,
    TimelineNotPdlPend,
    TimelinePdlFail,
    TimelineExists,
    TaskRetrySuccess,
    TimelineStateUpdate,
    IntakeComcatFail,
    TimelineAnalystSet,
    TimelineAnalystFail,
    TimelineAnalystNone,
    IntakeRejected,
}

impl ResultCode {
    pub const ALL: [ResultCode; 19] = [
        ResultCode::Success,
        ResultCode::TaskCorrupt,
        ResultCode::TimelineCorrupt,
        ResultCode::TimelineNotFound,
        ResultCode::TimelineNotActive,
        ResultCode::TimelineTaskMismatch,
        ResultCode::TimelineComcatFail,
        ResultCode::TimelineWithdraw,
        ResultCode::TimelineForeshock,
        ResultCode::TimelineNotPdlPend,
        ResultCode::TimelinePdlFail,
        ResultCode::TimelineExists,
        ResultCode::TaskRetrySuccess,
        ResultCode::TimelineStateUpdate,
        ResultCode::IntakeComcatFail,
        ResultCode::TimelineAnalystSet,
        ResultCode::TimelineAnalystFail,
        ResultCode::TimelineAnalystNone,
        ResultCode::IntakeRejected,
    ];

    pub fn code(self) -> i32 {
        match self {
            ResultCode::Success => 1,
            ResultCode::TaskCorrupt => 2,
            ResultCode::TimelineCorrupt => 3,
            ResultCode::TimelineNotFound => 4,
            ResultCode::TimelineNotActive => 5,
            ResultCode::TimelineTaskMismatch => 6,
            ResultCode::TimelineComcatFail => 7,
            ResultCode::TimelineWithdraw => 8,
            ResultCode::TimelineForeshock => 9,
            ResultCode::TimelineNotPdlPend => 10,
            ResultCode::TimelinePdlFail => 11,
            ResultCode::TimelineExists => 12,
            ResultCode::TaskRetrySuccess => 13,
            ResultCode::TimelineStateUpdate => 14,
            ResultCode::IntakeComcatFail => 15,
            ResultCode::TimelineAnalystSet => 16,
            ResultCode::TimelineAnalystFail => 17,
            ResultCode::TimelineAnalystNone => 18,
            ResultCode::IntakeRejected => 19,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|rc| rc.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::Success => "RESCODE_SUCCESS",
            ResultCode::TaskCorrupt => "RESCODE_TASK_CORRUPT",
            ResultCode::TimelineCorrupt => "RESCODE_TIMELINE_CORRUPT",
            ResultCode::TimelineNotFound => "RESCODE_TIMELINE_NOT_FOUND",
            ResultCode::TimelineNotActive => "RESCODE_TIMELINE_NOT_ACTIVE",
            ResultCode::TimelineTaskMismatch => "RESCODE_TIMELINE_TASK_MISMATCH",
            ResultCode::TimelineComcatFail => "RESCODE_TIMELINE_COMCAT_FAIL",
            ResultCode::TimelineWithdraw => "RESCODE_TIMELINE_WITHDRAW",
            ResultCode::TimelineForeshock => "RESCODE_TIMELINE_FORESHOCK",
            ResultCode::TimelineNotPdlPend => "RESCODE_TIMELINE_NOT_PDL_PEND",
            ResultCode::TimelinePdlFail => "RESCODE_TIMELINE_PDL_FAIL",
            ResultCode::TimelineExists => "RESCODE_TIMELINE_EXISTS",
            ResultCode::TaskRetrySuccess => "RESCODE_TASK_RETRY_SUCCESS",
            ResultCode::TimelineStateUpdate => "RESCODE_TIMELINE_STATE_UPDATE",
            ResultCode::IntakeComcatFail => "RESCODE_INTAKE_COMCAT_FAIL",
            ResultCode::TimelineAnalystSet => "RESCODE_TIMELINE_ANALYST_SET",
            ResultCode::TimelineAnalystFail => "RESCODE_TIMELINE_ANALYST_FAIL",
            ResultCode::TimelineAnalystNone => "RESCODE_TIMELINE_ANALYST_NONE",
            ResultCode::IntakeRejected => "RESCODE_INTAKE_REJECTED",
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the dispatcher does with a task once its handler returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Remove the task without logging.
    Delete,
    /// Put the task back in the queue to run again at `exec_time`.
    Stage { exec_time: i64, stage: i32 },
    /// Write a log entry, then remove the task.
    Log {
        code: ResultCode,
        log_time: i64,
        remark: String,
    },
}

impl Disposition {
    pub fn stage(exec_time: i64, stage: i32) -> Self {
        Disposition::Stage { exec_time, stage }
    }

    pub fn result_code(&self) -> Option<ResultCode> {
        match self {
            Disposition::Log { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_and_roundtrip() {
        let mut seen = std::collections::HashSet::new();
        for rc in ResultCode::ALL {
            assert!(seen.insert(rc.code()));
            assert_eq!(ResultCode::from_code(rc.code()), Some(rc));
        }
        assert_eq!(ResultCode::Success.code(), 1);
        assert_eq!(ResultCode::TimelineAnalystNone.code(), 18);
    }

    #[test]
    fn test_result_code_of_disposition() {
        assert_eq!(Disposition::Delete.result_code(), None);
        assert_eq!(Disposition::stage(5, 1).result_code(), None);
        let log = Disposition::Log {
            code: ResultCode::TimelineExists,
            log_time: 0,
            remark: String::new(),
        };
        assert_eq!(log.result_code(), Some(ResultCode::TimelineExists));
    }
}
