//! Assignment lifecycle state machine.
//!
//! ```text
//! unassigned  --[parent: assign]-->   assigned
//! assigned    --[child: start]-->     in_progress
//! in_progress --[child: submit]-->    need_verify
//! need_verify --[parent: verify]-->   completed     (settles the reward)
//! need_verify --[parent: reject]-->   in_progress   (progress kept)
//! assigned | in_progress --[either: giveup]--> giveup
//! any         --[parent: unassign]--> unassigned    (progress reset, payout kept)
//! non-terminal --[system: miss]-->    missed        (due date elapsed, enforcement on)
//! ```
//!
//! Every request names the status the caller believes is current. A mismatch
//! is a [`Error::StateConflict`], which is what keeps a second `verify` from
//! paying twice.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{Assignment, Status};
use crate::settlement::{self, Settlement};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Assign,
    Start,
    Submit,
    Verify,
    Reject,
    Giveup,
    Unassign,
    Miss,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Assign,
        Action::Start,
        Action::Submit,
        Action::Verify,
        Action::Reject,
        Action::Giveup,
        Action::Unassign,
        Action::Miss,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Assign => "assign",
            Action::Start => "start",
            Action::Submit => "submit",
            Action::Verify => "verify",
            Action::Reject => "reject",
            Action::Giveup => "giveup",
            Action::Unassign => "unassign",
            Action::Miss => "miss",
        }
    }

    /// Roles allowed to issue this action.
    pub fn permitted_roles(self) -> &'static [Role] {
        match self {
            Action::Assign | Action::Verify | Action::Reject | Action::Unassign => &[Role::Parent],
            Action::Start | Action::Submit => &[Role::Child],
            Action::Giveup => &[Role::Child, Role::Parent],
            Action::Miss => &[Role::System],
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == normalized)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown action '{}'", value.trim())))
    }
}

/// Who is driving a transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Supervising party.
    Parent,
    /// Performing party.
    Child,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Parent => "parent",
            Role::Child => "child",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "parent" => Ok(Role::Parent),
            "child" => Ok(Role::Child),
            "system" => Ok(Role::System),
            other => Err(Error::InvalidArgument(format!(
                "unknown role '{other}' (expected parent|child|system)"
            ))),
        }
    }
}

/// A transition request as it travels to the record service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransitionRequest {
    pub assignment_id: String,
    pub action: Action,
    pub expected_status: Status,
    pub role: Role,
}

impl TransitionRequest {
    pub fn new(
        assignment_id: impl Into<String>,
        action: Action,
        expected_status: Status,
        role: Role,
    ) -> Self {
        Self {
            assignment_id: assignment_id.into(),
            action,
            expected_status,
            role,
        }
    }
}

/// The decision for one edge of the table.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Transition {
    pub action: Action,
    pub from: Status,
    pub to: Status,
    /// Entering `completed` through `verify`.
    pub settles: bool,
    pub resets_progress: bool,
}

/// Look up the edge for `action` leaving `from`.
pub fn plan(from: Status, action: Action) -> Result<Transition> {
    let to = match (from, action) {
        (Status::Unassigned, Action::Assign) => Status::Assigned,
        (Status::Assigned, Action::Start) => Status::InProgress,
        (Status::InProgress, Action::Submit) => Status::NeedVerify,
        (Status::NeedVerify, Action::Verify) => Status::Completed,
        (Status::NeedVerify, Action::Reject) => Status::InProgress,
        (Status::Assigned | Status::InProgress, Action::Giveup) => Status::Giveup,
        (_, Action::Unassign) => Status::Unassigned,
        (status, Action::Miss) if !status.is_terminal() => Status::Missed,
        _ => {
            return Err(Error::InvalidTransition {
                action: action.to_string(),
                from,
            })
        }
    };

    Ok(Transition {
        action,
        from,
        to,
        settles: action == Action::Verify,
        resets_progress: action == Action::Unassign,
    })
}

pub fn check_role(action: Action, role: Role) -> Result<()> {
    if action.permitted_roles().contains(&role) {
        Ok(())
    } else {
        Err(Error::RoleNotPermitted {
            action: action.to_string(),
            role: role.to_string(),
        })
    }
}

/// Local validation of a request against its own expected status.
///
/// Runs before anything is sent so table violations never cost a round trip.
pub fn validate(request: &TransitionRequest) -> Result<Transition> {
    if request.assignment_id.trim().is_empty() {
        return Err(Error::InvalidArgument(
            "assignment id cannot be empty".to_string(),
        ));
    }
    check_role(request.action, request.role)?;
    plan(request.expected_status, request.action)
}

/// Switches that change how transitions are applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleOptions {
    pub enforce_due_dates: bool,
}

/// Result of applying a transition to the authoritative record.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub transition: Transition,
    pub settlement: Option<Settlement>,
}

/// Guard and apply a transition to the stored record.
///
/// This is the authoritative path: the record service runs it under its own
/// lock so the expected-status check and the settlement happen as one step.
pub fn apply(
    record: &mut Assignment,
    request: &TransitionRequest,
    options: LifecycleOptions,
    now: DateTime<Utc>,
) -> Result<Applied> {
    check_role(request.action, request.role)?;
    if record.status != request.expected_status {
        return Err(Error::StateConflict {
            assignment_id: record.id.clone(),
            expected: request.expected_status,
            actual: record.status,
        });
    }
    let transition = plan(record.status, request.action)?;

    if request.action == Action::Miss {
        if !options.enforce_due_dates {
            return Err(Error::InvalidArgument(
                "due date enforcement is disabled".to_string(),
            ));
        }
        if !record.is_overdue(now) {
            return Err(Error::InvalidArgument(format!(
                "assignment {} is not past its due date",
                record.id
            )));
        }
    }

    let settlement = if transition.settles {
        settlement::settle(record, now)
    } else {
        None
    };

    advance(record, &transition, now);
    Ok(Applied {
        transition,
        settlement,
    })
}

/// Status-only preview used for optimistic patches.
///
/// Never touches `reward_paid`; a payout only becomes visible once the record
/// service acknowledges the transition.
pub fn preview(record: &Assignment, action: Action, now: DateTime<Utc>) -> Result<Assignment> {
    let transition = plan(record.status, action)?;
    let mut next = record.clone();
    advance(&mut next, &transition, now);
    Ok(next)
}

fn advance(record: &mut Assignment, transition: &Transition, now: DateTime<Utc>) {
    record.status = transition.to;
    record.updated_at = now;
    match transition.action {
        Action::Assign => {
            record.assigned_at = Some(now);
            record.progress = Some(0);
        }
        Action::Verify => {
            record.completed_at = Some(now);
        }
        Action::Unassign => {
            record.assigned_at = None;
        }
        Action::Start | Action::Submit | Action::Reject | Action::Giveup | Action::Miss => {}
    }
    if transition.resets_progress {
        record.progress = Some(0);
    }
}

/// Assignments the system should mark as missed.
pub fn overdue<'a>(
    records: impl IntoIterator<Item = &'a Assignment>,
    now: DateTime<Utc>,
) -> Vec<&'a Assignment> {
    records
        .into_iter()
        .filter(|record| !record.status.is_terminal() && record.is_overdue(now))
        .collect()
}
