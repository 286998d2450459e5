//! Hook event definitions

use crate::error::LifecacheError;
use crate::resource::StreamOptions;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// Event names, used to subscribe to one kind of event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Ready,
    CheckFail,
    Error,
    BeforeGetData,
    AfterGetData,
    BeforeSetData,
    AfterSetData,
    BeforeGetChild,
    AfterGetChild,
    BeforeSetChild,
    AfterSetChild,
    BeforeGetStream,
    AfterGetStream,
    BeforeSetStream,
    AfterSetStream,
    BeforeCreate,
    AfterCreate,
    BeforeDestroy,
    AfterDestroy,
    BeforeMove,
    AfterMove,
    BeforeRelease,
    AfterRelease,
    BeforeExecute,
    AfterExecute,
    BeforeScan,
    AfterScan,
    ExtendLife,
}

impl HookKind {
    pub fn name(&self) -> &'static str {
        match self {
            HookKind::Ready => "ready",
            HookKind::CheckFail => "checkfail",
            HookKind::Error => "error",
            HookKind::BeforeGetData => "beforeGetData",
            HookKind::AfterGetData => "afterGetData",
            HookKind::BeforeSetData => "beforeSetData",
            HookKind::AfterSetData => "afterSetData",
            HookKind::BeforeGetChild => "beforeGetChild",
            HookKind::AfterGetChild => "afterGetChild",
            HookKind::BeforeSetChild => "beforeSetChild",
            HookKind::AfterSetChild => "afterSetChild",
            HookKind::BeforeGetStream => "beforeGetStream",
            HookKind::AfterGetStream => "afterGetStream",
            HookKind::BeforeSetStream => "beforeSetStream",
            HookKind::AfterSetStream => "afterSetStream",
            HookKind::BeforeCreate => "beforeCreate",
            HookKind::AfterCreate => "afterCreate",
            HookKind::BeforeDestroy => "beforeDestroy",
            HookKind::AfterDestroy => "afterDestroy",
            HookKind::BeforeMove => "beforeMove",
            HookKind::AfterMove => "afterMove",
            HookKind::BeforeRelease => "beforeRelease",
            HookKind::AfterRelease => "afterRelease",
            HookKind::BeforeExecute => "beforeExecute",
            HookKind::AfterExecute => "afterExecute",
            HookKind::BeforeScan => "beforeScan",
            HookKind::AfterScan => "afterScan",
            HookKind::ExtendLife => "extendLife",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A notification fired on an entity's hook bus
///
/// Payload-carrying variants hold what the operation was given (before) or
/// what it produced (after).
#[derive(Debug, Clone)]
pub enum HookEvent {
    Ready,
    CheckFail(Arc<LifecacheError>),
    Error(Arc<LifecacheError>),
    BeforeGetData { force: bool },
    AfterGetData(Value),
    BeforeSetData(Value),
    AfterSetData(Value),
    BeforeGetChild { name: String },
    AfterGetChild { name: String, child: Value },
    BeforeSetChild { name: String, value: Value },
    AfterSetChild { name: String, value: Value },
    BeforeGetStream(StreamOptions),
    AfterGetStream(StreamOptions),
    BeforeSetStream(StreamOptions),
    AfterSetStream(StreamOptions),
    BeforeCreate(Value),
    AfterCreate(Value),
    BeforeDestroy,
    AfterDestroy,
    BeforeMove { dest: String },
    AfterMove { dest: String },
    BeforeRelease,
    AfterRelease,
    BeforeExecute(Value),
    AfterExecute(Value),
    BeforeScan,
    AfterScan { visited: usize },
    ExtendLife { from: f64, by: f64 },
}

impl HookEvent {
    pub fn kind(&self) -> HookKind {
        match self {
            HookEvent::Ready => HookKind::Ready,
            HookEvent::CheckFail(_) => HookKind::CheckFail,
            HookEvent::Error(_) => HookKind::Error,
            HookEvent::BeforeGetData { .. } => HookKind::BeforeGetData,
            HookEvent::AfterGetData(_) => HookKind::AfterGetData,
            HookEvent::BeforeSetData(_) => HookKind::BeforeSetData,
            HookEvent::AfterSetData(_) => HookKind::AfterSetData,
            HookEvent::BeforeGetChild { .. } => HookKind::BeforeGetChild,
            HookEvent::AfterGetChild { .. } => HookKind::AfterGetChild,
            HookEvent::BeforeSetChild { .. } => HookKind::BeforeSetChild,
            HookEvent::AfterSetChild { .. } => HookKind::AfterSetChild,
            HookEvent::BeforeGetStream(_) => HookKind::BeforeGetStream,
            HookEvent::AfterGetStream(_) => HookKind::AfterGetStream,
            HookEvent::BeforeSetStream(_) => HookKind::BeforeSetStream,
            HookEvent::AfterSetStream(_) => HookKind::AfterSetStream,
            HookEvent::BeforeCreate(_) => HookKind::BeforeCreate,
            HookEvent::AfterCreate(_) => HookKind::AfterCreate,
            HookEvent::BeforeDestroy => HookKind::BeforeDestroy,
            HookEvent::AfterDestroy => HookKind::AfterDestroy,
            HookEvent::BeforeMove { .. } => HookKind::BeforeMove,
            HookEvent::AfterMove { .. } => HookKind::AfterMove,
            HookEvent::BeforeRelease => HookKind::BeforeRelease,
            HookEvent::AfterRelease => HookKind::AfterRelease,
            HookEvent::BeforeExecute(_) => HookKind::BeforeExecute,
            HookEvent::AfterExecute(_) => HookKind::AfterExecute,
            HookEvent::BeforeScan => HookKind::BeforeScan,
            HookEvent::AfterScan { .. } => HookKind::AfterScan,
            HookEvent::ExtendLife { .. } => HookKind::ExtendLife,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Event arguments as JSON, for logs and the audit trail
    pub fn details(&self) -> Value {
        match self {
            HookEvent::CheckFail(e) | HookEvent::Error(e) => json!({ "error": e.to_string() }),
            HookEvent::BeforeGetData { force } => json!({ "force": force }),
            HookEvent::AfterGetData(v)
            | HookEvent::BeforeSetData(v)
            | HookEvent::AfterSetData(v)
            | HookEvent::BeforeCreate(v)
            | HookEvent::AfterCreate(v)
            | HookEvent::BeforeExecute(v)
            | HookEvent::AfterExecute(v) => json!({ "value": v }),
            HookEvent::BeforeGetChild { name } => json!({ "name": name }),
            HookEvent::AfterGetChild { name, child } => json!({ "name": name, "value": child }),
            HookEvent::BeforeSetChild { name, value } | HookEvent::AfterSetChild { name, value } => {
                json!({ "name": name, "value": value })
            }
            HookEvent::BeforeGetStream(o)
            | HookEvent::AfterGetStream(o)
            | HookEvent::BeforeSetStream(o)
            | HookEvent::AfterSetStream(o) => json!({ "start": o.start, "end": o.end }),
            HookEvent::BeforeMove { dest } | HookEvent::AfterMove { dest } => {
                json!({ "dest": dest })
            }
            HookEvent::AfterScan { visited } => json!({ "visited": visited }),
            HookEvent::ExtendLife { from, by } => json!({ "from": from, "by": by }),
            HookEvent::Ready
            | HookEvent::BeforeDestroy
            | HookEvent::AfterDestroy
            | HookEvent::BeforeRelease
            | HookEvent::AfterRelease
            | HookEvent::BeforeScan => json!({}),
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Capability;

    #[test]
    fn names_match_wire_names() {
        assert_eq!(HookEvent::Ready.name(), "ready");
        assert_eq!(HookEvent::BeforeGetData { force: false }.name(), "beforeGetData");
        assert_eq!(HookEvent::AfterScan { visited: 2 }.name(), "afterScan");
        assert_eq!(
            HookEvent::ExtendLife { from: 1.0, by: 1.0 }.to_string(),
            "extendLife"
        );
    }

    #[test]
    fn details_carry_arguments() {
        let err = Arc::new(LifecacheError::not_implemented(Capability::Check));
        let details = HookEvent::CheckFail(err).details();
        assert_eq!(details["error"], "check not implemented by this entity");

        let details = HookEvent::AfterGetChild {
            name: "x".into(),
            child: json!(3),
        }
        .details();
        assert_eq!(details["name"], "x");
        assert_eq!(details["value"], 3);
    }
}
