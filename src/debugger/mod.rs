//! Debug sessions against a subject JVM.
//!
//! A [`Launcher`] opens one [`Session`] per test class. The session arms
//! breakpoints on test methods, single-steps through them, and hands every
//! stop to a callback together with a [`Subject`] that can read program state.

pub mod session;
mod subject;

pub use session::{DebugLauncher, DebugSession, LaunchSettings, SessionState};

use crate::jdwp::{FrameId, JdwpError, Location, MethodId, ObjectId, ReferenceTypeId, ThreadId, Value};
use crate::observer::ObserveError;
use std::time::Duration;
use thiserror::Error;

/// A suspended position in a test method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramPoint {
    pub thread: ThreadId,
    pub frame: FrameId,
    pub location: Location,
    /// 1-based source line of `location`.
    pub line: u32,
}

/// Runtime class of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeType {
    pub id: ReferenceTypeId,
    pub name: String,
}

/// A nullary, non-void instance method reachable on a runtime type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectorCandidate {
    pub declaring_type: ReferenceTypeId,
    pub declaring_name: String,
    pub method: MethodId,
    pub name: String,
}

impl InspectorCandidate {
    /// `package.Class.method`, the form inspector lists use.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.declaring_name, self.name)
    }
}

/// Read access to the state of a suspended subject.
pub trait Subject {
    /// Local variables visible at the point, excluding `this`.
    fn visible_variables(&mut self, point: &ProgramPoint) -> Result<Vec<(String, Value)>, JdwpError>;

    /// Instance fields of the executing test object, excluding synthetic ones.
    fn fixture_fields(&mut self, point: &ProgramPoint) -> Result<Vec<(String, Value)>, JdwpError>;

    fn runtime_type(&mut self, object: ObjectId) -> Result<RuntimeType, JdwpError>;

    /// Nullary, non-void instance methods of `ty` and its superclasses.
    fn inspector_candidates(&mut self, ty: &RuntimeType) -> Result<Vec<InspectorCandidate>, JdwpError>;

    /// Public instance fields of an object.
    fn public_fields(
        &mut self,
        object: ObjectId,
        ty: &RuntimeType,
    ) -> Result<Vec<(String, Value)>, JdwpError>;

    fn invoke(
        &mut self,
        point: &ProgramPoint,
        object: ObjectId,
        method: &InspectorCandidate,
    ) -> Result<Value, JdwpError>;

    fn string_value(&mut self, object: ObjectId) -> Result<String, JdwpError>;

    fn array_elements(&mut self, array: ObjectId) -> Result<Vec<Value>, JdwpError>;
}

/// Callback invoked at every program point a session stops at.
pub type PointHandler<'a, S> = dyn FnMut(&mut S, &ProgramPoint) -> Result<(), ObserveError> + 'a;

/// A debug session over one test class.
pub trait Session {
    type Subject: Subject;

    /// Register a test method whose execution should be traced.
    fn arm_breakpoint(&mut self, method: &str);

    /// Drive the subject until it exits, invoking `on_point` at every stop.
    fn run(&mut self, on_point: &mut PointHandler<'_, Self::Subject>) -> Result<(), SessionError>;

    /// Terminate the subject and release the connection. Safe to call twice.
    fn close(&mut self);
}

/// Opens sessions for test classes.
pub trait Launcher {
    type Session: Session;

    fn open(&self, test_class: &str) -> Result<Self::Session, SessionError>;
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to launch subject for {class}: {reason}")]
    LaunchFailed { class: String, reason: String },

    #[error("subject for {class} disconnected with {pending} armed breakpoint(s) never reached")]
    ProtocolDisconnected { class: String, pending: usize },

    #[error("subject for {class} produced no events for {idle:?}")]
    Hung { class: String, idle: Duration },

    #[error("cannot read program state of {class}: {source}")]
    StructuralReadFailed {
        class: String,
        #[source]
        source: ObserveError,
    },

    #[error("protocol error while debugging {class}: {source}")]
    Protocol {
        class: String,
        #[source]
        source: JdwpError,
    },
}
