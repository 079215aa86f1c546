//! JDWP-backed debug session.
//!
//! The subject JVM is started with `server=n,suspend=y` and connects back to a
//! listener bound on an ephemeral loopback port. Once attached, the session
//! waits for the test class to load, places one breakpoint at the first line of
//! every armed test method, and single-steps over lines until control leaves
//! the method.

use super::{Launcher, PointHandler, ProgramPoint, Session, SessionError};
use crate::jdwp::event::kind;
use crate::jdwp::{
    name_to_signature, Connection, ErrorCode, Event, JdwpError, Location, MethodId,
    ReferenceTypeId, RequestId, ThreadId, Vm,
};
use crate::observer::ObserveError;
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// How to start and supervise a subject JVM.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    /// The `java` executable
    pub java: PathBuf,
    /// Class path handed to the subject, including test and production classes
    pub class_path: String,
    /// Main class that runs a single test class given as its argument
    pub test_runner: String,
    /// Extra JVM options placed before the main class
    pub jvm_options: Vec<String>,
    /// Working directory of the subject process
    pub working_dir: PathBuf,
    /// Forward the subject's stdout and stderr to ours
    pub show_output: bool,
    /// How long to wait for the subject to attach
    pub connect_timeout: Duration,
    /// How long to wait for a reply to a single command
    pub reply_timeout: Duration,
    /// How long the subject may run without producing an event
    pub idle_timeout: Duration,
    /// Granularity of the event wait
    pub poll_interval: Duration,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            java: PathBuf::from("java"),
            class_path: String::new(),
            test_runner: "org.junit.runner.JUnitCore".to_string(),
            jvm_options: Vec::new(),
            working_dir: PathBuf::from("."),
            show_output: false,
            connect_timeout: Duration::from_secs(30),
            reply_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Launches one subject JVM per test class.
#[derive(Debug, Clone)]
pub struct DebugLauncher {
    settings: LaunchSettings,
}

impl DebugLauncher {
    pub fn new(settings: LaunchSettings) -> Self {
        Self { settings }
    }
}

impl Launcher for DebugLauncher {
    type Session = DebugSession;

    fn open(&self, test_class: &str) -> Result<DebugSession, SessionError> {
        DebugSession::launch(&self.settings, test_class)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Launched,
    ArmedBreakpoints,
    Stepping,
    Disconnected,
}

pub struct DebugSession {
    class: String,
    vm: Option<Vm>,
    child: Option<Child>,
    armed: Vec<String>,
    state: SessionState,
    idle_timeout: Duration,
    poll_interval: Duration,
}

impl DebugSession {
    /// Start the subject JVM for `class` and attach to it.
    pub fn launch(settings: &LaunchSettings, class: &str) -> Result<Self, SessionError> {
        let launch_failed = |reason: String| SessionError::LaunchFailed {
            class: class.to_string(),
            reason,
        };

        let listener = TcpListener::bind(("127.0.0.1", 0))
            .map_err(|e| launch_failed(format!("cannot open debug port: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| launch_failed(format!("cannot read debug port: {e}")))?
            .port();

        let (stdout, stderr) = if settings.show_output {
            (Stdio::inherit(), Stdio::inherit())
        } else {
            (Stdio::null(), Stdio::null())
        };

        let mut command = Command::new(&settings.java);
        command
            .arg(format!(
                "-agentlib:jdwp=transport=dt_socket,server=n,suspend=y,address=127.0.0.1:{port}"
            ))
            .args(&settings.jvm_options)
            .arg("-classpath")
            .arg(&settings.class_path)
            .arg(&settings.test_runner)
            .arg(class)
            .current_dir(&settings.working_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        tracing::debug!("Launching subject: {:?}", command);
        let mut child = command.spawn().map_err(|e| {
            launch_failed(format!("cannot start {}: {e}", settings.java.display()))
        })?;

        let attached = accept_subject(&listener, &mut child, settings.connect_timeout)
            .and_then(|stream| {
                Connection::establish(stream, settings.reply_timeout).map_err(|e| e.to_string())
            })
            .and_then(|conn| Vm::new(conn).map_err(|e| e.to_string()));

        match attached {
            Ok(vm) => {
                tracing::info!("Attached to subject for {} on port {}", class, port);
                Ok(Self::attached(class, vm, Some(child), settings))
            }
            Err(reason) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(launch_failed(reason))
            }
        }
    }

    pub(crate) fn attached(
        class: &str,
        vm: Vm,
        child: Option<Child>,
        settings: &LaunchSettings,
    ) -> Self {
        Self {
            class: class.to_string(),
            vm: Some(vm),
            child,
            armed: Vec::new(),
            state: SessionState::Launched,
            idle_timeout: settings.idle_timeout,
            poll_interval: settings.poll_interval,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
}

fn accept_subject(
    listener: &TcpListener,
    child: &mut Child,
    timeout: Duration,
) -> Result<TcpStream, String> {
    listener
        .set_nonblocking(true)
        .map_err(|e| format!("cannot poll debug port: {e}"))?;
    let deadline = Instant::now() + timeout;

    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                stream
                    .set_nonblocking(false)
                    .map_err(|e| format!("cannot configure debug socket: {e}"))?;
                return Ok(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(format!("subject exited with {status} before attaching"));
                }
                if Instant::now() >= deadline {
                    return Err(format!("subject did not attach within {timeout:?}"));
                }
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => return Err(format!("accept failed: {e}")),
        }
    }
}

/// Why the event loop stopped before the subject exited.
enum Stop {
    Jdwp(JdwpError),
    Observe(ObserveError),
    Hung,
}

impl From<JdwpError> for Stop {
    fn from(e: JdwpError) -> Self {
        Stop::Jdwp(e)
    }
}

impl From<ObserveError> for Stop {
    fn from(e: ObserveError) -> Self {
        Stop::Observe(e)
    }
}

/// Event-loop state for one run.
struct Stepper<'a> {
    vm: &'a mut Vm,
    class_signature: String,
    armed: &'a [String],
    state: &'a mut SessionState,
    breakpoints: HashMap<RequestId, String>,
    placed: HashSet<String>,
    hit: HashSet<String>,
    current: Option<(ReferenceTypeId, MethodId)>,
    step: Option<RequestId>,
}

impl Stepper<'_> {
    fn drive(
        &mut self,
        idle_timeout: Duration,
        poll_interval: Duration,
        on_point: &mut PointHandler<'_, Vm>,
    ) -> Result<(), Stop> {
        let class_name = crate::jdwp::signature_to_name(&self.class_signature);
        self.vm.set_class_prepare(&class_name)?;
        for (type_tag, type_id) in self.vm.classes_by_signature(&self.class_signature)? {
            self.place_breakpoints(type_tag, type_id)?;
        }

        let mut last_event = Instant::now();
        loop {
            let Some(set) = self.vm.next_event_set(poll_interval)? else {
                if last_event.elapsed() >= idle_timeout {
                    return Err(Stop::Hung);
                }
                continue;
            };
            last_event = Instant::now();

            for event in &set.events {
                match event {
                    Event::ClassPrepare {
                        type_tag,
                        type_id,
                        signature,
                        ..
                    } if *signature == self.class_signature => {
                        self.place_breakpoints(*type_tag, *type_id)?;
                    }
                    Event::Breakpoint {
                        request_id,
                        thread,
                        location,
                    } => self.enter_method(*request_id, *thread, *location, on_point)?,
                    Event::SingleStep {
                        thread, location, ..
                    } => self.step_line(*thread, *location, on_point)?,
                    Event::VmDeath { .. } => return Ok(()),
                    _ => {}
                }
            }

            if set.suspends() {
                self.vm.resume()?;
            }
        }
    }

    fn place_breakpoints(&mut self, type_tag: u8, type_id: ReferenceTypeId) -> Result<(), Stop> {
        for method in self.vm.methods(type_id)? {
            if !self.armed.contains(&method.name) {
                continue;
            }
            let table = match self.vm.line_table(type_id, method.id) {
                Ok(table) => table,
                Err(JdwpError::Reply { code, .. }) if code == ErrorCode::ABSENT_INFORMATION => {
                    tracing::warn!("No line information for {}, skipping", method.name);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let Some(index) = table.first_index() else {
                continue;
            };

            let location = Location {
                type_tag,
                class: type_id,
                method: method.id,
                index,
            };
            let request = self.vm.set_breakpoint(&location)?;
            tracing::debug!("Breakpoint {} placed on {}", request, method.name);
            self.breakpoints.insert(request, method.name.clone());
            self.placed.insert(method.name);
        }
        if !self.breakpoints.is_empty() {
            *self.state = SessionState::ArmedBreakpoints;
        }
        Ok(())
    }

    fn enter_method(
        &mut self,
        request: RequestId,
        thread: ThreadId,
        location: Location,
        on_point: &mut PointHandler<'_, Vm>,
    ) -> Result<(), Stop> {
        let Some(method) = self.breakpoints.remove(&request) else {
            return Ok(());
        };
        self.vm.clear_request(kind::BREAKPOINT, request)?;
        tracing::debug!("Entered test method {}", method);
        self.hit.insert(method);

        self.current = Some((location.class, location.method));
        if let Some(step) = self.step.take() {
            self.vm.clear_request(kind::SINGLE_STEP, step)?;
        }
        self.step = Some(self.vm.set_step(thread)?);
        *self.state = SessionState::Stepping;

        self.observe(thread, location, on_point)
    }

    fn step_line(
        &mut self,
        thread: ThreadId,
        location: Location,
        on_point: &mut PointHandler<'_, Vm>,
    ) -> Result<(), Stop> {
        if self.current == Some((location.class, location.method)) {
            return self.observe(thread, location, on_point);
        }

        // Control left the traced method.
        if let Some(step) = self.step.take() {
            self.vm.clear_request(kind::SINGLE_STEP, step)?;
        }
        self.current = None;
        *self.state = SessionState::ArmedBreakpoints;
        Ok(())
    }

    fn observe(
        &mut self,
        thread: ThreadId,
        location: Location,
        on_point: &mut PointHandler<'_, Vm>,
    ) -> Result<(), Stop> {
        let table = self.vm.line_table(location.class, location.method)?;
        let Some(line) = table.line_at(location.index) else {
            return Ok(());
        };
        let Some((frame, _)) = self.vm.frames(thread, 0, 1)?.first().copied() else {
            return Ok(());
        };

        let point = ProgramPoint {
            thread,
            frame,
            location,
            line,
        };
        on_point(&mut *self.vm, &point)?;
        Ok(())
    }

    /// Armed methods whose breakpoint never fired.
    fn unreached(&self) -> usize {
        self.armed
            .iter()
            .filter(|m| !self.hit.contains(m.as_str()))
            .count()
    }
}

impl Session for DebugSession {
    type Subject = Vm;

    fn arm_breakpoint(&mut self, method: &str) {
        if !self.armed.iter().any(|m| m == method) {
            self.armed.push(method.to_string());
        }
    }

    fn run(&mut self, on_point: &mut PointHandler<'_, Vm>) -> Result<(), SessionError> {
        let class = self.class.clone();
        let Some(vm) = self.vm.as_mut() else {
            return Err(SessionError::ProtocolDisconnected {
                class,
                pending: self.armed.len(),
            });
        };

        let mut stepper = Stepper {
            vm,
            class_signature: name_to_signature(&self.class),
            armed: &self.armed,
            state: &mut self.state,
            breakpoints: HashMap::new(),
            placed: HashSet::new(),
            hit: HashSet::new(),
            current: None,
            step: None,
        };
        let outcome = stepper.drive(self.idle_timeout, self.poll_interval, on_point);
        let pending = stepper.unreached();
        let never_placed = self.armed.len() - stepper.placed.len().min(self.armed.len());

        match outcome {
            Ok(())
            | Err(Stop::Jdwp(JdwpError::Disconnected))
            | Err(Stop::Jdwp(JdwpError::Reply {
                code: ErrorCode::VM_DEAD,
                ..
            })) => {
                self.state = SessionState::Disconnected;
                if pending == 0 {
                    tracing::debug!("Subject for {} exited", class);
                    Ok(())
                } else {
                    if never_placed > 0 {
                        tracing::debug!(
                            "{} armed method(s) of {} never received a breakpoint",
                            never_placed,
                            class
                        );
                    }
                    Err(SessionError::ProtocolDisconnected { class, pending })
                }
            }
            Err(Stop::Hung) => {
                tracing::warn!("Subject for {} is unresponsive, terminating", class);
                self.close();
                Err(SessionError::Hung {
                    class,
                    idle: self.idle_timeout,
                })
            }
            Err(Stop::Jdwp(source)) => Err(SessionError::Protocol { class, source }),
            Err(Stop::Observe(source)) => Err(SessionError::StructuralReadFailed { class, source }),
        }
    }

    fn close(&mut self) {
        if let Some(mut vm) = self.vm.take() {
            if self.state != SessionState::Disconnected {
                if let Err(e) = vm.exit(0) {
                    tracing::debug!("Exit request for {} failed: {}", self.class, e);
                }
            }
            vm.shutdown();
        }
        if let Some(mut child) = self.child.take() {
            if !matches!(child.try_wait(), Ok(Some(_))) {
                let _ = child.kill();
            }
            let _ = child.wait();
        }
        self.state = SessionState::Disconnected;
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jdwp::event::{kind, suspend};
    use crate::jdwp::packet::{CommandPacket, IdSizes, Packet, PacketWriter, ReplyPacket};
    use std::io::{Read, Write};
    use std::sync::{Arc, Mutex};
    use std::thread;

    const TEST_CLASS: ReferenceTypeId = 50;
    const TEST_METHOD: MethodId = 100;

    fn writer() -> PacketWriter {
        PacketWriter::new(IdSizes::default())
    }

    fn loc(class: ReferenceTypeId, method: MethodId, index: u64) -> Location {
        Location {
            type_tag: 1,
            class,
            method,
            index,
        }
    }

    fn event(policy: u8, body: PacketWriter) -> Vec<u8> {
        let mut data = writer().u8(policy).i32(1).finish();
        data.extend(body.finish());
        CommandPacket {
            id: 0,
            command_set: 64,
            command: 100,
            data,
        }
        .encode()
    }

    fn vm_start() -> Vec<u8> {
        event(suspend::ALL, writer().u8(kind::VM_START).i32(0).object_id(1))
    }

    fn class_prepare() -> Vec<u8> {
        event(
            suspend::ALL,
            writer()
                .u8(kind::CLASS_PREPARE)
                .i32(1)
                .object_id(1)
                .u8(1)
                .reference_type_id(TEST_CLASS)
                .string("Lbank/BankTest;")
                .i32(7),
        )
    }

    fn breakpoint(request: i32, at: Location) -> Vec<u8> {
        event(
            suspend::ALL,
            writer().u8(kind::BREAKPOINT).i32(request).object_id(1).location(&at),
        )
    }

    fn step(request: i32, at: Location) -> Vec<u8> {
        event(
            suspend::ALL,
            writer().u8(kind::SINGLE_STEP).i32(request).object_id(1).location(&at),
        )
    }

    fn vm_death() -> Vec<u8> {
        event(suspend::NONE, writer().u8(kind::VM_DEATH).i32(0))
    }

    /// Scripted subject: the first event is sent after the handshake, each
    /// following one after a resume. Returns the commands it received.
    fn fake_subject(
        events: Vec<Vec<u8>>,
    ) -> (TcpStream, thread::JoinHandle<()>, Arc<Mutex<Vec<(u8, u8)>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let server_log = Arc::clone(&log);

        let handle = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut hs = [0u8; 14];
            socket.read_exact(&mut hs).unwrap();
            socket.write_all(&hs).unwrap();

            let mut events = events.into_iter();
            if let Some(first) = events.next() {
                socket.write_all(&first).unwrap();
            }
            let mut next_request = 1;

            while let Ok(Packet::Command(cmd)) = Packet::read_from(&mut socket) {
                server_log.lock().unwrap().push((cmd.command_set, cmd.command));
                let data = match (cmd.command_set, cmd.command) {
                    (1, 7) => writer().i32(8).i32(8).i32(8).i32(8).i32(8).finish(),
                    (1, 2) => writer().i32(0).finish(),
                    (15, 1) => {
                        next_request += 1;
                        writer().i32(next_request - 1).finish()
                    }
                    (2, 5) => writer()
                        .i32(2)
                        .method_id(TEST_METHOD)
                        .string("testA")
                        .string("()V")
                        .i32(1)
                        .method_id(101)
                        .string("helper")
                        .string("()V")
                        .i32(1)
                        .finish(),
                    (6, 1) => writer()
                        .u64(0)
                        .u64(20)
                        .i32(3)
                        .u64(0)
                        .i32(10)
                        .u64(5)
                        .i32(11)
                        .u64(9)
                        .i32(12)
                        .finish(),
                    (11, 6) => writer()
                        .i32(1)
                        .frame_id(7)
                        .location(&loc(TEST_CLASS, TEST_METHOD, 0))
                        .finish(),
                    _ => Vec::new(),
                };
                let reply = ReplyPacket {
                    id: cmd.id,
                    error_code: 0,
                    data,
                };
                if socket.write_all(&reply.encode()).is_err() {
                    break;
                }
                if (cmd.command_set, cmd.command) == (1, 9) {
                    if let Some(next) = events.next() {
                        let _ = socket.write_all(&next);
                    }
                }
            }
        });

        let client = TcpStream::connect(addr).unwrap();
        (client, handle, log)
    }

    fn session_for(client: TcpStream, idle: Duration) -> DebugSession {
        let conn = Connection::establish(client, Duration::from_secs(5)).unwrap();
        let vm = Vm::new(conn).unwrap();
        let settings = LaunchSettings {
            idle_timeout: idle,
            poll_interval: Duration::from_millis(10),
            ..LaunchSettings::default()
        };
        DebugSession::attached("bank.BankTest", vm, None, &settings)
    }

    #[test]
    fn test_steps_through_armed_method() {
        let (client, server, log) = fake_subject(vec![
            vm_start(),
            class_prepare(),
            breakpoint(2, loc(TEST_CLASS, TEST_METHOD, 0)),
            step(3, loc(TEST_CLASS, TEST_METHOD, 5)),
            step(3, loc(TEST_CLASS, TEST_METHOD, 9)),
            step(3, loc(60, 200, 3)),
            vm_death(),
        ]);

        let mut session = session_for(client, Duration::from_secs(5));
        session.arm_breakpoint("testA");

        let mut lines = Vec::new();
        let result = session.run(&mut |_vm: &mut Vm, point: &ProgramPoint| {
            lines.push(point.line);
            assert_eq!(point.frame, 7);
            Ok(())
        });

        assert!(result.is_ok(), "{result:?}");
        assert_eq!(lines, vec![10, 11, 12]);
        assert_eq!(session.state(), SessionState::Disconnected);

        session.close();
        server.join().unwrap();
        let log = log.lock().unwrap();
        // breakpoint cleared on hit, step cleared on leaving the method
        assert_eq!(log.iter().filter(|c| **c == (15, 2)).count(), 2);
    }

    #[test]
    fn test_unreached_method_reports_disconnect() {
        let (client, server, _log) = fake_subject(vec![
            vm_start(),
            class_prepare(),
            breakpoint(2, loc(TEST_CLASS, TEST_METHOD, 0)),
            vm_death(),
        ]);

        let mut session = session_for(client, Duration::from_secs(5));
        session.arm_breakpoint("testA");
        session.arm_breakpoint("testMissing");

        let result = session.run(&mut |_vm: &mut Vm, _point: &ProgramPoint| Ok(()));
        match result {
            Err(SessionError::ProtocolDisconnected { pending, .. }) => assert_eq!(pending, 1),
            other => panic!("unexpected outcome {other:?}"),
        }

        session.close();
        server.join().unwrap();
    }

    #[test]
    fn test_silent_subject_is_hung() {
        let (client, server, log) = fake_subject(vec![vm_start()]);

        let mut session = session_for(client, Duration::from_millis(200));
        session.arm_breakpoint("testA");

        let result = session.run(&mut |_vm: &mut Vm, _point: &ProgramPoint| Ok(()));
        assert!(matches!(result, Err(SessionError::Hung { .. })));
        assert_eq!(session.state(), SessionState::Disconnected);

        server.join().unwrap();
        assert!(log.lock().unwrap().contains(&(1, 10)));
    }

    #[test]
    fn test_structural_failure_stops_run() {
        let (client, server, _log) = fake_subject(vec![
            vm_start(),
            class_prepare(),
            breakpoint(2, loc(TEST_CLASS, TEST_METHOD, 0)),
        ]);

        let mut session = session_for(client, Duration::from_secs(5));
        session.arm_breakpoint("testA");

        let result = session.run(&mut |_vm: &mut Vm, point: &ProgramPoint| {
            Err(ObserveError::StructuralReadFailed {
                line: point.line,
                source: JdwpError::Reply {
                    command_set: 6,
                    command: 2,
                    code: ErrorCode::ABSENT_INFORMATION,
                },
            })
        });
        assert!(matches!(
            result,
            Err(SessionError::StructuralReadFailed { .. })
        ));

        session.close();
        server.join().unwrap();
    }
}
