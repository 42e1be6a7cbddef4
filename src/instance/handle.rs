use std::{
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter},
    process::{self, Child},
    sync::{broadcast, mpsc},
    task::JoinHandle,
    time::timeout,
};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    command::CommandValidator,
    config::LauncherConfig,
    error::ServerError,
    stream::{InstanceEvent, StreamSource},
};

use super::InstanceStatus;

const STOP_COMMAND: &str = "stop";

// Output still buffered in the pipes after the process is reaped.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Result of handing a console command to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Queued for the server's stdin.
    Sent,
    /// Not part of the command grammar; nothing was written.
    Rejected,
    /// The server is not running; nothing was written.
    NotRunning,
}

/// Pipes and tasks belonging to one spawned server process.
#[derive(Debug)]
struct ServerProcess {
    child: Child,
    stdin_tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
    pumps: Vec<JoinHandle<()>>,
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Owns the dedicated server process: launch, console input, output
/// streaming and shutdown.
#[derive(Debug)]
pub struct ProcessSupervisor {
    executable: PathBuf,
    working_dir: PathBuf,
    join_timeout: Duration,
    validator: CommandValidator,
    status: InstanceStatus,
    events_tx: broadcast::Sender<InstanceEvent>,
    process: Option<ServerProcess>,
}

impl ProcessSupervisor {
    pub fn new_with_config(config: &LauncherConfig) -> Self {
        ProcessSupervisor::new_with_params(
            config.executable_path(),
            config.install_path(),
            config.join_timeout(),
        )
    }

    pub fn new_with_params(
        executable: PathBuf,
        working_dir: PathBuf,
        join_timeout: Duration,
    ) -> Self {
        // relative program paths resolve differently per platform once the
        // working directory changes
        let executable = std::path::absolute(&executable).unwrap_or(executable);

        Self {
            executable,
            working_dir,
            join_timeout,
            validator: CommandValidator::default(),
            status: InstanceStatus::NotStarted,
            events_tx: broadcast::Sender::new(2048),
            process: None,
        }
    }

    pub fn with_validator(mut self, validator: CommandValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Current state, picking up an exit that happened on its own.
    pub fn status(&mut self) -> InstanceStatus {
        if self.status.is_running() {
            let exited = self
                .process
                .as_mut()
                .and_then(|process| process.child.try_wait().ok().flatten());
            if let Some(exit) = exited {
                let code = exit_code(exit);
                info!("Server exited with code {}", code);
                self.transition_status(InstanceStatus::Exited(code));
            }
        }
        self.status
    }

    pub fn running(&mut self) -> bool {
        self.status().is_running()
    }

    /// Server output, launcher notices and state changes, in the order they
    /// were produced.
    pub fn subscribe(&self) -> BroadcastStream<InstanceEvent> {
        BroadcastStream::new(self.events_tx.subscribe())
    }

    pub fn start(&mut self) -> Result<(), ServerError> {
        match self.status {
            InstanceStatus::NotStarted => {}
            InstanceStatus::Running => return Err(ServerError::AlreadyRunning),
            InstanceStatus::Exited(_) => return Err(ServerError::Finished),
        }

        let command = self.build_start_command();
        let child = self.spawn_child_process(command)?;
        self.setup_stream_pumps(child)?;

        self.transition_status(InstanceStatus::Running);
        Ok(())
    }

    fn build_start_command(&self) -> process::Command {
        let mut command = process::Command::new(&self.executable);
        command
            .current_dir(&self.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::piped())
            .kill_on_drop(true);

        // the server ships its own shared libraries next to the binary
        #[cfg(target_os = "linux")]
        command.env("LD_LIBRARY_PATH", &self.working_dir);

        // keep terminal signals away from the server; shutdown goes via `stop`
        #[cfg(unix)]
        command.process_group(0);

        command
    }

    fn spawn_child_process(&self, mut command: process::Command) -> Result<Child, ServerError> {
        info!("Launching {}", self.executable.display());
        command.spawn().map_err(|source| ServerError::Launch {
            path: self.executable.clone(),
            source,
        })
    }

    fn setup_stream_pumps(&mut self, mut child: Child) -> Result<(), ServerError> {
        let stdout = child.stdout.take().ok_or(ServerError::NoStdoutPipe)?;
        let stderr = child.stderr.take().ok_or(ServerError::NoStderrPipe)?;
        let stdin = child.stdin.take().ok_or(ServerError::NoStdinPipe)?;

        let shutdown = CancellationToken::new();
        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(1024);

        let stdout_pump = spawn_line_pump(
            stdout,
            StreamSource::Stdout,
            self.events_tx.clone(),
            shutdown.clone(),
        );
        let stderr_pump = spawn_line_pump(
            stderr,
            StreamSource::Stderr,
            self.events_tx.clone(),
            shutdown.clone(),
        );

        let stdin_shutdown = shutdown.clone();
        let stdin_pump = tokio::spawn(async move {
            let mut writer = BufWriter::new(stdin);

            loop {
                tokio::select! {
                    _ = stdin_shutdown.cancelled() => {
                        break;
                    }
                    maybe_cmd = stdin_rx.recv() => {
                        let Some(cmd) = maybe_cmd else {
                            break;
                        };
                        if let Err(e) = writer.write_all(cmd.as_bytes()).await {
                            warn!("Failed to write to server stdin: {}", e);
                            break;
                        }
                        if let Err(e) = writer.flush().await {
                            warn!("Failed to flush server stdin: {}", e);
                            break;
                        }
                    }
                }
            }
        });

        self.process = Some(ServerProcess {
            child,
            stdin_tx,
            shutdown,
            pumps: vec![stdout_pump, stderr_pump, stdin_pump],
        });

        Ok(())
    }

    /// Forward a console command if the grammar allows it.
    ///
    /// Rejections are reported on the event stream and never reach the
    /// server.
    pub fn send_command<S: Into<String>>(&mut self, cmd: S) -> Result<CommandOutcome, ServerError> {
        let command = cmd.into();
        let command = command.trim_end_matches(['\r', '\n']);

        if !self.running() {
            let reason = match self.status {
                InstanceStatus::NotStarted => "Server has not been started",
                _ => "Server already exited",
            };
            warn!("{}, dropping '{}'", reason, command);
            self.notify(reason);
            return Ok(CommandOutcome::NotRunning);
        }

        if !self.validator.is_valid(command) {
            warn!("Invalid command: '{}'", command);
            self.notify(format!("Invalid command: '{command}'"));
            return Ok(CommandOutcome::Rejected);
        }

        self.write_line(command)?;
        Ok(CommandOutcome::Sent)
    }

    /// Ask the server to shut down on its own. Does not wait for it.
    pub fn stop(&mut self) -> Result<(), ServerError> {
        if !self.running() {
            return Err(ServerError::NotRunning);
        }
        info!("Requesting server shutdown");
        self.write_line(STOP_COMMAND)
    }

    /// Wait for the server to exit, killing it once the join timeout passes,
    /// and return its exit code.
    pub async fn join(&mut self) -> Result<i32, ServerError> {
        let Some(mut process) = self.process.take() else {
            return match self.status {
                InstanceStatus::Exited(code) => Ok(code),
                _ => Err(ServerError::NotRunning),
            };
        };

        let exit = match timeout(self.join_timeout, process.child.wait()).await {
            Ok(waited) => waited.map_err(ServerError::Wait)?,
            Err(_) => {
                warn!(
                    "Server did not exit within {:?}, killing it",
                    self.join_timeout
                );
                process.child.start_kill().map_err(ServerError::Wait)?;
                process.child.wait().await.map_err(ServerError::Wait)?
            }
        };

        let code = exit_code(exit);
        self.teardown(&mut process).await;

        if self.status.is_running() {
            info!("Server exited with code {}", code);
            self.transition_status(InstanceStatus::Exited(code));
        }
        Ok(code)
    }

    async fn teardown(&self, process: &mut ServerProcess) {
        let mut pumps = std::mem::take(&mut process.pumps);
        // drop queued input; nothing reads it any more
        process.shutdown.cancel();

        for pump in pumps.iter_mut() {
            if timeout(DRAIN_GRACE, pump).await.is_err() {
                debug!("Output pump still busy after exit, abandoning it");
            }
        }
        for pump in pumps {
            pump.abort();
        }
    }

    fn write_line(&self, line: &str) -> Result<(), ServerError> {
        let process = self.process.as_ref().ok_or(ServerError::NotRunning)?;
        process
            .stdin_tx
            .try_send(format!("{line}\n"))
            .map_err(|_| ServerError::StdinWriteFailed)
    }

    fn notify<S: Into<String>>(&self, message: S) {
        _ = self.events_tx.send(InstanceEvent::notice(message));
    }

    fn transition_status(&mut self, status: InstanceStatus) {
        let old = self.status;
        self.status = status;
        _ = self
            .events_tx
            .send(InstanceEvent::state_change(old, status));
    }
}

/// One task per output pipe keeps lines in the order the server wrote them.
fn spawn_line_pump<R>(
    pipe: R,
    source: StreamSource,
    tx: broadcast::Sender<InstanceEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe).lines();
        loop {
            tokio::select! {
                biased;
                next_line = reader.next_line() => {
                    match next_line {
                        Ok(Some(line)) => {
                            _ = tx.send(InstanceEvent::line(line, source));
                        }
                        Ok(None) => break,
                        Err(e) => {
                            debug!("Stopped reading server {:?}: {}", source, e);
                            break;
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    break;
                }
            }
        }
    })
}

/// Signal deaths map to the shell convention of 128 + signal number.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}

#[cfg(test)]
mod tests {
    use std::{path::Path, time::Instant};

    use tokio_stream::StreamExt;

    use super::*;
    use crate::stream::EventPayload;

    const ECHO_SERVER: &str = r#"echo "Version: 1.21.95.1"
while read -r line; do
  echo "got $line"
  if [ "$line" = "stop" ]; then
    echo "Quit correctly"
    exit 0
  fi
done"#;

    #[cfg(unix)]
    fn install_script(dir: &Path, body: &str) -> LauncherConfig {
        use std::os::unix::fs::PermissionsExt;

        let config = LauncherConfig::new("http://127.0.0.1:9/links", dir, "world");
        std::fs::create_dir_all(config.install_path()).unwrap();
        let exe = config.executable_path();
        std::fs::write(&exe, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
        config
    }

    /// Retries the spawn while another test thread briefly holds a freshly
    /// written script open (ETXTBSY).
    #[cfg(unix)]
    async fn start(supervisor: &mut ProcessSupervisor) {
        for _ in 0..10 {
            match supervisor.start() {
                Err(ServerError::Launch { source, .. }) if source.raw_os_error() == Some(26) => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                other => return other.unwrap(),
            }
        }
        panic!("server script stayed busy");
    }

    async fn next_line(events: &mut BroadcastStream<InstanceEvent>) -> String {
        timeout(Duration::from_secs(5), async {
            loop {
                match events.next().await {
                    Some(Ok(InstanceEvent {
                        payload: EventPayload::StdLine { line },
                        ..
                    })) => return line.line,
                    Some(_) => continue,
                    None => panic!("event stream closed"),
                }
            }
        })
        .await
        .expect("no output line within 5s")
    }

    async fn next_notice(events: &mut BroadcastStream<InstanceEvent>) -> String {
        timeout(Duration::from_secs(5), async {
            loop {
                match events.next().await {
                    Some(Ok(InstanceEvent {
                        payload: EventPayload::Notice { message },
                        ..
                    })) => return message,
                    Some(_) => continue,
                    None => panic!("event stream closed"),
                }
            }
        })
        .await
        .expect("no notice within 5s")
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn forwards_output_and_stops_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let config = install_script(dir.path(), ECHO_SERVER);
        let mut supervisor = ProcessSupervisor::new_with_config(&config);
        let mut events = supervisor.subscribe();

        assert_eq!(supervisor.status(), InstanceStatus::NotStarted);
        start(&mut supervisor).await;
        assert!(supervisor.running());
        assert_eq!(next_line(&mut events).await, "Version: 1.21.95.1");

        assert_eq!(
            supervisor.send_command("save hold").unwrap(),
            CommandOutcome::Sent
        );
        assert_eq!(next_line(&mut events).await, "got save hold");

        supervisor.stop().unwrap();
        assert_eq!(next_line(&mut events).await, "got stop");

        assert_eq!(supervisor.join().await.unwrap(), 0);
        assert!(!supervisor.running());
        assert_eq!(supervisor.status(), InstanceStatus::Exited(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rejected_commands_never_reach_the_server() {
        let dir = tempfile::tempdir().unwrap();
        let config = install_script(dir.path(), ECHO_SERVER);
        let mut supervisor = ProcessSupervisor::new_with_config(&config);
        let mut events = supervisor.subscribe();
        let mut notices = supervisor.subscribe();

        start(&mut supervisor).await;
        assert_eq!(next_line(&mut events).await, "Version: 1.21.95.1");

        assert_eq!(
            supervisor.send_command("shutdown").unwrap(),
            CommandOutcome::Rejected
        );
        assert_eq!(next_notice(&mut notices).await, "Invalid command: 'shutdown'");

        assert_eq!(
            supervisor.send_command("kick Steve\nreload").unwrap(),
            CommandOutcome::Rejected
        );

        assert_eq!(
            supervisor.send_command("op Steve\n").unwrap(),
            CommandOutcome::Sent
        );
        // the first thing the server saw is the valid command
        assert_eq!(next_line(&mut events).await, "got op Steve");

        supervisor.stop().unwrap();
        assert_eq!(supervisor.join().await.unwrap(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_written_just_before_exit_is_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let config = install_script(dir.path(), "echo \"low disk\" >&2\nexit 0");
        let mut supervisor = ProcessSupervisor::new_with_config(&config);
        let mut events = supervisor.subscribe();

        start(&mut supervisor).await;
        assert_eq!(supervisor.join().await.unwrap(), 0);

        let line = timeout(Duration::from_secs(5), async {
            loop {
                match events.next().await {
                    Some(Ok(InstanceEvent {
                        payload: EventPayload::StdLine { line },
                        ..
                    })) => return line,
                    Some(_) => continue,
                    None => panic!("event stream closed"),
                }
            }
        })
        .await
        .expect("stderr line was lost");

        assert_eq!(line.line, "low disk");
        assert_eq!(line.source, StreamSource::Stderr);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn join_kills_a_server_that_ignores_stop() {
        let dir = tempfile::tempdir().unwrap();
        let config = install_script(dir.path(), "echo ready\nexec sleep 30");
        let mut supervisor = ProcessSupervisor::new_with_config(&config);
        let mut events = supervisor.subscribe();

        start(&mut supervisor).await;
        assert_eq!(next_line(&mut events).await, "ready");

        supervisor.stop().unwrap();
        let started = Instant::now();
        let code = supervisor.join().await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(code, 137);
        assert!(elapsed >= config.join_timeout());
        assert!(elapsed < Duration::from_secs(5), "join took {elapsed:?}");
        assert_eq!(supervisor.status(), InstanceStatus::Exited(137));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn commands_after_exit_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let config = install_script(dir.path(), "exit 3");
        let mut supervisor = ProcessSupervisor::new_with_config(&config);
        let mut notices = supervisor.subscribe();

        start(&mut supervisor).await;
        let deadline = Instant::now() + Duration::from_secs(5);
        while supervisor.running() {
            assert!(Instant::now() < deadline, "script did not exit");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(supervisor.status(), InstanceStatus::Exited(3));
        assert_eq!(
            supervisor.send_command("stop").unwrap(),
            CommandOutcome::NotRunning
        );
        assert_eq!(next_notice(&mut notices).await, "Server already exited");
        assert!(matches!(supervisor.stop(), Err(ServerError::NotRunning)));

        assert_eq!(supervisor.join().await.unwrap(), 3);
        // joining again keeps reporting the recorded code
        assert_eq!(supervisor.join().await.unwrap(), 3);
        assert!(matches!(supervisor.start(), Err(ServerError::Finished)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn starting_twice_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let config = install_script(dir.path(), ECHO_SERVER);
        let mut supervisor = ProcessSupervisor::new_with_config(&config);

        start(&mut supervisor).await;
        assert!(matches!(
            supervisor.start(),
            Err(ServerError::AlreadyRunning)
        ));

        supervisor.stop().unwrap();
        assert_eq!(supervisor.join().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = LauncherConfig::new("http://127.0.0.1:9/links", dir.path(), "world");
        let mut supervisor = ProcessSupervisor::new_with_config(&config);

        let err = supervisor.start().unwrap_err();
        assert!(matches!(err, ServerError::Launch { .. }));
        assert_eq!(supervisor.status(), InstanceStatus::NotStarted);
    }

    #[tokio::test]
    async fn idle_supervisor_has_nothing_to_join() {
        let dir = tempfile::tempdir().unwrap();
        let config = LauncherConfig::new("http://127.0.0.1:9/links", dir.path(), "world");
        let mut supervisor = ProcessSupervisor::new_with_config(&config);

        assert!(matches!(supervisor.join().await, Err(ServerError::NotRunning)));
        assert_eq!(
            supervisor.send_command("stop").unwrap(),
            CommandOutcome::NotRunning
        );
    }

    #[cfg(unix)]
    #[test]
    fn signal_deaths_use_shell_exit_codes() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
    }
}
