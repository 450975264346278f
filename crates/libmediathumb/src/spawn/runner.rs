//! Module for the external process runner seam
//!
//! Everything that spawns `ffmpeg` / `ffprobe` goes through a [`ProcessRunner`], so that the engines can be driven by a fake in tests.

use std::{
	collections::VecDeque,
	io::{
		BufRead,
		BufReader,
	},
	process::{
		Child,
		Command,
		Stdio,
	},
	sync::{
		Arc,
		Mutex,
	},
	thread::JoinHandle,
	time::{
		Duration,
		Instant,
	},
};

use crate::error::{
	CustomThreadJoin,
	IOErrorToError,
};

/// How many lines of STDERR to keep for error messages
const STDERR_KEEP_LINES: usize = 10;
/// Interval to poll a terminating process in
const TERMINATE_POLL: Duration = Duration::from_millis(50);
/// How long [`ProcessHandle::last_stderr`] waits for the STDERR reader to drain the pipe
const STDERR_DRAIN_GRACE: Duration = Duration::from_millis(250);
/// Interval to poll the STDERR reader in while it drains
const STDERR_DRAIN_POLL: Duration = Duration::from_millis(5);

/// Exit status of a finished process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStatus {
	/// The exit code, [`None`] if the process was ended by a signal
	code: Option<i32>,
}

impl ProcessStatus {
	/// Create a new [`ProcessStatus`] from a exit code
	#[must_use]
	pub fn from_code(code: Option<i32>) -> Self {
		return Self { code };
	}

	/// Get the exit code, if there is one
	#[must_use]
	pub fn code(&self) -> Option<i32> {
		return self.code;
	}

	/// Get if the process exited with code 0
	#[must_use]
	pub fn success(&self) -> bool {
		return self.code == Some(0);
	}
}

impl From<std::process::ExitStatus> for ProcessStatus {
	fn from(value: std::process::ExitStatus) -> Self {
		return Self::from_code(value.code());
	}
}

impl std::fmt::Display for ProcessStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		return match self.code {
			Some(code) => write!(f, "{code}"),
			None => write!(f, "<signal>"),
		};
	}
}

/// Output of a process that ran to completion
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
	/// The exit status
	pub status: ProcessStatus,
	/// Everything the process wrote to STDOUT
	pub stdout: Vec<u8>,
	/// Everything the process wrote to STDERR
	pub stderr: Vec<u8>,
}

/// Handle to a spawned, possibly still running, process
pub trait ProcessHandle: Send {
	/// Check if the process has exited, must not block
	fn try_wait(&mut self) -> Result<Option<ProcessStatus>, crate::Error>;
	/// Request the process to exit gracefully (SIGTERM on unix)
	fn terminate(&mut self) -> Result<(), crate::Error>;
	/// Forcefully kill the process
	fn kill(&mut self) -> Result<(), crate::Error>;
	/// Get the last lines the process wrote to STDERR, for error messages
	///
	/// May wait a short bounded time for the remaining output of an exited process.
	fn last_stderr(&self) -> String;
}

/// Runner for external processes
pub trait ProcessRunner: Send + Sync {
	/// Run `cmd` to completion and capture its output
	fn output(&self, cmd: Command) -> Result<ProcessOutput, crate::Error>;
	/// Spawn `cmd` without waiting for it
	fn spawn(&self, cmd: Command) -> Result<Box<dyn ProcessHandle>, crate::Error>;
}

/// Request `handle` to terminate and kill it if it has not exited within `grace`
pub fn stop_gracefully(handle: &mut dyn ProcessHandle, grace: Duration) {
	if let Err(err) = handle.terminate() {
		debug!("Terminate request failed, killing right away: {}", err);
	} else {
		let started = Instant::now();
		while started.elapsed() < grace {
			match handle.try_wait() {
				Ok(Some(_)) => return,
				Ok(None) => std::thread::sleep(TERMINATE_POLL),
				Err(err) => {
					debug!("Waiting for terminated process failed: {}", err);
					break;
				},
			}
		}
	}

	if let Err(err) = handle.kill() {
		warn!("Could not kill process: {}", err);
	}
}

/// [`ProcessRunner`] that spawns actual system processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
	fn output(&self, mut cmd: Command) -> Result<ProcessOutput, crate::Error> {
		trace!("Running {:?}", cmd);
		let name = program_name(&cmd);
		let output = cmd
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.output()
			.attach_location_err(format!("{name} output"))?;

		return Ok(ProcessOutput {
			status: output.status.into(),
			stdout: output.stdout,
			stderr: output.stderr,
		});
	}

	fn spawn(&self, mut cmd: Command) -> Result<Box<dyn ProcessHandle>, crate::Error> {
		trace!("Spawning {:?}", cmd);
		let name = program_name(&cmd);

		// create pipe for stderr, other stream are ignored
		// this is because ffmpeg only logs to stderr, where stdout is used for data piping
		cmd.stdout(Stdio::null()).stderr(Stdio::piped()).stdin(Stdio::null());

		let mut child = cmd.spawn().attach_location_err(format!("{name} spawn"))?;

		let stderr_reader = BufReader::new(child.stderr.take().ok_or_else(|| {
			return crate::Error::custom_ioerror_location(
				std::io::ErrorKind::BrokenPipe,
				"Failed to get Child STDERR",
				format!("{name} stderr take"),
			);
		})?);

		let last_lines = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_KEEP_LINES)));
		let thread_lines = last_lines.clone();
		let thread_name = name.clone();

		// offload the stderr reader to a different thread to not block the caller
		let stderr_thread = std::thread::Builder::new()
			.name(format!("{name} stderr handler"))
			.spawn(move || {
				for line in stderr_reader.lines().map_while(Result::ok) {
					trace!("{} STDERR: {}", thread_name, line);
					if let Ok(mut lines) = thread_lines.lock() {
						if lines.len() >= STDERR_KEEP_LINES {
							lines.pop_front();
						}
						lines.push_back(line);
					}
				}
			})
			.attach_location_err(format!("{name} stderr thread spawn"))?;

		return Ok(Box::new(SystemHandle {
			child,
			last_lines,
			stderr_thread: Some(stderr_thread),
		}));
	}
}

/// Get the file name of the program of `cmd`, for logging
fn program_name(cmd: &Command) -> String {
	let program = std::path::Path::new(cmd.get_program());

	return program
		.file_name()
		.unwrap_or(program.as_os_str())
		.to_string_lossy()
		.to_string();
}

/// [`ProcessHandle`] for a [`Child`] spawned by [`SystemRunner`]
struct SystemHandle {
	child:         Child,
	last_lines:    Arc<Mutex<VecDeque<String>>>,
	stderr_thread: Option<JoinHandle<()>>,
}

impl SystemHandle {
	/// Join the stderr thread if it has already finished, never blocks
	///
	/// A descendant of the process may inherit the pipe and keep it open after the process exited,
	/// in that case the thread is left running and ends on its own once the pipe closes.
	fn reap_stderr(&mut self) {
		if !self.stderr_thread.as_ref().is_some_and(JoinHandle::is_finished) {
			return;
		}

		if let Some(thread) = self.stderr_thread.take() {
			if let Err(err) = thread.join_err() {
				warn!("{}", err);
			}
		}
	}
}

impl ProcessHandle for SystemHandle {
	fn try_wait(&mut self) -> Result<Option<ProcessStatus>, crate::Error> {
		let status = self.child.try_wait().attach_location_err("child try_wait")?;

		if status.is_some() {
			self.reap_stderr();
		}

		return Ok(status.map(ProcessStatus::from));
	}

	#[cfg(unix)]
	fn terminate(&mut self) -> Result<(), crate::Error> {
		let pid = libc::pid_t::try_from(self.child.id())
			.map_err(|err| return crate::Error::other(format!("Pid does not fit into pid_t: {err}")))?;

		// SAFETY: "kill" only sends a signal, the pid belongs to a child that has not been waited on yet
		let res = unsafe { libc::kill(pid, libc::SIGTERM) };

		if res != 0 {
			return Err(crate::Error::custom_ioerror_location(
				std::io::Error::last_os_error().kind(),
				"Sending SIGTERM failed",
				"child terminate",
			));
		}

		return Ok(());
	}

	#[cfg(not(unix))]
	fn terminate(&mut self) -> Result<(), crate::Error> {
		// there is no graceful variant available, so just kill
		return self.kill();
	}

	fn kill(&mut self) -> Result<(), crate::Error> {
		match self.child.kill() {
			Ok(()) => (),
			// "InvalidInput" is returned when the process has already exited
			Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => (),
			Err(err) => return Err(crate::Error::new(crate::error::ErrorInner::IoError(err, "child kill".into()))),
		}

		// reap the process so it does not stay a zombie
		self.child.wait().attach_location_err("child wait")?;
		self.reap_stderr();

		return Ok(());
	}

	fn last_stderr(&self) -> String {
		let started = Instant::now();
		while started.elapsed() < STDERR_DRAIN_GRACE
			&& self.stderr_thread.as_ref().is_some_and(|v| return !v.is_finished())
		{
			std::thread::sleep(STDERR_DRAIN_POLL);
		}

		return self
			.last_lines
			.lock()
			.map(|lines| return lines.iter().cloned().collect::<Vec<String>>().join("\n"))
			.unwrap_or_default();
	}
}


#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_status_success() {
		assert!(ProcessStatus::from_code(Some(0)).success());
		assert!(!ProcessStatus::from_code(Some(1)).success());
		assert!(!ProcessStatus::from_code(None).success());
	}

	#[test]
	fn test_status_display() {
		assert_eq!("1", ProcessStatus::from_code(Some(1)).to_string());
		assert_eq!("<signal>", ProcessStatus::from_code(None).to_string());
	}

	#[test]
	fn test_program_name() {
		assert_eq!("ffmpeg", program_name(&Command::new("/usr/bin/ffmpeg")));
		assert_eq!("ffprobe", program_name(&Command::new("ffprobe")));
	}

	#[cfg(unix)]
	mod system_runner {
		use super::*;

		#[test]
		fn test_output_exit_code() {
			let mut cmd = Command::new("sh");
			cmd.args(["-c", "echo hello; exit 3"]);

			let output = SystemRunner.output(cmd).expect("Expected sh to be spawnable");

			assert_eq!(Some(3), output.status.code());
			assert_eq!(b"hello\n".to_vec(), output.stdout);
		}

		#[test]
		fn test_spawn_keeps_stderr() {
			let mut cmd = Command::new("sh");
			cmd.args(["-c", "echo first 1>&2; echo second 1>&2; exit 1"]);

			let mut handle = SystemRunner.spawn(cmd).expect("Expected sh to be spawnable");

			let status = loop {
				if let Some(status) = handle.try_wait().expect("Expected try_wait to work") {
					break status;
				}
				std::thread::sleep(Duration::from_millis(10));
			};

			assert_eq!(Some(1), status.code());
			assert_eq!("first\nsecond", handle.last_stderr());
		}

		#[test]
		fn test_stop_gracefully() {
			let mut cmd = Command::new("sh");
			cmd.args(["-c", "exec sleep 30"]); // "exec" so that no orphan keeps the stderr pipe open

			let mut handle = SystemRunner.spawn(cmd).expect("Expected sh to be spawnable");
			let started = Instant::now();

			stop_gracefully(handle.as_mut(), Duration::from_secs(1));

			assert!(started.elapsed() < Duration::from_secs(5));
			assert!(handle.try_wait().expect("Expected try_wait to work").is_some());
		}

		#[test]
		fn test_try_wait_with_inherited_stderr() {
			let mut cmd = Command::new("sh");
			// the background "sleep" keeps the stderr pipe open after "sh" exited
			cmd.args(["-c", "echo done 1>&2; sleep 3 1>&2 & exit 0"]);

			let mut handle = SystemRunner.spawn(cmd).expect("Expected sh to be spawnable");
			let started = Instant::now();

			let status = loop {
				if let Some(status) = handle.try_wait().expect("Expected try_wait to work") {
					break status;
				}
				std::thread::sleep(Duration::from_millis(10));
			};

			assert_eq!(Some(0), status.code());
			assert_eq!("done", handle.last_stderr());
			assert!(started.elapsed() < Duration::from_secs(2));
		}
	}
}
