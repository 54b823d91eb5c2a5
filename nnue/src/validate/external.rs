use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

use crate::error::ValidationError;

/// Line the evaluator prints once it has loaded the network.
pub const READY: &str = "ready";
/// Line that ends an evaluator session.
pub const QUIT: &str = "q";

/// An external integer evaluator driven over stdin/stdout, one FEN per line.
///
/// Anything the process writes to stderr fails the session. The process is
/// killed when the driver is dropped without [`NativeEvaluator::finish`].
pub struct NativeEvaluator {
    program: PathBuf,
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    stdout: BufReader<ChildStdout>,
    stderr: Receiver<String>,
    stderr_reader: Option<JoinHandle<()>>,
    finished: bool,
}

impl NativeEvaluator {
    /// Starts `program args... [artifact]` and waits for the readiness line.
    pub fn spawn(
        program: &Path,
        args: &[String],
        artifact: Option<&Path>,
    ) -> Result<Self, ValidationError> {
        let mut child = Command::new(program)
            .args(args)
            .args(artifact)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ValidationError::Spawn {
                program: program.to_path_buf(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let (sender, receiver) = mpsc::channel();
        let stderr_reader = thread::spawn(move || {
            for line in BufReader::new(stderr).lines() {
                let Ok(line) = line else { break };
                if sender.send(line).is_err() {
                    break;
                }
            }
        });

        let mut evaluator = Self {
            program: program.to_path_buf(),
            child,
            stdin: Some(BufWriter::new(stdin)),
            stdout: BufReader::new(stdout),
            stderr: receiver,
            stderr_reader: Some(stderr_reader),
            finished: false,
        };

        let line = evaluator.read_line("the readiness line")?;
        if line != READY {
            return Err(ValidationError::Malformed {
                fen: String::new(),
                line,
            });
        }
        evaluator.check_stderr()?;

        log::debug!("Evaluator {} is ready", evaluator.program.display());
        Ok(evaluator)
    }

    /// Sends one position and parses the `<label>: <integer>` answer.
    pub fn evaluate(&mut self, fen: &str) -> Result<i32, ValidationError> {
        self.send_line(fen)?;
        let line = self.read_line("answering")?;
        self.check_stderr()?;

        parse_answer(&line).ok_or_else(|| ValidationError::Malformed {
            fen: fen.to_string(),
            line,
        })
    }

    /// Ends the session and requires a clean, silent exit.
    pub fn finish(&mut self) -> Result<(), ValidationError> {
        if let Some(mut stdin) = self.stdin.take() {
            // The process may already be gone; its exit status tells why
            let _ = writeln!(stdin, "{}", QUIT).and_then(|_| stdin.flush());
        }

        let status = self.child.wait()?;
        self.finished = true;

        if let Some(reader) = self.stderr_reader.take() {
            let _ = reader.join();
        }
        self.check_stderr()?;

        if !status.success() {
            return Err(ValidationError::ExitStatus(status));
        }
        Ok(())
    }

    #[inline]
    fn send_line(&mut self, line: &str) -> Result<(), ValidationError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or(ValidationError::UnexpectedEof("the session ended"))?;
        writeln!(stdin, "{}", line)?;
        stdin.flush()?;
        Ok(())
    }

    #[inline]
    fn read_line(&mut self, context: &'static str) -> Result<String, ValidationError> {
        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            self.fail_on_exit()?;
            return Err(ValidationError::UnexpectedEof(context));
        }
        Ok(line.trim().to_string())
    }

    /// Stdout closed early: report stderr or the exit status if there is one.
    fn fail_on_exit(&mut self) -> Result<(), ValidationError> {
        self.stdin.take();
        let status = self.child.wait()?;
        self.finished = true;
        if let Some(reader) = self.stderr_reader.take() {
            let _ = reader.join();
        }
        self.check_stderr()?;
        if !status.success() {
            return Err(ValidationError::ExitStatus(status));
        }
        Ok(())
    }

    fn check_stderr(&self) -> Result<(), ValidationError> {
        match self.stderr.try_recv() {
            Ok(line) => Err(ValidationError::Stderr(line)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(()),
        }
    }
}

impl Drop for NativeEvaluator {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Parses `<label>: <integer>`.
pub fn parse_answer(line: &str) -> Option<i32> {
    let (label, value) = line.split_once(':')?;
    if label.trim().is_empty() {
        return None;
    }
    value.trim().parse().ok()
}

fn missing_pipe(name: &str) -> ValidationError {
    ValidationError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        format!("evaluator {} is not piped", name),
    ))
}
