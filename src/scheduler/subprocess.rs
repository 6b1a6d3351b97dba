//! Workers backed by child processes of the agent binary.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::process::{Child, Command, Stdio};

use camino::Utf8PathBuf;

use super::{ProcessExit, WorkerProcess, WorkerSpawner, runner_command};
use crate::model::JobKind;

/// Spawns `<program> runner:build|runner:deploy <job id>`.
///
/// Output goes to anonymous temporary files rather than pipes so a chatty
/// worker cannot block on a full pipe while the scheduler sleeps.
#[derive(Clone, Debug)]
pub struct SubprocessSpawner {
    program: Utf8PathBuf,
}

impl SubprocessSpawner {
    /// Creates a spawner that runs `program`.
    #[must_use]
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl WorkerSpawner for SubprocessSpawner {
    fn spawn(&self, kind: JobKind, job_id: &str) -> io::Result<Box<dyn WorkerProcess>> {
        let stdout = tempfile::tempfile()?;
        let stderr = tempfile::tempfile()?;
        let child = Command::new(self.program.as_std_path())
            .arg(runner_command(kind))
            .arg(job_id)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout.try_clone()?))
            .stderr(Stdio::from(stderr.try_clone()?))
            .spawn()?;
        Ok(Box::new(Subprocess {
            child,
            stdout,
            stderr,
        }))
    }
}

struct Subprocess {
    child: Child,
    stdout: File,
    stderr: File,
}

impl Subprocess {
    fn collect(&mut self, code: Option<i32>) -> io::Result<ProcessExit> {
        Ok(ProcessExit {
            code,
            stdout: read_all(&mut self.stdout)?,
            stderr: read_all(&mut self.stderr)?,
        })
    }
}

impl WorkerProcess for Subprocess {
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        self.child
            .try_wait()?
            .map(|status| self.collect(status.code()))
            .transpose()
    }

    fn kill(&mut self) -> io::Result<ProcessExit> {
        self.child.kill()?;
        self.child.wait()?;
        self.collect(None)
    }
}

fn read_all(file: &mut File) -> io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
