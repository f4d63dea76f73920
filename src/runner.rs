//! Runs the openLISEM executable on a materialized runfile.
//!
//! Each runner owns its own copy of the runfile. Its result directory is the
//! template's `Result Directory` extended by the runner name, and its runfile
//! is written next to the template as `<name>.run`, so runners with distinct
//! names never share files.

use crate::error::{CalibError, Result};
use crate::runfile::{FormatOptions, ParamValue, RunFile};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Process-level options for simulator runs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerOptions {
    /// Wrap the simulator in `xvfb-run` (ignored on non-unix hosts)
    #[serde(default = "default_true")]
    pub headless: bool,
    /// Wall-clock limit per run in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: Option<f64>,
    /// Discard the simulator's console output
    #[serde(default = "default_true")]
    pub quiet: bool,
}

fn default_true() -> bool { true }
fn default_timeout() -> Option<f64> { Some(3600.0) }

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            headless: true,
            timeout_secs: default_timeout(),
            quiet: true,
        }
    }
}

impl RunnerOptions {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs_f64)
    }
}

/// One named simulator run.
#[derive(Debug, Clone)]
pub struct ModelRunner {
    executable: PathBuf,
    template_dir: PathBuf,
    name: String,
    runfile: RunFile,
    options: RunnerOptions,
}

impl ModelRunner {
    /// Reads the template runfile and derives this run's identity from it.
    pub fn new(
        executable: &Path,
        template: &Path,
        name: &str,
        format: FormatOptions,
        options: RunnerOptions,
    ) -> Result<Self> {
        let runfile = RunFile::load(template, format)?;
        Self::from_template(executable, template, &runfile, name, options)
    }

    /// Like [`ModelRunner::new`] but reuses an already parsed template.
    pub fn from_template(
        executable: &Path,
        template_path: &Path,
        template: &RunFile,
        name: &str,
        options: RunnerOptions,
    ) -> Result<Self> {
        if name.is_empty() || name.contains(|c: char| c == '/' || c == '\\') {
            return Err(CalibError::InvalidSettings(format!("invalid run name '{}'", name)));
        }

        let mut runfile = template.clone();
        let declared = runfile.result_dir()?;
        let result_dir = Path::new(&declared).join(name);
        runfile.set_result_dir(&format!("{}/", result_dir.display()))?;

        Ok(Self {
            executable: executable.to_path_buf(),
            template_dir: template_path.parent().map(Path::to_path_buf).unwrap_or_default(),
            name: name.to_string(),
            runfile,
            options,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn runfile(&self) -> &RunFile {
        &self.runfile
    }

    pub fn runfile_mut(&mut self) -> &mut RunFile {
        &mut self.runfile
    }

    pub fn set(&mut self, key: &str, value: impl Into<ParamValue>) -> Result<()> {
        self.runfile.set(key, value)
    }

    /// Where the modified runfile is written by [`save`](Self::save) and [`run`](Self::run).
    pub fn runfile_path(&self) -> PathBuf {
        self.template_dir.join(format!("{}.run", self.name))
    }

    pub fn result_dir(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(self.runfile.result_dir()?))
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = self.runfile_path();
        self.runfile.save(&path)?;
        Ok(path)
    }

    fn command(&self, runfile_path: &Path) -> Command {
        let headless = self.options.headless && cfg!(unix);
        let mut cmd = if headless {
            let mut c = Command::new("xvfb-run");
            c.arg("-a").arg(&self.executable);
            c.env("LISEM_CONSOLE", "X");
            c
        } else {
            Command::new(&self.executable)
        };
        cmd.arg("-r").arg(runfile_path);
        if self.options.quiet {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        // own process group, so a timeout also reaches Xvfb and the simulator
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }

    fn failed(&self, reason: impl Into<String>) -> CalibError {
        CalibError::SimulationFailed {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Writes the runfile, runs the simulator to completion and returns the
    /// result directory.
    pub fn run(&self) -> Result<PathBuf> {
        let result_dir = self.result_dir()?;
        fs::create_dir_all(&result_dir)?;
        let runfile_path = self.save()?;

        let mut cmd = self.command(&runfile_path);
        debug!(name = %self.name, command = ?cmd, "starting simulator");

        let mut child = cmd
            .spawn()
            .map_err(|e| self.failed(format!("could not start {}: {}", self.executable.display(), e)))?;

        let status = match self.options.timeout() {
            Some(limit) => match wait_timeout(&mut child, limit)? {
                Some(status) => status,
                None => {
                    if let Err(e) = kill_group(&mut child) {
                        warn!(name = %self.name, error = %e, "could not kill simulator");
                    }
                    let _ = child.wait();
                    return Err(self.failed(format!("timed out after {:.1}s", limit.as_secs_f64())));
                }
            },
            None => child.wait()?,
        };

        if !status.success() {
            return Err(self.failed(format!("simulator exited with {}", status)));
        }
        Ok(result_dir)
    }

    /// Applies `params` and runs.
    pub fn run_with(&mut self, params: &[(&str, ParamValue)]) -> Result<PathBuf> {
        for (key, value) in params {
            self.runfile.set(key, value.clone())?;
        }
        self.run()
    }

    /// Removes this run's result directory and runfile.
    pub fn clean(&self) -> Result<()> {
        let dir = self.result_dir()?;
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        let runfile = self.runfile_path();
        if runfile.exists() {
            fs::remove_file(&runfile)?;
        }
        Ok(())
    }
}

/// Kills the process group led by `child`.
#[cfg(unix)]
fn kill_group(child: &mut Child) -> std::io::Result<()> {
    let status = Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{}", child.id()))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if !status.success() {
        child.kill()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

fn wait_timeout(child: &mut Child, limit: Duration) -> Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= limit {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::tests::{write_script, write_template};

    fn options(timeout_secs: Option<f64>) -> RunnerOptions {
        RunnerOptions {
            headless: false,
            timeout_secs,
            quiet: true,
        }
    }

    #[test]
    fn identity_extends_template_result_dir() {
        let dir = tempfile::tempdir().unwrap();
        let template = write_template(dir.path(), 1.0);
        let exe = dir.path().join("lisem");
        let runner =
            ModelRunner::new(&exe, &template, "variant", FormatOptions::default(), options(None))
                .unwrap();

        let expected = dir.path().join("res").join("variant");
        assert_eq!(runner.result_dir().unwrap(), expected);
        assert_eq!(runner.runfile_path(), dir.path().join("variant.run"));
    }

    #[test]
    fn run_writes_runfile_and_waits() {
        let dir = tempfile::tempdir().unwrap();
        let template = write_template(dir.path(), 1.0);
        let exe = write_script(
            dir.path(),
            "sim.sh",
            r#"dir=$(sed -n 's/^Result Directory *= *//p' "$2")
cp "$2" "$dir/used.run""#,
        );

        let mut runner =
            ModelRunner::new(&exe, &template, "a", FormatOptions::default(), options(Some(30.0)))
                .unwrap();
        let out = runner.run_with(&[("ksat", ParamValue::Float(2.5))]).unwrap();

        let used = fs::read_to_string(out.join("used.run")).unwrap();
        assert!(used.contains("Ksat calibration=2.5"));
        assert!(runner.runfile_path().is_file());

        runner.clean().unwrap();
        assert!(!out.exists());
        assert!(!runner.runfile_path().exists());
    }

    #[test]
    fn non_zero_exit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let template = write_template(dir.path(), 1.0);
        let exe = write_script(dir.path(), "crash.sh", "exit 3");
        let runner =
            ModelRunner::new(&exe, &template, "b", FormatOptions::default(), options(None)).unwrap();
        assert!(matches!(runner.run(), Err(CalibError::SimulationFailed { .. })));
    }

    #[test]
    fn hung_simulator_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let template = write_template(dir.path(), 1.0);
        let exe = write_script(dir.path(), "hang.sh", "exec sleep 30");
        let runner =
            ModelRunner::new(&exe, &template, "c", FormatOptions::default(), options(Some(0.2)))
                .unwrap();

        let start = Instant::now();
        let err = runner.run().unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    /// True while `pid` exists and is not a zombie.
    #[cfg(target_os = "linux")]
    fn running(pid: &str) -> bool {
        match fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => !stat
                .rsplit(')')
                .next()
                .map_or(false, |rest| rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn timeout_kills_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let template = write_template(dir.path(), 1.0);
        let pid_file = dir.path().join("sleeper.pid");
        let exe = write_script(
            dir.path(),
            "spawner.sh",
            &format!("sleep 30 &\necho $! > '{}'\nwait", pid_file.display()),
        );
        let runner =
            ModelRunner::new(&exe, &template, "e", FormatOptions::default(), options(Some(0.5)))
                .unwrap();

        let err = runner.run().unwrap_err();
        assert!(err.to_string().contains("timed out"));

        let pid = fs::read_to_string(&pid_file).unwrap().trim().to_string();
        let deadline = Instant::now() + Duration::from_secs(5);
        while running(&pid) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert!(!running(&pid), "sleep {} survived the timeout", pid);
    }

    #[test]
    fn missing_executable_fails() {
        let dir = tempfile::tempdir().unwrap();
        let template = write_template(dir.path(), 1.0);
        let runner = ModelRunner::new(
            &dir.path().join("nope"),
            &template,
            "d",
            FormatOptions::default(),
            options(None),
        )
        .unwrap();
        assert!(matches!(runner.run(), Err(CalibError::SimulationFailed { .. })));
    }
}
