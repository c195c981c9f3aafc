//! Hardware profiler integration.
//!
//! Profiling is best-effort: every failure is logged and swallowed by
//! [`ProfileGuard`], never propagated into the measurement loop.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cache::millions_label;

/// Sweep point a profile is collected for; encoded in the output file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileTarget {
    pub dimension: usize,
    pub database_rows: usize,
    pub query_count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ProfilerError {
    #[error("failed to start profiler `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to stop profiler: {0}")]
    Stop(String),
    #[error("failed to move profiler output {from} to {to}: {source}")]
    Relocate {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("profiler is not running")]
    NotRunning,
}

pub trait Profiler {
    fn start(&mut self, target: &ProfileTarget) -> Result<(), ProfilerError>;
    /// Stops collection. Returns where the collected output ended up, if anywhere.
    fn stop(&mut self, target: &ProfileTarget) -> Result<Option<PathBuf>, ProfilerError>;
}

#[derive(Debug, Clone)]
pub struct EmonSettings {
    pub binary: String,
    /// File the collector writes to while running.
    pub intermediate: PathBuf,
    pub label: String,
    pub hardware_tag: String,
    pub stop_timeout: Duration,
}

impl EmonSettings {
    /// `emon_{label}_d{d}_db{rows}M_q{nq}_{tag}.dat`, next to the intermediate file.
    pub fn output_path(&self, target: &ProfileTarget) -> PathBuf {
        let name = format!(
            "emon_{}_d{}_db{}M_q{}_{}.dat",
            self.label,
            target.dimension,
            millions_label(target.database_rows),
            target.query_count,
            self.hardware_tag
        );
        match self.intermediate.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
            _ => PathBuf::from(name),
        }
    }
}

/// Drives an EMON-style collector: `{binary} -collect-edp` runs in the
/// background with stdout captured, `{binary} -stop` ends it.
pub struct EmonProfiler {
    settings: EmonSettings,
    child: Option<Child>,
}

impl EmonProfiler {
    pub fn new(settings: EmonSettings) -> Self {
        Self {
            settings,
            child: None,
        }
    }

    fn wait_for_exit(&self, child: &mut Child) -> Result<(), ProfilerError> {
        let deadline = Instant::now() + self.settings.stop_timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Profiler collector exited with {}", status);
                    return Ok(());
                }
                Ok(None) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(20));
                }
                Ok(None) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ProfilerError::Stop(format!(
                        "collector did not exit within {:?}, killed",
                        self.settings.stop_timeout
                    )));
                }
                Err(err) => return Err(ProfilerError::Stop(err.to_string())),
            }
        }
    }
}

impl Profiler for EmonProfiler {
    fn start(&mut self, _target: &ProfileTarget) -> Result<(), ProfilerError> {
        if self.child.is_some() {
            return Err(ProfilerError::Stop("collector already running".into()));
        }
        let command = format!("{} -collect-edp", self.settings.binary);
        let spawn_err = |source| ProfilerError::Spawn {
            command: command.clone(),
            source,
        };

        let output = File::create(&self.settings.intermediate).map_err(spawn_err)?;
        info!("kickoff emon...");
        let spawned = Command::new(&self.settings.binary)
            .arg("-collect-edp")
            .stdin(Stdio::null())
            .stdout(Stdio::from(output))
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(child) => {
                self.child = Some(child);
                Ok(())
            }
            Err(source) => {
                let _ = fs::remove_file(&self.settings.intermediate);
                Err(spawn_err(source))
            }
        }
    }

    fn stop(&mut self, target: &ProfileTarget) -> Result<Option<PathBuf>, ProfilerError> {
        let mut child = self.child.take().ok_or(ProfilerError::NotRunning)?;
        info!("stop emon...");

        let status = Command::new(&self.settings.binary)
            .arg("-stop")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProfilerError::Stop(format!("stop command exited with {}", status)));
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProfilerError::Stop(err.to_string()));
            }
        }
        self.wait_for_exit(&mut child)?;

        let to = self.settings.output_path(target);
        relocate(&self.settings.intermediate, &to)?;
        Ok(Some(to))
    }
}

impl Drop for EmonProfiler {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn relocate(from: &Path, to: &Path) -> Result<(), ProfilerError> {
    fs::rename(from, to).map_err(|source| ProfilerError::Relocate {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })
}

/// Scoped profiler bracket. Collection starts in [`ProfileGuard::start`] and
/// stops in [`ProfileGuard::finish`], or on drop if `finish` was never reached.
pub struct ProfileGuard<'a, P: Profiler + ?Sized> {
    profiler: &'a mut P,
    target: ProfileTarget,
    active: bool,
}

impl<'a, P: Profiler + ?Sized> ProfileGuard<'a, P> {
    pub fn start(profiler: &'a mut P, target: ProfileTarget) -> Self {
        let active = match profiler.start(&target) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    "Profiler start failed for d={} q={}: {}",
                    target.dimension, target.query_count, err
                );
                false
            }
        };
        Self {
            profiler,
            target,
            active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn finish(mut self) -> Option<PathBuf> {
        self.stop()
    }

    fn stop(&mut self) -> Option<PathBuf> {
        if !self.active {
            return None;
        }
        self.active = false;
        match self.profiler.stop(&self.target) {
            Ok(path) => path,
            Err(err) => {
                warn!(
                    "Profiler stop failed for d={} q={}: {}",
                    self.target.dimension, self.target.query_count, err
                );
                None
            }
        }
    }
}

impl<P: Profiler + ?Sized> Drop for ProfileGuard<'_, P> {
    fn drop(&mut self) {
        self.stop();
    }
}
