//! Startup mode and invocation.
//!
//! # Responsibilities
//! - Decide once, at entry, whether this process binds or inherits
//! - Remember how the process was invoked so it can be launched again
//! - Append the restart marker without ever duplicating it
//!
//! # Design Decisions
//! - The marker is an ordinary argument so it survives any number of handoffs
//! - The program is argv[0], not `/proc/self/exe`: after a binary swap the
//!   latter points at the unlinked old image

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Argument marking a process that inherited its listener.
pub const RESTART_MARKER: &str = "--graceful";

/// How this process obtained (or will obtain) its listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupMode {
    /// Bind a new listening socket.
    Fresh,
    /// Adopt the listener a predecessor left on the inherited slot.
    Inherited,
}

impl StartupMode {
    /// Scan an argument list for [`RESTART_MARKER`].
    pub fn detect<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        if args.into_iter().any(|arg| arg.as_ref() == RESTART_MARKER) {
            StartupMode::Inherited
        } else {
            StartupMode::Fresh
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StartupMode::Fresh => "fresh",
            StartupMode::Inherited => "inherited",
        }
    }
}

impl fmt::Display for StartupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append [`RESTART_MARKER`] unless it is already present.
pub fn append_restart_marker(args: &mut Vec<OsString>) {
    if !args.iter().any(|arg| arg == RESTART_MARKER) {
        args.push(OsString::from(RESTART_MARKER));
    }
}

/// The program and arguments this process was started with.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
    mode: StartupMode,
}

impl Invocation {
    /// Build an invocation from a program and its arguments (argv[1..]).
    pub fn new<P, I, S>(program: P, args: I) -> Self
    where
        P: Into<PathBuf>,
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let mode = StartupMode::detect(&args);
        Self {
            program: program.into(),
            args,
            mode,
        }
    }

    /// Capture the current process's invocation.
    pub fn from_env() -> Self {
        let mut argv = std::env::args_os();
        let program = argv
            .next()
            .map(PathBuf::from)
            .or_else(|| std::env::current_exe().ok())
            .unwrap_or_default();
        Self::new(program, argv)
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn mode(&self) -> StartupMode {
        self.mode
    }

    /// Arguments for the replacement process: ours plus the marker, once.
    pub fn restart_args(&self) -> Vec<OsString> {
        let mut args = self.args.clone();
        append_restart_marker(&mut args);
        args
    }
}
