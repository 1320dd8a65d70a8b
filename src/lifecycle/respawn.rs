//! Launching the replacement process.
//!
//! # Responsibilities
//! - Duplicate the listener so the child can accept on the same socket
//! - Launch the same program with the restart marker appended once
//! - Return as soon as the launch itself succeeds or fails
//!
//! # Design Decisions
//! - No readiness handshake: spawn-then-drain, the child is not verified
//! - stdout/stderr are shared with the parent, stdin is closed

use std::ffi::OsString;
use std::io;
use std::os::unix::io::AsFd;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::{Child, Command};

use crate::lifecycle::startup::Invocation;
use crate::net::fd::{self, INHERITED_FD};

/// Errors from launching the replacement process.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The listener descriptor could not be duplicated.
    #[error("failed to duplicate listener descriptor: {0}")]
    Duplicate(#[source] io::Error),

    /// The new process could not be started.
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// A replacement process that was launched.
#[derive(Debug)]
pub struct Respawned {
    child: Child,
    args: Vec<OsString>,
}

impl Respawned {
    /// Process id of the child, if it has not been reaped yet.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Arguments the child was launched with (argv[1..]).
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Give up the handle; dropping it leaves the child running.
    pub fn into_child(self) -> Child {
        self.child
    }
}

/// Launch a copy of `invocation` that inherits `listener` on [`INHERITED_FD`].
pub fn respawn(listener: &impl AsFd, invocation: &Invocation) -> Result<Respawned, SpawnError> {
    let duplicate = listener
        .as_fd()
        .try_clone_to_owned()
        .map_err(SpawnError::Duplicate)?;
    let args = invocation.restart_args();

    let mut command = Command::new(invocation.program());
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    fd::pass_at_slot(&mut command, &duplicate, INHERITED_FD);

    let child = command.spawn().map_err(|source| SpawnError::Launch {
        program: invocation.program().display().to_string(),
        source,
    })?;
    // The child holds its own copy now.
    drop(duplicate);

    tracing::info!(
        pid = child.id(),
        program = %invocation.program().display(),
        "Replacement process launched"
    );

    Ok(Respawned { child, args })
}
