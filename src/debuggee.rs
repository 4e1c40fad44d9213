//! The traced child process and the state the debugger keeps about it.

use std::collections::HashMap;

use tracing::debug;

use crate::breakpoint::Breakpoint;
use crate::dbginfo::DebugInfo;
use crate::errors::Result;
use crate::tracee::Tracee;
use crate::Addr;

/// A launched debuggee: the tracee handle, the breakpoint map, and the
/// materialized debug information of its executable.
///
/// The breakpoint map is owned here exclusively; all mutation goes
/// through the engine.
pub struct Debuggee {
    pub(crate) tracee: Tracee,
    pub(crate) breakpoints: HashMap<Addr, Breakpoint>,
    pub(crate) dbginfo: DebugInfo,
}

impl Debuggee {
    pub(crate) fn build(tracee: Tracee, dbginfo: DebugInfo) -> Self {
        Self {
            tracee,
            breakpoints: HashMap::new(),
            dbginfo,
        }
    }

    pub fn kill(&self) -> Result<()> {
        debug!("killing debuggee {}", self.tracee.pid());
        self.tracee.kill()
    }
}
