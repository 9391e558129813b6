// src/job/runtime.rs

//! Domain runtime supervision
//!
//! Boots the cloned domain and follows it to termination. The console pipe
//! is the only window into guest progress: it is drained into the job log
//! line by line until the guest closes it, after which the domain state is
//! polled until a terminal state shows up.

use super::BuildJob;
use crate::Result;
use crate::hypervisor::virsh;
use std::fs::File;
use std::io::Read;
use std::thread;
use std::time::Duration;

/// How often the domain state is polled while waiting for shutdown.
/// Builds run for minutes to hours, so coarse polling costs nothing.
const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Time granted to the guest filesystem appliance to drop its mount.
/// Booting over a still-mounted overlay corrupts the guest.
const UNMOUNT_SETTLE: Duration = Duration::from_secs(5);

impl BuildJob {
    /// Boot the domain, supervise it to termination, and make sure it is
    /// off afterwards.
    ///
    /// The wait loop has no deadline: a build ends when its guest powers
    /// off, crashes, or the domain disappears.
    pub fn run(&mut self) -> Result<()> {
        self.settle_guest()?;

        self.log.check_call(virsh::TOOL, &["start", self.domain()])?;
        self.forward_console()?;
        self.log
            .line("Connection to VM lost, waiting for VM to shutdown");
        self.wait_for_shutdown();
        // Usually a no-op: the guest powers itself off when the build ends
        self.log.call(virsh::TOOL, &["destroy", self.domain()]);
        Ok(())
    }

    /// Close any open guest filesystem session before boot
    fn settle_guest(&mut self) -> Result<()> {
        if let Some(guest) = self.guest.take() {
            guest.close()?;
            thread::sleep(UNMOUNT_SETTLE);
        }
        Ok(())
    }

    /// Drain the console pipe into the job log until end of stream
    fn forward_console(&mut self) -> Result<()> {
        let mut pipe = File::open(self.console_path("out"))?;
        let mut pending: Vec<u8> = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            let n = pipe.read(&mut buf)?;
            if n == 0 {
                if !pending.is_empty() {
                    self.log.line(&String::from_utf8_lossy(&pending));
                }
                return Ok(());
            }
            pending.extend_from_slice(&buf[..n]);
            while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line[..line.len() - 1]);
                self.log.line(text.trim_end_matches('\r'));
            }
        }
    }

    /// Block until the domain reaches a terminal state
    fn wait_for_shutdown(&self) {
        loop {
            thread::sleep(POLL_INTERVAL);
            if virsh::domstate(self.domain()).is_terminal() {
                return;
            }
        }
    }
}
