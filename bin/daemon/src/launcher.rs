// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! A concrete `VatLauncher`: spawns `bundleSpec` as a subprocess and
//! speaks the dispatch contract as one JSON line per frame
//! over its stdio. Real bundle formats, sandboxing and IPC transports are
//! out of this core's scope; this is the minimal bridge that
//! lets the daemon actually run something.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Duration;

use ocap_kernel_core::{Delivery, Syscall, VatConfig};
use ocap_kernel_engine::VatDispatch;
use ocap_kernel_type::{Error, Result, VatId};

pub struct ProcessVatLauncher;

impl ocap_kernel_engine::VatLauncher for ProcessVatLauncher {
    fn launch(&mut self, vat: VatId, config: &VatConfig) -> Result<Box<dyn VatDispatch>> {
        let program = config.bundle_spec.strip_prefix("file://").unwrap_or(&config.bundle_spec);
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::vat_dispatch_failed(format!("{vat}: failed to spawn {program:?}: {e}")))?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = BufReader::new(child.stdout.take().expect("piped stdout"));
        Ok(Box::new(ProcessVat { vat, child, stdin, stdout }))
    }
}

struct ProcessVat {
    vat: VatId,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl VatDispatch for ProcessVat {
    fn deliver(&mut self, delivery: Delivery, _timeout: Duration) -> Result<Vec<Syscall>> {
        let mut line = serde_json::to_string(&delivery).map_err(|e| Error::bad_syscall(format!("{}: failed to encode delivery: {e}", self.vat)))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .map_err(|e| Error::vat_dispatch_failed(format!("{}: write to vat stdin failed: {e}", self.vat)))?;

        let mut reply = String::new();
        let read = self
            .stdout
            .read_line(&mut reply)
            .map_err(|e| Error::vat_dispatch_failed(format!("{}: read from vat stdout failed: {e}", self.vat)))?;
        if read == 0 {
            return Err(Error::vat_dispatch_failed(format!("{}: vat process closed stdout", self.vat)));
        }
        serde_json::from_str(&reply).map_err(|e| Error::bad_syscall(format!("{}: malformed syscall batch: {e}", self.vat)))
    }
}

impl Drop for ProcessVat {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
