//! Host interface for the VM's I/O intrinsics.
//!
//! OPEN, READ, CLOS and PRTF bottom out here. The VM resolves every address
//! against its own memory before crossing the boundary, so hosts only ever
//! see plain byte slices and descriptor numbers. Tests run on [`CaptureHost`];
//! the CLI runs on [`SystemHost`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};

use crate::executor::VmError;
use crate::memory::Memory;

/// The I/O boundary the VM is constructed against.
///
/// All methods use the C calling convention for results: a non-negative
/// value on success, -1 on failure. Failures are surfaced to the compiled
/// program as-is; they are its responsibility, not the interpreter's.
pub trait Host {
    /// Open `path`. Only flag 0 (read-only) is meaningful to compiled code.
    fn open(&mut self, path: &[u8], flags: i64) -> i64;

    /// Close a descriptor previously returned by [`Host::open`].
    fn close(&mut self, fd: i64) -> i64;

    /// Read up to `buf.len()` bytes into `buf`, returning the count.
    fn read(&mut self, fd: i64, buf: &mut [u8]) -> i64;

    /// Write rendered PRTF output, returning the byte count.
    fn write(&mut self, bytes: &[u8]) -> i64;
}

/// Render a PRTF format string against VM memory.
///
/// Supports `%d`, `%x`, `%c`, `%s` and `%%`; any other sequence is copied
/// through verbatim. Missing arguments read as zero so rendering stays
/// deterministic.
pub(crate) fn render_printf(
    memory: &Memory,
    format_addr: i64,
    args: &[i64],
) -> Result<Vec<u8>, VmError> {
    fn take(args: &[i64], cursor: &mut usize) -> i64 {
        let value = args.get(*cursor).copied().unwrap_or(0);
        *cursor += 1;
        value
    }

    let format = memory.read_cstr(format_addr)?;
    let mut out = Vec::with_capacity(format.len());
    let mut cursor = 0usize;

    let mut i = 0;
    while i < format.len() {
        let c = format[i];
        if c != b'%' || i + 1 >= format.len() {
            out.push(c);
            i += 1;
            continue;
        }
        i += 2;
        match format[i - 1] {
            b'd' => out.extend_from_slice(take(args, &mut cursor).to_string().as_bytes()),
            b'x' => out.extend_from_slice(format!("{:x}", take(args, &mut cursor)).as_bytes()),
            b'c' => out.push(take(args, &mut cursor) as u8),
            b's' => out.extend_from_slice(&memory.read_cstr(take(args, &mut cursor))?),
            b'%' => out.push(b'%'),
            other => {
                out.push(b'%');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// Real files and stdout. First descriptor handed out is 3.
pub struct SystemHost {
    files: HashMap<i64, File>,
    next_fd: i64,
}

impl SystemHost {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            next_fd: 3,
        }
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for SystemHost {
    fn open(&mut self, path: &[u8], flags: i64) -> i64 {
        if flags != 0 {
            return -1;
        }
        let path = String::from_utf8_lossy(path).into_owned();
        match File::open(&path) {
            Ok(file) => {
                let fd = self.next_fd;
                self.next_fd += 1;
                self.files.insert(fd, file);
                fd
            }
            Err(_) => -1,
        }
    }

    fn close(&mut self, fd: i64) -> i64 {
        match self.files.remove(&fd) {
            Some(_) => 0,
            None => -1,
        }
    }

    fn read(&mut self, fd: i64, buf: &mut [u8]) -> i64 {
        match self.files.get_mut(&fd) {
            Some(file) => match file.read(buf) {
                Ok(n) => n as i64,
                Err(_) => -1,
            },
            None => -1,
        }
    }

    fn write(&mut self, bytes: &[u8]) -> i64 {
        let mut stdout = std::io::stdout();
        match stdout.write_all(bytes).and_then(|_| stdout.flush()) {
            Ok(()) => bytes.len() as i64,
            Err(_) => -1,
        }
    }
}

/// In-memory host: preloaded files, captured output. Deterministic by
/// construction, which is what the replay tests lean on.
pub struct CaptureHost {
    files: HashMap<String, Vec<u8>>,
    open_files: HashMap<i64, (String, usize)>,
    next_fd: i64,
    output: Vec<u8>,
}

impl CaptureHost {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            open_files: HashMap::new(),
            next_fd: 3,
            output: Vec::new(),
        }
    }

    /// Preload a file visible to the compiled program's `open`.
    pub fn with_file(mut self, path: &str, contents: &[u8]) -> Self {
        self.files.insert(path.to_string(), contents.to_vec());
        self
    }

    /// Everything the program printed.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl Default for CaptureHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for CaptureHost {
    fn open(&mut self, path: &[u8], flags: i64) -> i64 {
        if flags != 0 {
            return -1;
        }
        let path = String::from_utf8_lossy(path).into_owned();
        if !self.files.contains_key(&path) {
            return -1;
        }
        let fd = self.next_fd;
        self.next_fd += 1;
        self.open_files.insert(fd, (path, 0));
        fd
    }

    fn close(&mut self, fd: i64) -> i64 {
        match self.open_files.remove(&fd) {
            Some(_) => 0,
            None => -1,
        }
    }

    fn read(&mut self, fd: i64, buf: &mut [u8]) -> i64 {
        let Some((path, offset)) = self.open_files.get_mut(&fd) else {
            return -1;
        };
        let Some(contents) = self.files.get(path.as_str()) else {
            return -1;
        };
        let remaining = &contents[(*offset).min(contents.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        *offset += n;
        n as i64
    }

    fn write(&mut self, bytes: &[u8]) -> i64 {
        self.output.extend_from_slice(bytes);
        bytes.len() as i64
    }
}
