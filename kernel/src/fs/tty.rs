//! TTY line discipline and PTY pairs
//!
//! A TTY vnode carries canonical-mode line editing (VERASE/VKILL),
//! signal generation to the foreground process group (VINTR/VQUIT/
//! VSUSP), IXON/IXOFF flow control and ECHO/ECHOE/ECHOK, over a fixed
//! input ring with in/out pointers and a data-ready event. PTY pairs
//! wire a master device to a subordinate TTY.

use alloc::{boxed::Box, collections::VecDeque, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::error::{Result, Status};
use crate::sync::event::Event;
use crate::sync::wait;

pub const NCCS: usize = 11;

// cc[] indices.
pub const VINTR: usize = 0;
pub const VQUIT: usize = 1;
pub const VERASE: usize = 2;
pub const VKILL: usize = 3;
pub const VEOF: usize = 4;
pub const VMIN: usize = 6;
pub const VSTART: usize = 8;
pub const VSTOP: usize = 9;
pub const VSUSP: usize = 10;

// Signals the discipline raises.
const SIGINT: u8 = 2;
const SIGQUIT: u8 = 3;
const SIGTSTP: u8 = 20;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InputFlags: u32 {
        const ICRNL = 1 << 0;
        const IGNCR = 1 << 1;
        const INLCR = 1 << 2;
        const IXON = 1 << 3;
        const IXOFF = 1 << 4;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OutputFlags: u32 {
        const OPOST = 1 << 0;
        const ONLCR = 1 << 1;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LocalFlags: u32 {
        const ICANON = 1 << 0;
        const ECHO = 1 << 1;
        const ECHOE = 1 << 2;
        const ECHOK = 1 << 3;
        const ISIG = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Termios {
    pub iflag: InputFlags,
    pub oflag: OutputFlags,
    pub lflag: LocalFlags,
    pub cflag: u32,
    pub cc: [u8; NCCS],
}

impl Termios {
    /// Cooked defaults: canonical editing, echo, signals, ^C ^\ ^Z etc.
    pub fn cooked() -> Self {
        let mut cc = [0u8; NCCS];
        cc[VINTR] = 0x03; // ^C
        cc[VQUIT] = 0x1C; // ^\
        cc[VERASE] = 0x7F;
        cc[VKILL] = 0x15; // ^U
        cc[VEOF] = 0x04; // ^D
        cc[VMIN] = 1;
        cc[VSTART] = 0x11; // ^Q
        cc[VSTOP] = 0x13; // ^S
        cc[VSUSP] = 0x1A; // ^Z
        Self {
            iflag: InputFlags::ICRNL | InputFlags::IXON,
            oflag: OutputFlags::OPOST | OutputFlags::ONLCR,
            lflag: LocalFlags::ICANON
                | LocalFlags::ECHO
                | LocalFlags::ECHOE
                | LocalFlags::ECHOK
                | LocalFlags::ISIG,
            cflag: 0,
            cc,
        }
    }

    pub const WIRE_SIZE: usize = 16 + NCCS;

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..4].copy_from_slice(&self.iflag.bits().to_le_bytes());
        out[4..8].copy_from_slice(&self.oflag.bits().to_le_bytes());
        out[8..12].copy_from_slice(&self.lflag.bits().to_le_bytes());
        out[12..16].copy_from_slice(&self.cflag.to_le_bytes());
        out[16..].copy_from_slice(&self.cc);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::WIRE_SIZE {
            return Err(Status::InvalidArgument);
        }
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let mut cc = [0u8; NCCS];
        cc.copy_from_slice(&bytes[16..16 + NCCS]);
        Ok(Self {
            iflag: InputFlags::from_bits_truncate(word(0)),
            oflag: OutputFlags::from_bits_truncate(word(4)),
            lflag: LocalFlags::from_bits_truncate(word(8)),
            cflag: word(12),
            cc,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Winsize {
    pub rows: u16,
    pub cols: u16,
}

// IOCTL numbers (Linux-compatible values).
pub const TCGETS: u32 = 0x5401;
pub const TCSETS: u32 = 0x5402;
pub const TCXONC: u32 = 0x540A;
pub const TIOCGPGRP: u32 = 0x540F;
pub const TIOCSPGRP: u32 = 0x5410;
pub const TIOCGWINSZ: u32 = 0x5413;
pub const TIOCSWINSZ: u32 = 0x5414;

const INPUT_RING_SIZE: usize = 4096;

/// Classic in/out pointer ring; full when advancing in would hit out.
struct InputRing {
    buf: [u8; INPUT_RING_SIZE],
    in_ptr: usize,
    out_ptr: usize,
}

impl InputRing {
    const fn new() -> Self {
        Self {
            buf: [0; INPUT_RING_SIZE],
            in_ptr: 0,
            out_ptr: 0,
        }
    }

    fn push(&mut self, byte: u8) -> bool {
        let next = (self.in_ptr + 1) % INPUT_RING_SIZE;
        if next == self.out_ptr {
            return false; // full: the byte is dropped, like any tty
        }
        self.buf[self.in_ptr] = byte;
        self.in_ptr = next;
        true
    }

    fn pop(&mut self) -> Option<u8> {
        if self.out_ptr == self.in_ptr {
            return None;
        }
        let byte = self.buf[self.out_ptr];
        self.out_ptr = (self.out_ptr + 1) % INPUT_RING_SIZE;
        Some(byte)
    }

    fn is_empty(&self) -> bool {
        self.out_ptr == self.in_ptr
    }
}

/// Where completed output bytes go (UART, PTY master, test sink).
pub trait TtyOutput: Send + Sync {
    fn write(&self, bytes: &[u8]);
}

pub struct Tty {
    termios: spin::RwLock<Termios>,
    winsize: spin::RwLock<Winsize>,
    fg_pgrp: AtomicU32,
    ring: spin::Mutex<InputRing>,
    /// Line under canonical edit; moves to the ring on newline/EOF.
    canon_line: spin::Mutex<Vec<u8>>,
    pub data_ready: Event,
    output_stopped: AtomicBool,
    /// Output held back while stopped by IXON flow control.
    held_output: spin::Mutex<VecDeque<u8>>,
    sink: spin::RwLock<Option<Box<dyn TtyOutput>>>,
}

impl Tty {
    pub fn new() -> Arc<Tty> {
        Arc::new(Tty {
            termios: spin::RwLock::new(Termios::cooked()),
            winsize: spin::RwLock::new(Winsize { rows: 25, cols: 80 }),
            fg_pgrp: AtomicU32::new(0),
            ring: spin::Mutex::new(InputRing::new()),
            canon_line: spin::Mutex::new(Vec::new()),
            data_ready: Event::notification(),
            output_stopped: AtomicBool::new(false),
            held_output: spin::Mutex::new(VecDeque::new()),
            sink: spin::RwLock::new(None),
        })
    }

    pub fn set_sink(&self, sink: Box<dyn TtyOutput>) {
        *self.sink.write() = Some(sink);
    }

    pub fn foreground_pgrp(&self) -> u32 {
        self.fg_pgrp.load(Ordering::Relaxed)
    }

    pub fn set_foreground_pgrp(&self, pgrp: u32) {
        self.fg_pgrp.store(pgrp, Ordering::Relaxed);
    }

    fn echo(&self, bytes: &[u8]) {
        if let Some(sink) = &*self.sink.read() {
            sink.write(bytes);
        }
    }

    fn raise(&self, signum: u8) {
        let pgrp = self.foreground_pgrp();
        if pgrp != 0 {
            let _ = crate::sched::process::signal_pgrp(pgrp, signum);
        }
    }

    /// Feed received bytes through the line discipline (IRQ/DPC side).
    pub fn input_bytes(&self, bytes: &[u8]) {
        let termios = *self.termios.read();
        for &raw in bytes {
            let mut byte = raw;

            if termios.lflag.contains(LocalFlags::ISIG) {
                if byte == termios.cc[VINTR] {
                    self.raise(SIGINT);
                    continue;
                }
                if byte == termios.cc[VQUIT] {
                    self.raise(SIGQUIT);
                    continue;
                }
                if byte == termios.cc[VSUSP] {
                    self.raise(SIGTSTP);
                    continue;
                }
            }

            if termios.iflag.contains(InputFlags::IXON) {
                if byte == termios.cc[VSTOP] {
                    self.output_stopped.store(true, Ordering::Release);
                    continue;
                }
                if byte == termios.cc[VSTART] {
                    self.resume_output();
                    continue;
                }
            }

            if byte == b'\r' {
                if termios.iflag.contains(InputFlags::IGNCR) {
                    continue;
                }
                if termios.iflag.contains(InputFlags::ICRNL) {
                    byte = b'\n';
                }
            } else if byte == b'\n' && termios.iflag.contains(InputFlags::INLCR) {
                byte = b'\r';
            }

            if termios.lflag.contains(LocalFlags::ICANON) {
                self.canon_input(byte, &termios);
            } else {
                self.ring.lock().push(byte);
                if termios.lflag.contains(LocalFlags::ECHO) {
                    self.echo(&[byte]);
                }
                self.data_ready.set();
            }
        }
    }

    fn canon_input(&self, byte: u8, termios: &Termios) {
        let mut line = self.canon_line.lock();

        if byte == termios.cc[VERASE] {
            if line.pop().is_some() && termios.lflag.contains(LocalFlags::ECHOE) {
                self.echo(b"\x08 \x08");
            }
            return;
        }
        if byte == termios.cc[VKILL] {
            let n = line.len();
            line.clear();
            if termios.lflag.contains(LocalFlags::ECHOK) {
                for _ in 0..n {
                    self.echo(b"\x08 \x08");
                }
            }
            return;
        }

        let eof = byte == termios.cc[VEOF];
        if !eof {
            line.push(byte);
            if termios.lflag.contains(LocalFlags::ECHO) {
                self.echo(&[byte]);
            }
        }

        if byte == b'\n' || eof {
            let mut ring = self.ring.lock();
            for &b in line.iter() {
                ring.push(b);
            }
            line.clear();
            drop(ring);
            self.data_ready.set();
        }
    }

    /// Read cooked input; blocks (below DISPATCH) until data is ready.
    pub fn read(&self, buf: &mut [u8], nonblock: bool) -> Result<usize> {
        loop {
            {
                let mut ring = self.ring.lock();
                if !ring.is_empty() {
                    let mut n = 0;
                    while n < buf.len() {
                        match ring.pop() {
                            Some(b) => {
                                buf[n] = b;
                                n += 1;
                                // Canonical reads stop at line end.
                                if b == b'\n'
                                    && self.termios.read().lflag.contains(LocalFlags::ICANON)
                                {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    if ring.is_empty() {
                        self.data_ready.clear();
                    }
                    return Ok(n);
                }
            }
            if nonblock {
                return Err(Status::WouldBlock);
            }
            wait::wait_on(self.data_ready.header())?;
        }
    }

    /// Write through output processing and flow control to the sink.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let termios = *self.termios.read();
        let mut processed: Vec<u8> = Vec::with_capacity(data.len());
        for &b in data {
            if b == b'\n'
                && termios.oflag.contains(OutputFlags::OPOST)
                && termios.oflag.contains(OutputFlags::ONLCR)
            {
                processed.push(b'\r');
            }
            processed.push(b);
        }
        if self.output_stopped.load(Ordering::Acquire) {
            self.held_output.lock().extend(processed.iter().copied());
        } else {
            self.echo(&processed);
        }
        Ok(data.len())
    }

    fn resume_output(&self) {
        self.output_stopped.store(false, Ordering::Release);
        let held: Vec<u8> = self.held_output.lock().drain(..).collect();
        if !held.is_empty() {
            self.echo(&held);
        }
    }

    pub fn ioctl(&self, request: u32, arg: &mut [u8]) -> Result<usize> {
        match request {
            TCGETS => {
                let bytes = self.termios.read().to_bytes();
                if arg.len() < bytes.len() {
                    return Err(Status::InvalidArgument);
                }
                arg[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            TCSETS => {
                *self.termios.write() = Termios::from_bytes(arg)?;
                Ok(0)
            }
            TIOCGWINSZ => {
                if arg.len() < 4 {
                    return Err(Status::InvalidArgument);
                }
                let ws = *self.winsize.read();
                arg[0..2].copy_from_slice(&ws.rows.to_le_bytes());
                arg[2..4].copy_from_slice(&ws.cols.to_le_bytes());
                Ok(4)
            }
            TIOCSWINSZ => {
                if arg.len() < 4 {
                    return Err(Status::InvalidArgument);
                }
                *self.winsize.write() = Winsize {
                    rows: u16::from_le_bytes([arg[0], arg[1]]),
                    cols: u16::from_le_bytes([arg[2], arg[3]]),
                };
                Ok(0)
            }
            TIOCGPGRP => {
                if arg.len() < 4 {
                    return Err(Status::InvalidArgument);
                }
                arg[0..4].copy_from_slice(&self.foreground_pgrp().to_le_bytes());
                Ok(4)
            }
            TIOCSPGRP => {
                if arg.len() < 4 {
                    return Err(Status::InvalidArgument);
                }
                self.set_foreground_pgrp(u32::from_le_bytes([arg[0], arg[1], arg[2], arg[3]]));
                Ok(0)
            }
            TCXONC => {
                match arg.first().copied().unwrap_or(0) {
                    0 => self.output_stopped.store(true, Ordering::Release),
                    1 => self.resume_output(),
                    _ => return Err(Status::InvalidArgument),
                }
                Ok(0)
            }
            _ => Err(Status::InvalidIoctl),
        }
    }
}

/// PTY master: reads what the subordinate TTY emits, writes raw input
/// into its line discipline.
pub struct PtyMaster {
    pub tty: Arc<Tty>,
    out: Arc<spin::Mutex<VecDeque<u8>>>,
    pub out_ready: Arc<Event>,
    /// Subordinate stays unusable until unlocked (pts lock protocol).
    pub locked: AtomicBool,
}

struct PtySink {
    out: Arc<spin::Mutex<VecDeque<u8>>>,
    ready: Arc<Event>,
}

impl TtyOutput for PtySink {
    fn write(&self, bytes: &[u8]) {
        self.out.lock().extend(bytes.iter().copied());
        self.ready.set();
    }
}

/// Create a PTY pair: (master, subordinate tty).
pub fn create_pty() -> (Arc<PtyMaster>, Arc<Tty>) {
    let tty = Tty::new();
    let out = Arc::new(spin::Mutex::new(VecDeque::new()));
    let ready = Arc::new(Event::notification());
    tty.set_sink(Box::new(PtySink {
        out: out.clone(),
        ready: ready.clone(),
    }));
    let master = Arc::new(PtyMaster {
        tty: tty.clone(),
        out,
        out_ready: ready,
        locked: AtomicBool::new(true),
    });
    (master, tty)
}

impl PtyMaster {
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Master-side read of subordinate output.
    pub fn read(&self, buf: &mut [u8], nonblock: bool) -> Result<usize> {
        loop {
            {
                let mut out = self.out.lock();
                if !out.is_empty() {
                    let n = buf.len().min(out.len());
                    for slot in buf.iter_mut().take(n) {
                        *slot = out.pop_front().unwrap_or(0);
                    }
                    if out.is_empty() {
                        self.out_ready.clear();
                    }
                    return Ok(n);
                }
            }
            if nonblock {
                return Err(Status::WouldBlock);
            }
            wait::wait_on(self.out_ready.header())?;
        }
    }

    /// Master-side write: raw bytes into the subordinate's discipline.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.tty.input_bytes(data);
        Ok(data.len())
    }
}
