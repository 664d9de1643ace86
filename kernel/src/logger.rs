//! Kernel logging
//!
//! `log` macros everywhere; the sink is the COM1 UART on bare metal and
//! stderr on the host. Levels pass through unfiltered below `Info` only
//! when the `net_debug` feature is on.

use log::{LevelFilter, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        sink::write_line(record);
    }

    fn flush(&self) {}
}

pub fn init() {
    static INIT: spin::Once<()> = spin::Once::new();
    INIT.call_once(|| {
        sink::init();
        // set_logger only fails if a logger is already installed; the
        // Once guard makes that unreachable from here.
        let _ = log::set_logger(&LOGGER);
        let level = if cfg!(feature = "net_debug") {
            LevelFilter::Trace
        } else {
            LevelFilter::Info
        };
        log::set_max_level(level);
    });
}

#[cfg(target_os = "none")]
mod sink {
    use core::fmt::Write;

    use spin::Mutex;
    use uart_16550::SerialPort;

    static SERIAL: Mutex<Option<SerialPort>> = Mutex::new(None);

    pub fn init() {
        // SAFETY: 0x3F8 is the standard COM1 base; exclusive access is
        // serialized by the mutex.
        let mut port = unsafe { SerialPort::new(0x3F8) };
        port.init();
        *SERIAL.lock() = Some(port);
    }

    pub fn write_line(record: &log::Record) {
        let mut serial = SERIAL.lock();
        if let Some(port) = serial.as_mut() {
            let _ = writeln!(
                port,
                "[{:>5}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }
}

#[cfg(not(target_os = "none"))]
mod sink {
    pub fn init() {}

    pub fn write_line(record: &log::Record) {
        std::eprintln!(
            "[{:>5}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }
}
