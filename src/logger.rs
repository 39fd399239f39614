// Kernel logging for Kestrel
use alloc::boxed::Box;
use core::fmt;

use log::{LevelFilter, Metadata, Record};
use spin::Mutex;

use crate::error::{KernelError, KernelResult};

/// Byte-oriented output device
pub trait Console: Send {
    fn write_byte(&mut self, byte: u8);

    fn write_str(&mut self, s: &str) {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
    }
}

/// Console that discards everything
pub struct NullConsole;

impl Console for NullConsole {
    fn write_byte(&mut self, _byte: u8) {}
}

/// Allow formatting
struct Writer<'a>(&'a mut dyn Console);

impl fmt::Write for Writer<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

/// `log` backend writing `[LEVEL] target: message` lines to the console
pub struct KernelLogger {
    console: Mutex<Option<Box<dyn Console>>>,
}

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(console) = self.console.lock().as_mut() {
            let _ = fmt::write(
                &mut Writer(console.as_mut()),
                format_args!("[{:5}] {}: {}\n", record.level(), record.target(), record.args()),
            );
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger {
    console: Mutex::new(None),
};

/// Route `log` output to `console`, keeping records up to `level`
pub fn init(console: Box<dyn Console>, level: LevelFilter) -> KernelResult<()> {
    log::set_logger(&LOGGER).map_err(|_| KernelError::AlreadyInitialized)?;
    *LOGGER.console.lock() = Some(console);
    log::set_max_level(level);
    Ok(())
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    if let Some(console) = LOGGER.console.lock().as_mut() {
        let _ = fmt::write(&mut Writer(console.as_mut()), args);
    }
}

/// Print to the kernel console without a log prefix
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ($crate::logger::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}
