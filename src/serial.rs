// COM1 console for Kestrel
use lazy_static::lazy_static;
use spin::Mutex;
use uart_16550::SerialPort;

use crate::logger::Console;

lazy_static! {
    pub static ref SERIAL1: Mutex<SerialPort> = {
        let mut serial_port = unsafe { SerialPort::new(0x3F8) };
        serial_port.init();
        Mutex::new(serial_port)
    };
}

/// Kernel console on the first serial port
pub struct SerialConsole;

impl Console for SerialConsole {
    fn write_byte(&mut self, byte: u8) {
        let mut port = SERIAL1.lock();
        if byte == b'\n' {
            port.send(b'\r');
        }
        port.send(byte);
    }
}
