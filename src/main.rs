#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

extern crate alloc;

use kestrel::process::{EventId, ProcessPriority};
use kestrel::services::process_service::{self, yield_now};
use kestrel::KernelResult;

/// Signalled by `gamma`, awaited by `beta`
const DEMO_EVENT: EventId = EventId(1);

const DEMO_STACK_SIZE: usize = 16 * 1024;

extern "C" fn alpha() {
    for round in 0..4 {
        log::info!("alpha: round {}", round);
        yield_now();
    }
}

extern "C" fn beta() {
    log::info!("beta: waiting for event {}", DEMO_EVENT);
    if let Err(e) = process_service::wait(DEMO_EVENT) {
        log::warn!("beta: {}", e);
    }
    log::info!("beta: woken, sleeping 2 ticks");
    if let Err(e) = process_service::sleep(2) {
        log::warn!("beta: {}", e);
    }
    log::info!("beta: done");
}

extern "C" fn gamma() {
    for round in 0..3 {
        match process_service::wakeup(DEMO_EVENT) {
            Ok(woken) => log::info!("gamma: round {}, woke {}", round, woken),
            Err(e) => log::warn!("gamma: {}", e),
        }
        yield_now();
    }
}

fn spawn_demo_processes() -> KernelResult<()> {
    process_service::create_process_with_stack("alpha", alpha, ProcessPriority::High, DEMO_STACK_SIZE)?;
    process_service::create_process_with_stack("beta", beta, ProcessPriority::Normal, DEMO_STACK_SIZE)?;
    process_service::create_process_with_stack("gamma", gamma, ProcessPriority::Low, DEMO_STACK_SIZE)?;
    Ok(())
}

#[cfg(target_os = "none")]
mod image {
    use bootloader::{entry_point, BootInfo};
    use core::panic::PanicInfo;

    use kestrel::config::{KernelConfig, KERNEL_ARENA_SIZE};
    use kestrel::kprintln;
    use kestrel::logger;
    use kestrel::serial::SerialConsole;
    use kestrel::services::process_service;

    static mut KERNEL_ARENA: [u8; KERNEL_ARENA_SIZE] = [0; KERNEL_ARENA_SIZE];

    /// Runs when nothing else is Ready and drives the sleep clock
    extern "C" fn idle() {
        loop {
            if let Err(e) = process_service::timer_tick() {
                log::error!("idle: {}", e);
            }
            process_service::yield_now();
        }
    }

    entry_point!(kernel_main);

    fn kernel_main(_boot_info: &'static BootInfo) -> ! {
        unsafe { kestrel::allocator::init_heap() };
        if logger::init(alloc::boxed::Box::new(SerialConsole), log::LevelFilter::Info).is_err() {
            kestrel::hlt_loop();
        }
        kprintln!("Welcome to Kestrel!");

        let arena = unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_ARENA) };
        if let Err(e) = process_service::init(KernelConfig::default().with_idle(idle), arena) {
            log::error!("kernel init failed: {}", e);
            kestrel::hlt_loop();
        }

        #[cfg(feature = "self-test")]
        {
            let passed = kestrel::tests::run_all_tests();
            exit_qemu(if passed { QemuExitCode::Success } else { QemuExitCode::Failed });
        }

        if let Err(e) = super::spawn_demo_processes() {
            log::error!("demo setup failed: {}", e);
        }
        if let Ok(table) = process_service::dump_table() {
            kprintln!("{}", table);
        }
        process_service::start()
    }

    #[cfg(feature = "self-test")]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    enum QemuExitCode {
        Success = 0x10,
        Failed = 0x11,
    }

    #[cfg(feature = "self-test")]
    fn exit_qemu(exit_code: QemuExitCode) -> ! {
        use x86_64::instructions::port::Port;

        unsafe {
            let mut port = Port::new(0xf4);
            port.write(exit_code as u32);
        }
        kestrel::hlt_loop()
    }

    /// This function is called on panic.
    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        log::error!("{}", info);
        kestrel::hlt_loop();
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    use std::io::Write;

    use kestrel::arch::{Architecture, Native};
    use kestrel::config::KERNEL_ARENA_SIZE;
    use kestrel::logger::{self, Console};
    use kestrel::process::DispatchMode;
    use kestrel::KernelConfig;

    struct Stdout;

    impl Console for Stdout {
        fn write_byte(&mut self, byte: u8) {
            let _ = std::io::stdout().write_all(&[byte]);
        }

        fn write_str(&mut self, s: &str) {
            let _ = std::io::stdout().write_all(s.as_bytes());
        }
    }

    if logger::init(Box::new(Stdout), log::LevelFilter::Info).is_err() {
        return;
    }

    let switching = Native::SUPPORTED;
    let mode = if switching { DispatchMode::ContextSwitch } else { DispatchMode::Batch };
    let arena: &'static mut [u8] = vec![0u8; KERNEL_ARENA_SIZE].leak();
    let result = process_service::init(KernelConfig::default().with_dispatch_mode(mode), arena)
        .and_then(|()| spawn_demo_processes());
    if let Err(e) = result {
        log::error!("setup failed: {}", e);
        return;
    }

    if switching {
        // Nothing drives the sleep clock while every process is blocked, so
        // tick it from here between runs.
        for _ in 0..64 {
            if let Err(e) = process_service::run() {
                log::error!("run failed: {}", e);
                return;
            }
            if process_service::list_processes().map_or(true, |live| live.is_empty()) {
                break;
            }
            let _ = process_service::timer_tick();
        }
    } else {
        match process_service::run_batch() {
            Ok(count) => log::info!("batch ran {} processes", count),
            Err(e) => log::error!("batch failed: {}", e),
        }
    }

    if let Ok(stats) = process_service::scheduler_stats() {
        log::info!("{:?}", stats);
    }
    if let Ok(stats) = kestrel::services::memory_service::memory_stats() {
        log::info!("heap: {}", stats);
    }
}
