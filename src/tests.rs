// Boot-time self test for Kestrel
use alloc::vec::Vec;

use crate::config::{DEFAULT_TIME_QUANTUM, MAX_PROCESSES};
use crate::error::{ErrorKind, KernelError};
use crate::kprintln;
use crate::process::{EventId, ProcessPriority, ProcessState};
use crate::services::memory_service::{check_heap, kfree, kmalloc, memory_stats};
use crate::services::process_service::{
    create_process_with_stack, dump_table, list_processes, scheduler_stats, set_time_quantum,
    terminate_process, wakeup,
};

type TestResult = Result<(), &'static str>;

extern "C" fn dormant() {}

/// Run every self test against the initialized services
pub fn run_all_tests() -> bool {
    kprintln!("kestrel self test");

    let results: [(&str, TestResult); 5] = [
        ("memory allocation", test_memory_allocation()),
        ("memory coalescing", test_memory_coalescing()),
        ("process lifecycle", test_process_lifecycle()),
        ("process table limits", test_table_limits()),
        ("scheduler settings", test_scheduler_settings()),
    ];

    let mut passed = true;
    for (name, result) in results.iter() {
        match result {
            Ok(()) => kprintln!("  [ok]   {}", name),
            Err(reason) => {
                passed = false;
                kprintln!("  [FAIL] {}: {}", name, reason);
            }
        }
    }
    if passed {
        kprintln!("all self tests passed");
    }
    passed
}

fn free_bytes() -> Result<usize, &'static str> {
    memory_stats().map(|s| s.free).map_err(|_| "kernel not initialized")
}

fn test_memory_allocation() -> TestResult {
    let before = free_bytes()?;

    let ptr = kmalloc(100).map_err(|_| "kmalloc(100) failed")?;
    let bytes = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), 100) };
    if bytes.iter().any(|&b| b != 0) {
        return Err("allocation not zeroed");
    }
    kfree(ptr.as_ptr()).map_err(|_| "kfree failed")?;
    match kfree(ptr.as_ptr()) {
        Err(KernelError::DoubleFree { .. }) => {}
        _ => return Err("double free not detected"),
    }
    if kmalloc(0).is_ok() {
        return Err("zero-size allocation accepted");
    }
    if free_bytes()? != before {
        return Err("free bytes not restored");
    }
    Ok(())
}

fn test_memory_coalescing() -> TestResult {
    let before = memory_stats().map_err(|_| "kernel not initialized")?;
    let blocks: Vec<_> = (0..3)
        .map(|_| kmalloc(64))
        .collect::<Result<_, _>>()
        .map_err(|_| "kmalloc(64) failed")?;

    for ptr in blocks.iter() {
        kfree(ptr.as_ptr()).map_err(|_| "kfree failed")?;
    }
    if check_heap() != Ok(true) {
        return Err("block list corrupted");
    }
    let after = memory_stats().map_err(|_| "kernel not initialized")?;
    if after.free_blocks != before.free_blocks || after.free != before.free {
        return Err("freed blocks not coalesced");
    }
    Ok(())
}

fn test_process_lifecycle() -> TestResult {
    let before = free_bytes()?;
    let pid = create_process_with_stack("selftest", dormant, ProcessPriority::Low, 512)
        .map_err(|_| "create failed")?;

    let listed = list_processes().map_err(|_| "list failed")?;
    match listed.iter().find(|p| p.pid == pid) {
        Some(info) if info.state == ProcessState::Ready && info.name == "selftest" => {}
        _ => return Err("new process not listed as Ready"),
    }
    let dump = dump_table().map_err(|_| "dump failed")?;
    if !dump.contains("selftest") {
        return Err("process missing from table dump");
    }

    terminate_process(pid).map_err(|_| "terminate failed")?;
    if terminate_process(pid) != Err(KernelError::NotFound(pid)) {
        return Err("second terminate not reported");
    }
    if free_bytes()? != before {
        return Err("stack not released");
    }
    Ok(())
}

fn test_table_limits() -> TestResult {
    let mut created = Vec::new();
    let error = loop {
        match create_process_with_stack("filler", dormant, ProcessPriority::Normal, 256) {
            Ok(pid) => created.push(pid),
            Err(e) => break e,
        }
        if created.len() > MAX_PROCESSES {
            return Err("table grew past its capacity");
        }
    };
    for pid in created.iter() {
        terminate_process(*pid).map_err(|_| "terminate failed")?;
    }
    if error != KernelError::TableFull || error.kind() != ErrorKind::ResourceExhausted {
        return Err("full table not reported as exhausted");
    }
    Ok(())
}

fn test_scheduler_settings() -> TestResult {
    if set_time_quantum(0).is_ok() {
        return Err("zero quantum accepted");
    }
    set_time_quantum(3).map_err(|_| "set quantum failed")?;
    let stats = scheduler_stats().map_err(|_| "stats failed")?;
    if stats.time_quantum != 3 {
        return Err("quantum not applied");
    }
    set_time_quantum(DEFAULT_TIME_QUANTUM).map_err(|_| "set quantum failed")?;
    if wakeup(EventId(0xFFFF)) != Ok(0) {
        return Err("wakeup without waiters woke something");
    }
    Ok(())
}
