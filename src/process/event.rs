//! Sleep and event blocking.
//!
//! These only move PCBs between states. The caller reschedules afterwards
//! when the current process has blocked.

use crate::error::{KernelError, KernelResult};
use crate::process::pcb::{EventId, Pid, ProcessState};
use crate::process::table::ProcessTable;

/// Put `pid` to sleep for `ticks` timer ticks
pub fn sleep(table: &mut ProcessTable, pid: Pid, ticks: u32) -> KernelResult<()> {
    let pcb = table.get_mut(pid).ok_or(KernelError::NotFound(pid))?;
    if pcb.is_idle() {
        return Err(KernelError::IdleProcess);
    }
    pcb.sleep_ticks_remaining = ticks;
    pcb.state = ProcessState::Sleeping;
    log::trace!("pid {} sleeping for {} ticks", pid, ticks);
    Ok(())
}

/// Advance every sleeper by one tick. Returns how many became Ready.
pub fn timer_tick(table: &mut ProcessTable) -> usize {
    let mut woken = 0;
    for pcb in table.slots_mut().iter_mut() {
        if pcb.state != ProcessState::Sleeping {
            continue;
        }
        pcb.sleep_ticks_remaining = pcb.sleep_ticks_remaining.saturating_sub(1);
        if pcb.sleep_ticks_remaining == 0 {
            pcb.state = ProcessState::Ready;
            woken += 1;
            log::trace!("pid {} woke up", pcb.pid);
        }
    }
    woken
}

/// Block `pid` until `event` is signalled
pub fn wait(table: &mut ProcessTable, pid: Pid, event: EventId) -> KernelResult<()> {
    let pcb = table.get_mut(pid).ok_or(KernelError::NotFound(pid))?;
    if pcb.is_idle() {
        return Err(KernelError::IdleProcess);
    }
    pcb.wait_event = Some(event);
    pcb.state = ProcessState::Waiting;
    log::trace!("pid {} waiting on event {}", pid, event);
    Ok(())
}

/// Ready every process waiting on `event`. Returns how many were woken.
pub fn wakeup(table: &mut ProcessTable, event: EventId) -> usize {
    let mut woken = 0;
    for pcb in table.slots_mut().iter_mut() {
        if pcb.state == ProcessState::Waiting && pcb.wait_event == Some(event) {
            pcb.wait_event = None;
            pcb.state = ProcessState::Ready;
            woken += 1;
        }
    }
    log::debug!("event {} woke {} processes", event, woken);
    woken
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::FirstFitHeap;
    use crate::arch::Native;
    use crate::process::pcb::ProcessPriority;

    extern "C" fn noop() {}

    fn setup(count: usize) -> (ProcessTable, Vec<Pid>) {
        let buffer: &'static mut [u64] = vec![0u64; 1024].leak();
        let mut heap = unsafe { FirstFitHeap::new(buffer.as_mut_ptr() as *mut u8, 8192) }.unwrap();
        let mut table = ProcessTable::new();
        let pids = (0..count)
            .map(|_| {
                table
                    .create::<Native>(&mut heap, "p", Some(noop), ProcessPriority::Normal, 256)
                    .unwrap()
            })
            .collect();
        (table, pids)
    }

    #[test]
    fn sleeper_wakes_after_exactly_n_ticks() {
        let (mut table, pids) = setup(2);
        sleep(&mut table, pids[0], 3).unwrap();
        sleep(&mut table, pids[1], 1).unwrap();

        assert_eq!(timer_tick(&mut table), 1);
        assert_eq!(table.get(pids[1]).unwrap().state, ProcessState::Ready);
        assert_eq!(timer_tick(&mut table), 0);
        assert_eq!(table.get(pids[0]).unwrap().state, ProcessState::Sleeping);
        assert_eq!(table.get(pids[0]).unwrap().sleep_ticks_remaining, 1);
        assert_eq!(timer_tick(&mut table), 1);
        assert_eq!(table.get(pids[0]).unwrap().state, ProcessState::Ready);
    }

    #[test]
    fn timer_tick_leaves_other_states_alone() {
        let (mut table, pids) = setup(2);
        wait(&mut table, pids[0], EventId(1)).unwrap();
        assert_eq!(timer_tick(&mut table), 0);
        assert_eq!(table.get(pids[0]).unwrap().state, ProcessState::Waiting);
        assert_eq!(table.get(pids[1]).unwrap().state, ProcessState::Ready);
    }

    #[test]
    fn wakeup_is_a_broadcast_to_matching_waiters_only() {
        let (mut table, pids) = setup(4);
        wait(&mut table, pids[0], EventId(7)).unwrap();
        wait(&mut table, pids[1], EventId(9)).unwrap();
        wait(&mut table, pids[2], EventId(7)).unwrap();
        sleep(&mut table, pids[3], 5).unwrap();

        assert_eq!(wakeup(&mut table, EventId(7)), 2);
        assert_eq!(table.get(pids[0]).unwrap().state, ProcessState::Ready);
        assert_eq!(table.get(pids[0]).unwrap().wait_event, None);
        assert_eq!(table.get(pids[2]).unwrap().state, ProcessState::Ready);
        assert_eq!(table.get(pids[1]).unwrap().state, ProcessState::Waiting);
        assert_eq!(table.get(pids[3]).unwrap().state, ProcessState::Sleeping);

        assert_eq!(wakeup(&mut table, EventId(7)), 0);
    }

    #[test]
    fn unknown_pid_cannot_block() {
        let (mut table, _) = setup(1);
        assert_eq!(sleep(&mut table, Pid::new(5), 1), Err(KernelError::NotFound(Pid::new(5))));
        assert_eq!(
            wait(&mut table, Pid::new(5), EventId(0)),
            Err(KernelError::NotFound(Pid::new(5)))
        );
    }
}
