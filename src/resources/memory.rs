use sysinfo::{Pid, ProcessesToUpdate, System};

/// Source of process memory readings
pub trait MemoryProbe: Send + Sync {
    /// Resident memory in megabytes
    fn sample_mb(&self) -> f64;

    /// Forces whatever reclaim the probe's runtime supports
    fn reclaim(&self) {}
}

/// Reads this process's resident set size through `sysinfo`
pub struct ProcessMemoryProbe {
    pid: Pid,
    system: parking_lot::Mutex<System>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        Self {
            pid: Pid::from_u32(std::process::id()),
            system: parking_lot::Mutex::new(System::new()),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn sample_mb(&self) -> f64 {
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        system
            .process(self.pid)
            .map(|process| process.memory() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0)
    }
}
