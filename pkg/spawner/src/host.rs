use pkg_constants::paths::PROC_IRQ_DIR;
use pkg_types::HostResources;
use std::path::Path;
use sysinfo::System;
use tracing::info;

/// Detect CPU, memory and GPU counts of the machine the hub runs on.
pub fn detect_host_resources() -> HostResources {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu_all();

    let host = HostResources {
        cpu_count: sys.cpus().len(),
        memory_bytes: sys.total_memory(),
        gpu_count: count_gpus(Path::new(PROC_IRQ_DIR)),
    };
    info!(
        "Host resources: {} CPUs, {}GB memory, {} GPUs",
        host.cpu_count,
        host.memory_gb(),
        host.gpu_count
    );
    host
}

/// Count `nvidia` entries one level below the IRQ directory. Only NVIDIA GPUs
/// register there; an unreadable directory means no GPUs.
pub fn count_gpus(irq_dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(irq_dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| e.path().join("nvidia").exists())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_gpus() {
        let dir = tempfile::tempdir().unwrap();
        for irq in ["30", "31", "32"] {
            std::fs::create_dir(dir.path().join(irq)).unwrap();
        }
        std::fs::create_dir(dir.path().join("30").join("nvidia")).unwrap();
        std::fs::create_dir(dir.path().join("32").join("nvidia")).unwrap();
        assert_eq!(count_gpus(dir.path()), 2);
    }

    #[test]
    fn test_missing_irq_dir() {
        assert_eq!(count_gpus(Path::new("/nonexistent/irq")), 0);
    }
}
