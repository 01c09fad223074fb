//! Host metadata collection
//!
//! The same record is produced on the host (client side) and inside the
//! server container (`expf metadata`), so both can be compared field by field.

use std::io;

use nix::sys::utsname::uname;
use serde::{Deserialize, Serialize};
use sysinfo::{Cpu, CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

use crate::error::AppResult;

/// Snapshot of system facts for one machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMetadata {
    pub arch: String,
    pub cpus: Vec<CpuInfo>,
    pub machine: String,
    pub platform: String,
    pub release: String,
    pub totalmem: u64,
    #[serde(rename = "type")]
    pub os_type: String,
    pub version: String,
}

/// One logical CPU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub model: String,
    /// Clock speed in MHz
    pub speed: u64,
}

impl CpuInfo {
    fn new(brand: &str, speed: u64) -> Self {
        let brand = brand.trim();
        Self {
            model: if brand.is_empty() {
                "unknown".to_string()
            } else {
                brand.to_string()
            },
            speed,
        }
    }
}

impl From<&Cpu> for CpuInfo {
    fn from(cpu: &Cpu) -> Self {
        CpuInfo::new(cpu.brand(), cpu.frequency())
    }
}

/// Collect metadata for the current machine
pub fn collect_metadata() -> AppResult<HostMetadata> {
    let uts = uname().map_err(io::Error::from)?;
    let sys = System::new_with_specifics(
        RefreshKind::nothing()
            .with_memory(MemoryRefreshKind::nothing().with_ram())
            .with_cpu(CpuRefreshKind::nothing().with_frequency()),
    );

    let cpus: Vec<CpuInfo> = sys.cpus().iter().map(CpuInfo::from).collect();
    let cpus = if cpus.is_empty() {
        tracing::debug!("CPU list unavailable, counting cores only");
        fallback_cpus()
    } else {
        cpus
    };

    Ok(HostMetadata {
        arch: node_arch(std::env::consts::ARCH).to_string(),
        cpus,
        machine: uts.machine().to_string_lossy().into_owned(),
        platform: std::env::consts::OS.to_string(),
        release: uts.release().to_string_lossy().into_owned(),
        totalmem: sys.total_memory(),
        os_type: uts.sysname().to_string_lossy().into_owned(),
        version: uts.version().to_string_lossy().into_owned(),
    })
}

/// Architecture names as reported by Node.js, so records from older
/// container images stay comparable.
fn node_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "x64",
        "x86" => "ia32",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64",
        other => other,
    }
}

fn fallback_cpus() -> Vec<CpuInfo> {
    let count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    vec![CpuInfo::new("", 0); count]
}
