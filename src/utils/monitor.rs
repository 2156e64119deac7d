use serde::Serialize;

/// 某個階段結束時的行程資源快照，附在該階段的報告上
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStats {
    pub stage: String,
    pub cpu_percent: f32,
    pub memory_mb: u64,
    pub memory_percent: f32,
    pub peak_memory_mb: u64,
    pub elapsed_ms: u64,
}

#[cfg(feature = "cli")]
mod imp {
    use super::SystemStats;
    use std::sync::Mutex;
    use std::time::Instant;
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

    struct Sampler {
        system: System,
        peak_memory_mb: u64,
    }

    /// 以 `--monitor` 開啟，只取本行程的 CPU 與記憶體
    pub struct SystemMonitor {
        sampler: Option<Mutex<Sampler>>,
        pid: Option<Pid>,
        started: Instant,
    }

    impl SystemMonitor {
        pub fn new(enabled: bool) -> Self {
            let pid = if enabled {
                match sysinfo::get_current_pid() {
                    Ok(pid) => Some(pid),
                    Err(e) => {
                        tracing::warn!("⚠️ Unable to resolve current PID, stats disabled: {}", e);
                        None
                    }
                }
            } else {
                None
            };

            let sampler = pid.map(|_| {
                let mut system = System::new();
                system.refresh_memory();
                Mutex::new(Sampler {
                    system,
                    peak_memory_mb: 0,
                })
            });

            Self {
                sampler,
                pid,
                started: Instant::now(),
            }
        }

        pub fn snapshot(&self, stage: &str) -> Option<SystemStats> {
            let pid = self.pid?;
            let mut sampler = self.sampler.as_ref()?.lock().ok()?;
            sampler.system.refresh_memory();
            sampler.system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::nothing().with_cpu().with_memory(),
            );

            let (cpu_percent, memory_mb) = {
                let process = sampler.system.process(pid)?;
                (process.cpu_usage(), process.memory() / 1024 / 1024)
            };
            let total_mb = sampler.system.total_memory() / 1024 / 1024;
            sampler.peak_memory_mb = sampler.peak_memory_mb.max(memory_mb);

            Some(SystemStats {
                stage: stage.to_string(),
                cpu_percent,
                memory_mb,
                memory_percent: if total_mb > 0 {
                    memory_mb as f32 / total_mb as f32 * 100.0
                } else {
                    0.0
                },
                peak_memory_mb: sampler.peak_memory_mb,
                elapsed_ms: self.started.elapsed().as_millis() as u64,
            })
        }

        pub fn is_enabled(&self) -> bool {
            self.sampler.is_some()
        }
    }
}

// 非 CLI 建置沒有 sysinfo，監控一律關閉
#[cfg(not(feature = "cli"))]
mod imp {
    use super::SystemStats;

    pub struct SystemMonitor;

    impl SystemMonitor {
        pub fn new(_enabled: bool) -> Self {
            Self
        }

        pub fn snapshot(&self, _stage: &str) -> Option<SystemStats> {
            None
        }

        pub fn is_enabled(&self) -> bool {
            false
        }
    }
}

pub use imp::SystemMonitor;

impl SystemMonitor {
    /// 取樣並寫一行日誌，回傳快照供報告使用
    pub fn log_stats(&self, stage: &str) -> Option<SystemStats> {
        let stats = self.snapshot(stage)?;
        tracing::info!(
            "📊 {} - CPU: {:.1}%, Memory: {}MB ({:.1}%), Peak: {}MB, Elapsed: {}ms",
            stats.stage,
            stats.cpu_percent,
            stats.memory_mb,
            stats.memory_percent,
            stats.peak_memory_mb,
            stats.elapsed_ms
        );
        Some(stats)
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}
