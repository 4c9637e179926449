use crate::config::SamplerBackend;
use crate::process::types::{ProcessId, ResourceUsage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::task::JoinSet;

/// One process of a sampled tree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeRow {
    pub cpu_percent: f64,
    /// Resident set size in kibibytes
    pub rss_kib: u64,
}

/// Source of per-process statistics for a whole process group
pub trait ProcessTreeQuery: Send + Sync + 'static {
    /// Rows for the group led by `pgid`. An empty vec means nothing was found.
    fn query(&self, pgid: u32) -> io::Result<Vec<TreeRow>>;
}

/// Queries `ps` and keeps the rows belonging to the process group.
///
/// Supervised shells lead their own group, so the group covers the shell and
/// every descendant it started.
#[derive(Debug, Default, Clone, Copy)]
pub struct PsQuery;

impl ProcessTreeQuery for PsQuery {
    fn query(&self, pgid: u32) -> io::Result<Vec<TreeRow>> {
        let output = std::process::Command::new("ps")
            .args(["-A", "-o", "pgid=,%cpu=,rss="])
            .output()?;

        if !output.status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("ps exited with {}", output.status),
            ));
        }

        Ok(parse_ps_rows(&String::from_utf8_lossy(&output.stdout), pgid))
    }
}

/// Parse `pgid %cpu rss` rows, keeping those of `pgid`.
///
/// Rows with fewer than three columns are skipped; unparseable numbers count
/// as zero.
pub fn parse_ps_rows(output: &str, pgid: u32) -> Vec<TreeRow> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let group = fields.next()?.parse::<u32>().ok()?;
            let cpu = fields.next()?;
            let rss = fields.next()?;
            if group != pgid {
                return None;
            }
            Some(TreeRow {
                cpu_percent: cpu.parse().unwrap_or(0.0),
                rss_kib: rss.parse().unwrap_or(0),
            })
        })
        .collect()
}

/// Walks a `sysinfo` snapshot for the root process and all its descendants
pub struct SysinfoQuery {
    system: Mutex<System>,
}

impl SysinfoQuery {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTreeQuery for SysinfoQuery {
    fn query(&self, pgid: u32) -> io::Result<Vec<TreeRow>> {
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );

        let root = Pid::from_u32(pgid);
        if system.process(root).is_none() {
            return Ok(Vec::new());
        }

        let rows = system
            .processes()
            .iter()
            .filter(|(pid, _)| descends_from(&system, **pid, root))
            .map(|(_, process)| TreeRow {
                cpu_percent: f64::from(process.cpu_usage()),
                rss_kib: process.memory() / 1024,
            })
            .collect();

        Ok(rows)
    }
}

fn descends_from(system: &System, pid: Pid, root: Pid) -> bool {
    let mut current = Some(pid);
    // Bounded walk in case the parent table is inconsistent
    for _ in 0..256 {
        match current {
            Some(p) if p == root => return true,
            Some(p) => current = system.process(p).and_then(|proc_| proc_.parent()),
            None => return false,
        }
    }
    false
}

/// Sum a tree's rows: CPU rounded to one decimal, memory in bytes
pub fn aggregate(rows: &[TreeRow]) -> ResourceUsage {
    let cpu: f64 = rows.iter().map(|r| r.cpu_percent).sum();
    let rss_kib: u64 = rows.iter().map(|r| r.rss_kib).sum();

    ResourceUsage {
        cpu: (cpu * 10.0).round() / 10.0,
        memory_bytes: rss_kib.saturating_mul(1024),
    }
}

/// Samples CPU and memory of supervised process trees
#[derive(Clone)]
pub struct ResourceSampler {
    query: Arc<dyn ProcessTreeQuery>,
}

impl ResourceSampler {
    pub fn new(query: Arc<dyn ProcessTreeQuery>) -> Self {
        Self { query }
    }

    pub fn from_backend(backend: SamplerBackend) -> Self {
        match backend {
            SamplerBackend::Ps => Self::new(Arc::new(PsQuery)),
            SamplerBackend::Sysinfo => Self::new(Arc::new(SysinfoQuery::new())),
        }
    }

    /// Query every process group concurrently. Failures degrade to zero usage
    /// for that id; they never fail the pass.
    pub async fn sample(&self, pids: HashMap<ProcessId, u32>) -> HashMap<ProcessId, ResourceUsage> {
        if pids.is_empty() {
            return HashMap::new();
        }

        let mut result: HashMap<ProcessId, ResourceUsage> = pids
            .keys()
            .map(|id| (id.clone(), ResourceUsage::default()))
            .collect();

        let mut tasks = JoinSet::new();
        for (id, pid) in pids {
            let query = self.query.clone();
            tasks.spawn_blocking(move || {
                let usage = match query.query(pid) {
                    Ok(rows) => aggregate(&rows),
                    Err(e) => {
                        tracing::debug!("Resource query for process {} (PID: {}) failed: {}", id, pid, e);
                        ResourceUsage::default()
                    }
                };
                (id, usage)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, usage)) => {
                    result.insert(id, usage);
                }
                Err(e) => tracing::warn!("Resource query task failed: {}", e),
            }
        }

        result
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::from_backend(SamplerBackend::default())
    }
}
