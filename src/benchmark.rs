use crate::data_gen::{Entry, IconSize};
use crate::hash_id::HashId;
use crate::store::ContentStore;
use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Memory usage snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    /// Physical memory used by the process in bytes
    pub physical_mem: usize,
    /// Virtual memory used by the process in bytes
    pub virtual_mem: usize,
}

impl MemoryStats {
    pub fn capture() -> Self {
        if let Some(usage) = memory_stats::memory_stats() {
            Self {
                physical_mem: usage.physical_mem,
                virtual_mem: usage.virtual_mem,
            }
        } else {
            Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operation {
    Put,
    Get,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Put => "put",
            Operation::Get => "get",
        }
    }
}

/// Results from a single benchmark run
#[derive(Debug, Clone)]
pub struct BenchmarkResult {
    /// Name of the backend
    pub backend_name: String,
    pub operation: Operation,
    /// Size category being benchmarked
    pub icon_size: IconSize,
    /// All individual latencies in nanoseconds
    pub latencies_ns: Vec<u64>,
    /// Puts that found the blob already stored
    pub deduplicated: usize,
    /// Memory usage after the run
    pub memory_stats: MemoryStats,
}

impl BenchmarkResult {
    /// Calculate percentile latency (p is 0-100)
    pub fn percentile(&self, p: f64) -> Duration {
        if self.latencies_ns.is_empty() {
            return Duration::ZERO;
        }

        let mut sorted = self.latencies_ns.clone();
        sorted.sort_unstable();

        let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        Duration::from_nanos(sorted[idx])
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p95(&self) -> Duration {
        self.percentile(95.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }

    pub fn mean(&self) -> Duration {
        if self.latencies_ns.is_empty() {
            return Duration::ZERO;
        }
        let sum: u64 = self.latencies_ns.iter().sum();
        Duration::from_nanos(sum / self.latencies_ns.len() as u64)
    }

    pub fn ops_per_second(&self) -> f64 {
        if self.latencies_ns.is_empty() {
            return 0.0;
        }
        let mean_ns = self.mean().as_nanos() as f64;
        if mean_ns > 0.0 {
            1_000_000_000.0 / mean_ns
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            backend: self.backend_name.clone(),
            operation: self.operation,
            size: self.icon_size.name(),
            samples: self.latencies_ns.len(),
            deduplicated: self.deduplicated,
            p50_ns: self.p50().as_nanos() as u64,
            p95_ns: self.p95().as_nanos() as u64,
            p99_ns: self.p99().as_nanos() as u64,
            ops_per_second: self.ops_per_second(),
            physical_mem: self.memory_stats.physical_mem,
        }
    }
}

/// Flat, serializable view of a [`BenchmarkResult`]
#[derive(Debug, Clone, Serialize)]
pub struct ResultSummary {
    pub backend: String,
    pub operation: Operation,
    pub size: &'static str,
    pub samples: usize,
    pub deduplicated: usize,
    pub p50_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    pub ops_per_second: f64,
    pub physical_mem: usize,
}

/// Configuration for benchmark runs
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Number of random lookups per size category
    pub num_lookups: usize,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            num_lookups: 10_000,
            seed: 42,
        }
    }
}

/// Store every entry, then read random ids back, timing each call.
///
/// Fails if a get returns bytes other than what was put.
pub fn run_benchmark<S: ContentStore>(
    store: &mut S,
    entries: &[Entry],
    config: &BenchmarkConfig,
    verbose: bool,
) -> Result<Vec<BenchmarkResult>> {
    let backend_name = S::backend_name();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut results = Vec::new();
    let mut ids_by_size: HashMap<IconSize, Vec<(HashId, usize)>> = HashMap::new();

    if verbose {
        println!("  [{}] Starting benchmark...", backend_name);
    }

    for &size in IconSize::all() {
        let mut latencies = Vec::new();
        let mut deduplicated = 0;
        let mut seen = std::collections::HashSet::new();

        for (position, entry) in entries.iter().enumerate() {
            if entry.size_category != size {
                continue;
            }
            let start = Instant::now();
            let id = store.put(&entry.content)?;
            latencies.push(start.elapsed().as_nanos() as u64);

            if !seen.insert(id) {
                deduplicated += 1;
            }
            ids_by_size.entry(size).or_default().push((id, position));
        }

        if latencies.is_empty() {
            continue;
        }

        let result = BenchmarkResult {
            backend_name: backend_name.to_string(),
            operation: Operation::Put,
            icon_size: size,
            latencies_ns: latencies,
            deduplicated,
            memory_stats: MemoryStats::capture(),
        };
        if verbose {
            println!(
                "    [{} put] {} blobs, {} deduplicated, P50 {:?}",
                size.name(),
                result.latencies_ns.len(),
                deduplicated,
                result.p50()
            );
        }
        results.push(result);
    }

    for &size in IconSize::all() {
        let Some(ids) = ids_by_size.get(&size) else {
            continue;
        };

        if verbose {
            print!(
                "    [{} get] Running {} lookups across {} ids... ",
                size.name(),
                config.num_lookups,
                ids.len()
            );
            let _ = io::stdout().flush();
        }

        let mut latencies = Vec::with_capacity(config.num_lookups);
        let size_start = Instant::now();
        for _ in 0..config.num_lookups {
            let Some(&(id, position)) = ids.choose(&mut rng) else {
                break;
            };

            let start = Instant::now();
            let content = store.get(id)?;
            latencies.push(start.elapsed().as_nanos() as u64);

            if content.as_deref() != Some(entries[position].content.as_slice()) {
                bail!("{} returned wrong bytes for id {}", backend_name, id);
            }
        }

        if verbose {
            println!("done ({:.2?})", size_start.elapsed());
        }

        results.push(BenchmarkResult {
            backend_name: backend_name.to_string(),
            operation: Operation::Get,
            icon_size: size,
            latencies_ns: latencies,
            deduplicated: 0,
            memory_stats: MemoryStats::capture(),
        });
    }

    Ok(results)
}

/// Print benchmark results to console
pub fn print_results(results: &[BenchmarkResult]) {
    println!("\n{:=<80}", "");
    println!("Benchmark Results");
    println!("{:=<80}\n", "");

    let mut by_backend: HashMap<&str, Vec<&BenchmarkResult>> = HashMap::new();
    for result in results {
        by_backend
            .entry(&result.backend_name)
            .or_default()
            .push(result);
    }

    for (backend, backend_results) in &by_backend {
        println!("Backend: {}", backend);
        println!("{:-<72}", "");

        if let Some(last) = backend_results.last() {
            println!(
                "  Memory (physical): {:.2} MB",
                last.memory_stats.physical_mem as f64 / 1_048_576.0
            );
        }

        println!(
            "\n  {:>4} {:>8} {:>8} {:>12} {:>12} {:>12} {:>12}",
            "Op", "Size", "Dedup", "P50", "P95", "P99", "Ops/sec"
        );
        println!("  {:-<72}", "");

        for result in backend_results.iter() {
            println!(
                "  {:>4} {:>8} {:>8} {:>12.2?} {:>12.2?} {:>12.2?} {:>12.0}",
                result.operation.name(),
                result.icon_size.name(),
                result.deduplicated,
                result.p50(),
                result.p95(),
                result.p99(),
                result.ops_per_second()
            );
        }
        println!();
    }
}
