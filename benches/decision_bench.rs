// Decision latency benchmark
// Measures the per-invocation cost of the policy check and of one audit append
// Target: decide p95 < 1ms with 500 deny entries, append p95 < 5ms

use agent_locker::decision::{CommandInvocation, Engine};
use agent_locker::observability::audit::{AuditEntry, AuditLog};
use agent_locker::paths::canonicalize::{CaseSensitivity, Canonicalizer};
use agent_locker::paths::tokens::NoLookup;
use agent_locker::policy::Policy;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const ITERATIONS: usize = 1000;
const WARMUP_ITERATIONS: usize = 50;
const DENY_ENTRIES: usize = 500;

/// Latency percentiles
struct LatencyStats {
    p50: Duration,
    p95: Duration,
    p99: Duration,
    min: Duration,
    max: Duration,
    mean: Duration,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<Duration>) -> Self {
        samples.sort();
        let len = samples.len();

        let p50_idx = (len as f64 * 0.50) as usize;
        let p95_idx = (len as f64 * 0.95) as usize;
        let p99_idx = (len as f64 * 0.99) as usize;

        let sum: Duration = samples.iter().sum();
        let mean = sum / len as u32;

        Self {
            p50: samples[p50_idx],
            p95: samples[p95_idx],
            p99: samples[p99_idx],
            min: samples[0],
            max: samples[len - 1],
            mean,
        }
    }

    fn print(&self, label: &str) {
        println!("\n{}", label);
        println!("  p50: {:?}", self.p50);
        println!("  p95: {:?}", self.p95);
        println!("  p99: {:?}", self.p99);
        println!("  min: {:?}", self.min);
        println!("  max: {:?}", self.max);
        println!("  mean: {:?}", self.mean);
    }
}

struct BenchmarkResult {
    scenario: String,
    stats: LatencyStats,
    budget: Duration,
}

impl BenchmarkResult {
    fn passed(&self) -> bool {
        self.stats.p95 < self.budget
    }

    fn print(&self) {
        println!("\n=== {} ===", self.scenario);
        self.stats.print("Latency");
        if self.passed() {
            println!("PASS");
        } else {
            println!("FAIL: p95={:?} (target <{:?})", self.stats.p95, self.budget);
        }
    }
}

fn measure(mut op: impl FnMut()) -> LatencyStats {
    for _ in 0..WARMUP_ITERATIONS {
        op();
    }
    let samples = (0..ITERATIONS)
        .map(|_| {
            let start = Instant::now();
            op();
            start.elapsed()
        })
        .collect();
    LatencyStats::from_samples(samples)
}

fn engine() -> Engine {
    let entries = (0..DENY_ENTRIES).map(|n| format!("/srv/secret-{n}/data"));
    let canonicalizer =
        Canonicalizer::new(CaseSensitivity::Sensitive).with_home(Some(PathBuf::from("/home/bench")));
    Engine::from_policy(&Policy::new(true, entries), Path::new("/"), canonicalizer)
        .with_resolver(Box::new(NoLookup))
}

fn invocation() -> CommandInvocation {
    let argv = [
        "codex",
        "--model",
        "gpt-5",
        "--config=./agent.toml",
        "src/main.rs",
        "../notes/plan.md",
        "~/projects/app",
    ];
    CommandInvocation::new(argv.iter().map(|s| s.to_string()).collect(), "/home/bench/work")
}

fn benchmark_decide() -> BenchmarkResult {
    let engine = engine();
    let inv = invocation();
    let stats = measure(|| {
        let decision = engine.decide(&inv);
        assert!(!decision.is_blocked());
    });
    BenchmarkResult {
        scenario: format!("decide ({} deny entries)", DENY_ENTRIES),
        stats,
        budget: Duration::from_millis(1),
    }
}

fn benchmark_audit_append() -> BenchmarkResult {
    let dir = tempfile::TempDir::new().unwrap();
    let audit = AuditLog::new(dir.path().join("audit.log"));
    let engine = engine();
    let inv = invocation();
    let cancel = agent_locker::exec::CancellationToken::new();
    let supervisor = agent_locker::exec::ProcessSupervisor::new(Duration::from_millis(100));
    let report = engine.run(&inv, &supervisor, &cancel);
    let entry = AuditEntry::from_report(&report);

    let stats = measure(|| {
        audit.append(&entry).unwrap();
    });
    BenchmarkResult {
        scenario: "audit append (fsync)".to_string(),
        stats,
        budget: Duration::from_millis(5),
    }
}

fn main() {
    println!("agent-locker decision benchmark");
    println!("iterations: {}, warmup: {}", ITERATIONS, WARMUP_ITERATIONS);

    let results = vec![benchmark_decide(), benchmark_audit_append()];
    for result in &results {
        result.print();
    }

    let failed = results.iter().filter(|r| !r.passed()).count();
    println!("\n{} of {} scenarios within budget", results.len() - failed, results.len());
}
