// SPDX-License-Identifier: MIT

use std::time::{Duration, Instant};

use batchpipe::{BatchConfig, TaskOrchestrator};

/// Benchmarks one full batch run end to end: submission, sub-job
/// fan-out, deposits, the drain, and the sink write.
///
/// # Arguments
/// * `total_tasks` - Number of top-level tasks in the batch
/// * `sub_jobs` - Parallel counting sub-jobs per task
/// * `draws` - Random draws per sub-job
///
/// # Returns
/// Duration of the batch in seconds
fn benchmark_batch(total_tasks: usize, sub_jobs: u32, draws: u32) -> f64 {
    let dir = tempfile::tempdir().expect("sink directory");
    let sink_path = dir.path().join("result.txt");

    let orchestrator = TaskOrchestrator::new(BatchConfig {
        total_tasks,
        sub_jobs_per_task: sub_jobs,
        draws_per_sub_job: draws,
        sink_path: sink_path.clone(),
        writer_stop_timeout: Duration::from_secs(10),
    });

    // Start timing.
    let start_time = Instant::now();
    orchestrator.submit_tasks().expect("batch run");
    let elapsed_time = start_time.elapsed();

    // Verify the sink holds one line per task.
    let written = std::fs::read_to_string(&sink_path).expect("sink readback");
    assert_eq!(written.lines().count(), total_tasks);

    elapsed_time.as_secs_f64()
}

fn main() {
    println!("Running benchmarks...\n");

    // Benchmark 1: Different batch sizes with the stock task shape
    println!("Benchmark 1: Scaling batch size (10 sub-jobs x 1000 draws)");
    for total_tasks in [250, 500, 1000, 2000] {
        let time = benchmark_batch(total_tasks, 10, 1000);
        println!("{:5} tasks: {:.6} seconds", total_tasks, time);
    }
    println!();

    // Benchmark 2: Different fan-out widths with a fixed batch
    println!("Benchmark 2: Scaling fan-out width (500 tasks, 1000 draws)");
    for sub_jobs in [1, 2, 5, 10, 20] {
        let time = benchmark_batch(500, sub_jobs, 1000);
        println!("{:2} sub-jobs: {:.6} seconds", sub_jobs, time);
    }
    println!();

    // Benchmark 3: Different draw counts with a fixed fan-out
    println!("Benchmark 3: Scaling draw count (500 tasks, 10 sub-jobs)");
    for draws in [250, 1000, 4000, 16000] {
        let time = benchmark_batch(500, 10, draws);
        println!("{:5} draws: {:.6} seconds", draws, time);
    }
}
