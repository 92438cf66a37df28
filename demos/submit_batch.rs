// SPDX-License-Identifier: MIT

use batchpipe::{BatchConfig, TaskOrchestrator};

fn main() {
    env_logger::init();

    let config = BatchConfig::default();
    let sink = config.sink_path.clone();
    println!(
        "Submitting {} tasks ({} sub-jobs x {} draws each)...",
        config.total_tasks, config.sub_jobs_per_task, config.draws_per_sub_job
    );

    let orchestrator = TaskOrchestrator::new(config);
    match orchestrator.submit_tasks() {
        Ok(()) => println!("Batch complete, results written to {:?}", sink),
        Err(err) => eprintln!("Batch failed: {err}"),
    }
}
