// SPDX-License-Identifier: MIT

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use batchpipe::{BatchConfig, PipelineError, TaskOrchestrator};

fn main() {
    env_logger::init();

    let config = BatchConfig {
        sink_path: "cancelled_result.txt".into(),
        ..BatchConfig::default()
    };
    let orchestrator = Arc::new(TaskOrchestrator::new(config));

    println!("Submitting a batch and cancelling it mid-flight...");
    let submitter = {
        let orchestrator = Arc::clone(&orchestrator);
        thread::spawn(move || orchestrator.submit_tasks())
    };

    thread::sleep(Duration::from_millis(200));
    orchestrator.cancel_tasks();

    match submitter.join().expect("submit thread") {
        Err(PipelineError::Cancelled) => println!("Submit unblocked by the cancellation"),
        Ok(()) => println!("Batch outran the cancel and completed"),
        Err(err) => println!("Batch failed: {err}"),
    }
    println!("Buffer empty afterward: {}", orchestrator.buffer_is_empty());
}
