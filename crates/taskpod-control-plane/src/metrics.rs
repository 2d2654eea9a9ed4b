//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::Arc;

use taskpod_core::RunState;

use crate::state::AppState;

/// Collect all metrics from AppState and format as Prometheus text.
pub async fn collect_metrics(state: &Arc<AppState>) -> String {
    let mut output = String::new();

    collect_run_metrics(state, &mut output).await;
    collect_task_metrics(state, &mut output).await;

    output
}

/// Runs by state. Every state is listed, including empty ones.
async fn collect_run_metrics(state: &Arc<AppState>, output: &mut String) {
    let counts = state.run_counts().await;

    writeln!(output, "# HELP taskpod_runs_total Number of task runs by state").ok();
    writeln!(output, "# TYPE taskpod_runs_total gauge").ok();
    for run_state in RunState::ALL {
        let count = counts.get(&run_state).copied().unwrap_or(0);
        let label = run_state.as_str().to_ascii_lowercase();
        writeln!(output, "taskpod_runs_total{{state=\"{label}\"}} {count}").ok();
    }
}

async fn collect_task_metrics(state: &Arc<AppState>, output: &mut String) {
    let registered = state.task_count().await;

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP taskpod_tasks_registered Number of registered tasks"
    )
    .ok();
    writeln!(output, "# TYPE taskpod_tasks_registered gauge").ok();
    writeln!(output, "taskpod_tasks_registered {registered}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{RunRepository, TaskRepository};
    use taskpod_core::{Parameter, ParameterType, Run, Task};

    #[tokio::test]
    async fn test_collect_metrics_empty_state() {
        let state = AppState::new();
        let output = collect_metrics(&state).await;

        for run_state in ["created", "provisioned", "queuing", "queued", "running", "finished", "failed"] {
            assert!(output.contains(&format!("taskpod_runs_total{{state=\"{run_state}\"}} 0")));
        }
        assert!(output.contains("# TYPE taskpod_runs_total gauge"));
        assert!(output.contains("taskpod_tasks_registered 0"));
    }

    #[tokio::test]
    async fn test_collect_metrics_counts() {
        let state = AppState::new();
        let task = Task::builder("ns", "1.0.0")
            .input(Parameter::new("x", ParameterType::Boolean(Default::default())))
            .build()
            .unwrap();
        state.save_task(task.clone()).await.unwrap();

        let mut failed = Run::new(task.id.clone());
        failed.transition(RunState::Failed);
        state.save_run(failed).await.unwrap();
        state.save_run(Run::new(task.id.clone())).await.unwrap();
        state.save_run(Run::new(task.id.clone())).await.unwrap();

        let output = collect_metrics(&state).await;
        assert!(output.contains("taskpod_runs_total{state=\"created\"} 2"));
        assert!(output.contains("taskpod_runs_total{state=\"failed\"} 1"));
        assert!(output.contains("taskpod_runs_total{state=\"finished\"} 0"));
        assert!(output.contains("taskpod_tasks_registered 1"));
    }
}
