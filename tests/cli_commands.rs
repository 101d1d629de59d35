
use e2e_harness::{NewsrunnerEnv, TestResult, find_free_port, stderr, stdout};
use serde_json::json;

/// Agent URL nothing listens on; commands here must not depend on it.
fn offline_env() -> TestResult<NewsrunnerEnv> {
    let port = find_free_port()?;
    NewsrunnerEnv::new(&format!("http://127.0.0.1:{}", port))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn help_lists_every_command() -> TestResult<()> {
    let env = offline_env()?;
    let out = env.run(&["help"]).await?;
    assert!(out.status.success());
    let text = stdout(&out);
    for cmd in [
        "run-job",
        "resume",
        "cancel-run",
        "process-articles",
        "reconcile",
        "scheduler",
        "cleanup",
        "troubleshoot",
    ] {
        assert!(text.contains(cmd), "help is missing {}", cmd);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_command_and_bad_ids_exit_non_zero() -> TestResult<()> {
    let env = offline_env()?;

    let unknown = env.run(&["frobnicate"]).await?;
    assert!(!unknown.status.success());
    assert!(stderr(&unknown).contains("Unknown command: frobnicate"));

    let missing = env.run(&["run-job"]).await?;
    assert!(!missing.status.success());
    assert!(stderr(&missing).contains("missing job id"));

    let garbage = env.run(&["resume", "abc"]).await?;
    assert!(!garbage.status.success());
    assert!(stderr(&garbage).contains("invalid run id: abc"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_run_marks_run_and_job_cancelled() -> TestResult<()> {
    let env = offline_env()?;
    let job_id = env.seed_job("Robotics").await?;
    let run_id = env.seed_running_run(job_id)?;

    let out = env.run(&["cancel-run", &run_id.to_string()]).await?;
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(stdout(&out).contains(&format!("Run {} cancelled.", run_id)));

    let run = env.query_row(
        "SELECT status, error_message, completed_at FROM job_runs WHERE id = ?1",
        run_id,
    )?;
    assert_eq!(run[0], json!("cancelled"));
    assert_eq!(run[1], json!("Cancelled by user"));
    assert!(run[2].is_string());

    let job = env.query_row("SELECT status FROM jobs WHERE id = ?1", job_id)?;
    assert_eq!(job[0], json!("cancelled"));

    let again = env.run(&["cancel-run", &run_id.to_string()]).await?;
    assert!(again.status.success());
    assert!(stdout(&again).contains("nothing to cancel"));

    let missing = env.run(&["cancel-run", "9999"]).await?;
    assert!(!missing.status.success());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn troubleshoot_dry_run_lists_problem_runs_without_agent() -> TestResult<()> {
    let env = offline_env()?;
    let job_id = env.seed_job("Robotics").await?;
    let run_id = env.seed_running_run(job_id)?;
    let cancelled = env.run(&["cancel-run", &run_id.to_string()]).await?;
    assert!(cancelled.status.success());

    let log_dir = env.data_dir().join("diag");
    let log_dir_arg = log_dir.to_string_lossy().to_string();
    let out = env
        .run(&["troubleshoot", "--dry-run", "--log-dir", &log_dir_arg])
        .await?;
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains(&format!("Run {} (Robotics)", run_id)));
    assert!(text.contains("Cancelled by user"));
    assert!(text.contains("Dry run"));
    assert!(log_dir.is_dir());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cleanup_fails_cleanly_when_agent_is_unreachable() -> TestResult<()> {
    let env = offline_env()?;
    let out = env.run(&["cleanup", "--dry-run"]).await?;
    assert!(!out.status.success());
    assert!(!stderr(&out).is_empty());
    Ok(())
}
