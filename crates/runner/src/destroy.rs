use crate::bundle;
use crate::task::{stack_name, TaskRunner};
use stackrun::{OnOutput, Result, StackConfig, WorkflowJob};
use std::collections::HashMap;
use std::path::Path;

/// Tears down the job's app from its last successfully deployed version.
///
/// An app that was never deployed, or whose IaC bundle is gone, has nothing
/// in the cloud to remove; the job succeeds without touching the tool. A
/// finished teardown is recorded on the version's deployment history, so
/// the app stops counting as deployed.
pub(crate) async fn run_destroy(
  ctx: &TaskRunner,
  job: &WorkflowJob,
  workdir: &Path,
  on_output: OnOutput,
) -> Result<serde_json::Map<String, serde_json::Value>> {
  let project_id = &job.key.run.project_id;
  let app_id = &job.modified_app_id;

  let Some(version) = ctx.db.latest_deployed_version(project_id, app_id).await? else {
    log::warn!(
      "{}/{} was never deployed, nothing to destroy",
      project_id,
      app_id
    );
    on_output("Nothing to destroy");
    return Ok(serde_json::Map::new());
  };

  let bytes = match ctx.iac_store.get_iac(project_id, app_id, version).await {
    Ok(bytes) => bytes,
    Err(err) if err.is_not_found() => {
      log::warn!(
        "No IaC bundle for {}/{} v{}, nothing to destroy",
        project_id,
        app_id,
        version
      );
      on_output("No IaC bundle found, nothing to destroy");
      return Ok(serde_json::Map::new());
    }
    Err(err) => return Err(err),
  };

  let iac_dir = workdir.join("iac");
  std::fs::create_dir_all(&iac_dir)?;
  bundle::unzip_into(&bytes, &iac_dir)?;

  let project = ctx.db.projects().get(project_id).await?;
  let stack_config = StackConfig {
    region: project.region.clone(),
    assumed_role_arn: project.assumed_role_arn.clone(),
    state_bucket: ctx.state_bucket.clone(),
    secrets: HashMap::new(),
  };
  ctx
    .iac_tool
    .select_or_create_stack(&stack_name(project_id, app_id), &iac_dir, &stack_config)
    .await?;

  ctx.iac_tool.refresh(&iac_dir, on_output.clone()).await?;

  if let Err(err) = ctx.iac_tool.destroy(&iac_dir, on_output.clone()).await {
    if let Err(refresh_err) = ctx.iac_tool.refresh(&iac_dir, on_output.clone()).await {
      log::warn!(
        "Post-failure refresh failed for {}: {}",
        job.key,
        refresh_err
      );
    }
    return Err(err);
  }

  ctx.iac_tool.remove_stack(&iac_dir).await?;

  let mut deployment = ctx
    .db
    .deployments()
    .get(project_id, app_id, version)
    .await?;
  deployment.record_job(job.key.clone());
  ctx.db.deployments().put(&deployment).await?;

  Ok(serde_json::Map::new())
}
