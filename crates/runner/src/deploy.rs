use crate::bundle;
use crate::task::{stack_name, TaskRunner};
use stackrun::{AppId, Error, OnOutput, Result, StackConfig, WorkflowJob};
use std::collections::HashMap;
use std::path::Path;

/// Deploys the job's app at the project's currently selected version.
///
/// Builds the resource graph with the engine, exports and archives the IaC
/// project, then drives the IaC tool through refresh, preview and up. On a
/// failed up the stack state is refreshed once so the next attempt starts
/// from what actually exists.
pub(crate) async fn run_deploy(
  ctx: &TaskRunner,
  job: &WorkflowJob,
  workdir: &Path,
  on_output: OnOutput,
) -> Result<serde_json::Map<String, serde_json::Value>> {
  let project_id = &job.key.run.project_id;
  let app_id = &job.modified_app_id;

  let project = ctx.db.projects().get(project_id).await?;
  let version = project.version_of(app_id).ok_or_else(|| {
    Error::precondition(format!("App {} has no configured version", app_id))
  })?;
  let mut deployment = ctx
    .db
    .deployments()
    .get(project_id, app_id, version)
    .await?;

  let pack = ctx.registry.get(app_id).ok_or_else(|| {
    Error::config_error(format!("No stack pack registered for {}", app_id))
  })?;

  // user apps build on top of whatever the common stack last produced
  let live_state = if app_id.is_common() {
    None
  } else {
    common_live_state(ctx, project_id, workdir).await?
  };

  for hook in &ctx.hooks {
    hook
      .pre_deploy(&project, &deployment, live_state.as_deref())
      .await?;
  }

  let constraints = pack.to_constraints(&deployment.configuration, &project.region);
  pack.copy_files(&deployment.configuration, workdir)?;

  on_output("Building resource graph");
  let engine_output = ctx
    .engine
    .run(&constraints, live_state.as_deref(), workdir)
    .await?;

  if !engine_output.config_errors.is_empty() {
    let rendered = serde_json::Value::Array(engine_output.config_errors).to_string();
    return Err(Error::config_error(rendered));
  }

  let iac_dir = workdir.join("iac");
  std::fs::create_dir_all(&iac_dir)?;
  ctx
    .engine
    .export_iac(&engine_output.resources_yaml, app_id.inner(), &iac_dir)
    .await?;

  ctx
    .iac_store
    .write_iac(project_id, app_id, version, bundle::zip_dir(&iac_dir)?)
    .await?;

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
  ctx.iac_tool.preview(&iac_dir, on_output.clone()).await?;

  if let Err(err) = ctx.iac_tool.up(&iac_dir, on_output.clone()).await {
    if let Err(refresh_err) = ctx.iac_tool.refresh(&iac_dir, on_output.clone()).await {
      log::warn!(
        "Post-failure refresh failed for {}: {}",
        job.key,
        refresh_err
      );
    }
    return Err(err);
  }

  let declared = pack.declared_outputs();
  let outputs: HashMap<String, String> = ctx
    .iac_tool
    .get_outputs(&iac_dir)
    .await?
    .into_iter()
    .filter(|(key, _)| declared.contains(key))
    .collect();

  deployment.outputs = outputs.clone();
  deployment.policy = engine_output.policy;
  deployment.record_job(job.key.clone());
  ctx.db.deployments().put(&deployment).await?;

  Ok(
    outputs
      .into_iter()
      .map(|(key, value)| (key, serde_json::Value::String(value)))
      .collect(),
  )
}

/// Live state rendered from the common stack's outputs, or `None` when the
/// common stack has never finished a deploy.
async fn common_live_state(
  ctx: &TaskRunner,
  project_id: &stackrun::ProjectId,
  workdir: &Path,
) -> Result<Option<String>> {
  let common = AppId::common();
  let Some(version) = ctx.db.latest_deployed_version(project_id, &common).await? else {
    return Ok(None);
  };

  let deployment = ctx
    .db
    .deployments()
    .get(project_id, &common, version)
    .await?;
  if deployment.outputs.is_empty() {
    return Ok(None);
  }

  let state = serde_json::to_value(&deployment.outputs)
    .map_err(|err| Error::internal(format!("Failed to encode common outputs: {}", err)))?;

  Ok(Some(ctx.engine.get_live_state(&state, workdir).await?))
}
