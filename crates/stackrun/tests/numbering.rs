use proptest::prelude::*;
use stackrun::workflow::reconciled_status;
use stackrun::{
  AppDeployment, AppId, Database, JobStatus, MemoryStore, ProjectId, WorkflowRun, WorkflowType,
};
use std::collections::BTreeSet;
use std::sync::Arc;

fn status_strategy() -> impl Strategy<Value = JobStatus> {
  prop_oneof![
    Just(JobStatus::Succeeded),
    Just(JobStatus::Failed),
    Just(JobStatus::Cancelled),
    Just(JobStatus::Skipped),
  ]
}

proptest! {
  // up to five contenders every loser retries after another's win, so the
  // allocation loop always settles within its retry budget
  #[test]
  fn concurrent_run_numbers_are_gap_free(workers in 1usize..=5) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let numbers = rt.block_on(async move {
      let db = Database::new(Arc::new(MemoryStore::new()));
      let project_id = ProjectId::new("p1");

      let mut handles = Vec::new();
      for _ in 0..workers {
        let db = db.clone();
        let project_id = project_id.clone();
        handles.push(tokio::spawn(async move {
          db.runs()
            .create(&project_id, WorkflowType::Deploy, None, |key| {
              WorkflowRun::new(key, "tester")
            })
            .await
            .map(|run| run.key.run_number)
        }));
      }

      let mut numbers = BTreeSet::new();
      for handle in handles {
        numbers.insert(handle.await.unwrap().unwrap());
      }
      numbers
    });

    let expected: BTreeSet<u32> = (1..=workers as u32).collect();
    prop_assert_eq!(numbers, expected);
  }

  #[test]
  fn concurrent_versions_are_gap_free(workers in 1usize..=5) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let versions = rt.block_on(async move {
      let db = Database::new(Arc::new(MemoryStore::new()));
      let project_id = ProjectId::new("p1");
      let app_id = AppId::new("web");

      let mut handles = Vec::new();
      for _ in 0..workers {
        let db = db.clone();
        let project_id = project_id.clone();
        let app_id = app_id.clone();
        handles.push(tokio::spawn(async move {
          db.deployments()
            .create_version(&project_id, &app_id, |version| {
              AppDeployment::new(project_id.clone(), app_id.clone(), version)
            })
            .await
            .map(|deployment| deployment.version)
        }));
      }

      let mut versions = BTreeSet::new();
      for handle in handles {
        versions.insert(handle.await.unwrap().unwrap());
      }
      versions
    });

    let expected: BTreeSet<u32> = (1..=workers as u32).collect();
    prop_assert_eq!(versions, expected);
  }

  #[test]
  fn reconciled_status_failed_always_wins(statuses in prop::collection::vec(status_strategy(), 1..16)) {
    let reconciled = reconciled_status(statuses.clone());

    if statuses.contains(&JobStatus::Failed) {
      prop_assert_eq!(reconciled, JobStatus::Failed);
    } else if statuses.contains(&JobStatus::Cancelled) {
      prop_assert_eq!(reconciled, JobStatus::Cancelled);
    } else {
      prop_assert_eq!(reconciled, JobStatus::Succeeded);
    }
  }
}
