use super::WorkflowJob;
use crate::{Error, JobStatus, Result};
use std::collections::{HashMap, HashSet};

/// In-memory dependency graph of one run's jobs, keyed by job number.
///
/// The per-job dependency lists stored on the rows are a projection of this
/// graph used only for durability.
pub struct RunDag {
  /// job number -> numbers it depends on
  deps: HashMap<u32, Vec<u32>>,
}

impl RunDag {
  pub fn from_jobs(jobs: &[WorkflowJob]) -> Result<Self> {
    let numbers: HashSet<u32> = jobs.iter().map(|job| job.key.job_number).collect();
    let mut deps = HashMap::new();

    for job in jobs {
      let mut job_deps = Vec::new();
      for dep in &job.dependencies {
        if dep.run != job.key.run {
          return Err(Error::precondition(format!(
            "Job {} depends on {} from another run",
            job.key, dep
          )));
        }
        if !numbers.contains(&dep.job_number) {
          return Err(Error::precondition(format!(
            "Job {} depends on unknown job {}",
            job.key, dep.job_number
          )));
        }
        job_deps.push(dep.job_number);
      }
      deps.insert(job.key.job_number, job_deps);
    }

    let dag = RunDag { deps };
    dag.check_acyclic()?;

    Ok(dag)
  }

  fn check_acyclic(&self) -> Result<()> {
    // Kahn's algorithm; anything left over is part of a cycle.
    let mut indegree: HashMap<u32, usize> = self
      .deps
      .iter()
      .map(|(n, deps)| (*n, deps.len()))
      .collect();
    let mut queue: Vec<u32> = indegree
      .iter()
      .filter(|(_, d)| **d == 0)
      .map(|(n, _)| *n)
      .collect();
    let mut visited = 0;

    while let Some(n) = queue.pop() {
      visited += 1;
      for dependent in self.dependents_of(n) {
        if let Some(d) = indegree.get_mut(&dependent) {
          *d -= 1;
          if *d == 0 {
            queue.push(dependent);
          }
        }
      }
    }

    if visited != self.deps.len() {
      return Err(Error::precondition("Job dependencies contain a cycle"));
    }

    Ok(())
  }

  pub fn job_numbers(&self) -> Vec<u32> {
    let mut numbers: Vec<u32> = self.deps.keys().copied().collect();
    numbers.sort();
    numbers
  }

  pub fn dependencies_of(&self, job_number: u32) -> &[u32] {
    self
      .deps
      .get(&job_number)
      .map(|d| d.as_slice())
      .unwrap_or(&[])
  }

  pub fn dependents_of(&self, job_number: u32) -> Vec<u32> {
    let mut dependents: Vec<u32> = self
      .deps
      .iter()
      .filter(|(_, deps)| deps.contains(&job_number))
      .map(|(n, _)| *n)
      .collect();
    dependents.sort();
    dependents
  }

  /// Jobs whose dependencies are all `Succeeded` and which have not been
  /// dispatched yet.
  pub fn ready<F>(&self, status_of: F) -> Vec<u32>
  where
    F: Fn(u32) -> JobStatus,
  {
    let mut ready: Vec<u32> = self
      .deps
      .iter()
      .filter(|(n, deps)| {
        status_of(**n) == JobStatus::Pending
          && deps.iter().all(|d| status_of(*d) == JobStatus::Succeeded)
      })
      .map(|(n, _)| *n)
      .collect();
    ready.sort();
    ready
  }

  /// Jobs that can never become ready: some dependency is terminal but not
  /// `Succeeded`.
  pub fn blocked<F>(&self, status_of: F) -> Vec<u32>
  where
    F: Fn(u32) -> JobStatus,
  {
    let mut blocked: Vec<u32> = self
      .deps
      .iter()
      .filter(|(n, deps)| {
        status_of(**n).is_running()
          && deps.iter().any(|d| {
            let status = status_of(*d);
            status.is_terminal() && status != JobStatus::Succeeded
          })
      })
      .map(|(n, _)| *n)
      .collect();
    blocked.sort();
    blocked
  }
}
