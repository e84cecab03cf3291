//! Independent pipelines run side by side.

use rayon::prelude::*;

use crate::error::Result;

/// Run `job` over every input in parallel; results keep input order.
///
/// Each job owns its pipeline (and therefore its stores); nothing is shared
/// between jobs.
pub fn run_independent<J, R, F>(jobs: Vec<J>, job: F) -> Vec<Result<R>>
where
    J: Send,
    R: Send,
    F: Fn(J) -> Result<R> + Send + Sync,
{
    jobs.into_par_iter().map(job).collect()
}
