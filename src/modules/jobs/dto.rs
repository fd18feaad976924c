use serde::Deserialize;
use utoipa::IntoParams;
use validator::Validate;

use crate::common::error::AppError;
use crate::infrastructure::runner::JobFilter;
use crate::modules::jobs::model::JobStatus;

#[derive(Debug, Default, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct JobListQuery {
    /// Only jobs in this runner status, e.g. `COMPLETE`.
    pub status: Option<String>,
    #[validate(range(min = 1, max = 100, message = "limit must be between 1 and 100"))]
    pub limit: Option<usize>,
}

impl JobListQuery {
    pub fn into_filter(self) -> Result<JobFilter, AppError> {
        self.validate()?;
        let status = self
            .status
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse::<JobStatus>())
            .transpose()
            .map_err(AppError::Validation)?;

        Ok(JobFilter {
            status,
            limit: self.limit,
        })
    }
}
