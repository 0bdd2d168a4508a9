//! Mapping between [`JobStatus`] and the `select_job_statuses` lookup table.
//!
//! The SMALLINT ids match the seed data order (1-based) in the table.

use specshare_core::JobStatus;

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

/// Database id for a job status.
pub fn job_status_id(status: JobStatus) -> StatusId {
    match status {
        JobStatus::Running => 1,
        JobStatus::Succeeded => 2,
        JobStatus::Failed => 3,
        JobStatus::Cancelled => 4,
    }
}

/// Job status for a database id, `None` for ids outside the seed data.
pub fn job_status_from_id(id: StatusId) -> Option<JobStatus> {
    match id {
        1 => Some(JobStatus::Running),
        2 => Some(JobStatus::Succeeded),
        3 => Some(JobStatus::Failed),
        4 => Some(JobStatus::Cancelled),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ids_match_seed_data() {
        assert_eq!(job_status_id(JobStatus::Running), 1);
        assert_eq!(job_status_id(JobStatus::Succeeded), 2);
        assert_eq!(job_status_id(JobStatus::Failed), 3);
        assert_eq!(job_status_id(JobStatus::Cancelled), 4);
    }

    #[test]
    fn ids_round_trip() {
        for status in [
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(job_status_from_id(job_status_id(status)), Some(status));
        }
    }

    #[test]
    fn unknown_id_is_none() {
        assert_eq!(job_status_from_id(0), None);
        assert_eq!(job_status_from_id(5), None);
    }
}
