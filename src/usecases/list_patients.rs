use thiserror::Error;

use crate::domain::patient::Patient;

use super::contracts::{PatientDirectory, StoreError};

const DEFAULT_PATIENT_PAGE_SIZE: usize = 50;
const MAX_PATIENT_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPatientsQuery {
    pub limit: usize,
}

impl Default for ListPatientsQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PATIENT_PAGE_SIZE,
        }
    }
}

impl ListPatientsQuery {
    fn normalized_limit(&self) -> usize {
        match self.limit {
            0 => DEFAULT_PATIENT_PAGE_SIZE,
            value if value > MAX_PATIENT_PAGE_SIZE => MAX_PATIENT_PAGE_SIZE,
            value => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPatientsOutput {
    pub patients: Vec<Patient>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListPatientsError {
    #[error("patient directory unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
}

pub async fn list_patients(
    directory: &dyn PatientDirectory,
    query: ListPatientsQuery,
) -> Result<ListPatientsOutput, ListPatientsError> {
    let limit = query.normalized_limit();
    let mut patients = directory
        .list(limit)
        .await
        .map_err(ListPatientsError::StoreUnavailable)?;

    patients.sort_by(Patient::directory_cmp);
    patients.truncate(limit);
    Ok(ListPatientsOutput { patients })
}
