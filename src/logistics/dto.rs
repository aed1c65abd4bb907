use serde::{Deserialize, Serialize};

use crate::{error::AppError, logistics::repo::ContainerRecord};

#[derive(Debug, Deserialize)]
pub struct AssignContainerRequest {
    pub inv_number: Option<i64>,
    pub container_id: Option<String>,
    #[serde(default)]
    pub delivery_notes: Option<String>,
    #[serde(default)]
    pub shipping_line: Option<String>,
}

/// `AssignContainerRequest` after validation and trimming.
#[derive(Debug, PartialEq, Eq)]
pub struct ContainerAssignment {
    pub inv_number: i64,
    pub container_id: String,
    pub delivery_notes: Option<String>,
    pub shipping_line: Option<String>,
}

fn trimmed(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl TryFrom<AssignContainerRequest> for ContainerAssignment {
    type Error = AppError;

    fn try_from(req: AssignContainerRequest) -> Result<Self, Self::Error> {
        let inv_number = match req.inv_number {
            Some(n) if n > 0 => n,
            _ => return Err(AppError::Validation("Invalid inv_number".into())),
        };
        let container_id = trimmed(req.container_id)
            .ok_or_else(|| AppError::Validation("container_id is required".into()))?;
        Ok(Self {
            inv_number,
            container_id,
            delivery_notes: trimmed(req.delivery_notes),
            shipping_line: trimmed(req.shipping_line),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct RecordsResponse {
    pub success: bool,
    pub data: Vec<ContainerRecord>,
}

#[derive(Debug, Serialize)]
pub struct RecordResponse {
    pub success: bool,
    pub data: ContainerRecord,
}
