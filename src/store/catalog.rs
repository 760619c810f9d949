// src/store/catalog.rs

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::models::exam::ExamDefinition;
use crate::store::StoreError;

/// Read access to published exam definitions.
///
/// Exam authoring is owned by an external subsystem; the session engine only
/// needs lookup for question validation and duration. `register` exists so
/// deployments without that subsystem can publish exams over the admin API.
#[async_trait]
pub trait ExamCatalog: Send + Sync {
    async fn get(&self, exam_id: &str) -> Result<ExamDefinition, StoreError>;
    async fn register(&self, exam: ExamDefinition) -> Result<(), StoreError>;
}

/// Process-local catalog. Definitions are immutable once registered.
#[derive(Default)]
pub struct MemoryCatalog {
    exams: RwLock<HashMap<String, ExamDefinition>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExamCatalog for MemoryCatalog {
    async fn get(&self, exam_id: &str) -> Result<ExamDefinition, StoreError> {
        let exams = self.exams.read().unwrap_or_else(|e| e.into_inner());
        exams.get(exam_id).cloned().ok_or(StoreError::NotFound)
    }

    async fn register(&self, exam: ExamDefinition) -> Result<(), StoreError> {
        let mut exams = self.exams.write().unwrap_or_else(|e| e.into_inner());
        if exams.contains_key(&exam.id) {
            return Err(StoreError::AlreadyExists);
        }
        exams.insert(exam.id.clone(), exam);
        Ok(())
    }
}
