//! Shared value types for the metrics calculation service (§3 "Data Model").

pub mod export;
pub mod ids;
pub mod job;

pub use export::{ColumnSpec, ColumnsDefinition, ExportReference, ExportType};
pub use ids::{JobId, TaskId};
pub use job::{
    JobRecord, JobStatus, JobStatusResponse, JobUpdateEvent, JobUpdateKind, Progress,
    RefDescriptor, SubmitRequest, Task, TaskStatus,
};
