pub mod health_record;
pub mod patient;

pub use health_record::HealthRecordService;
pub use patient::PatientService;
