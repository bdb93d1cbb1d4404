use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("unknown schedule {namespace}/{name}")]
    Unknown { namespace: String, name: String },

    #[error("schedule {namespace}/{name} is not ready")]
    Pending { namespace: String, name: String },
}
