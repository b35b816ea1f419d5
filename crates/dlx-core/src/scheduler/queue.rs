//! The job shape carried on the scheduler's bounded channel.

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub url: String,
    pub token: u64,
}
