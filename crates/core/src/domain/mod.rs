pub mod approval;
pub mod escalation;
pub mod practitioner;
pub mod request;
