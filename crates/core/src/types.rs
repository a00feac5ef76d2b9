/// Opaque token the render server assigns to a submitted job.
pub type JobId = String;
