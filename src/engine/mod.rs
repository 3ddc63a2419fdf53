pub mod assignment;
pub mod dispatch;
pub mod ingest;
pub mod normalize;
pub mod otp;
pub mod payment;
pub mod projection;
pub mod scoring;
