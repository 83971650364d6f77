//! Infrastructure Layer
//!
//! Radio access, publication and logging.

pub mod bluetooth;
pub mod logging;
pub mod publisher;
