pub mod io;
pub mod metrics;
pub mod signal;

pub use metrics::*;
pub use signal::*;
