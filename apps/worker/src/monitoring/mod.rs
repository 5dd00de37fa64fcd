pub mod address;
pub mod checker;
/// Monitoring engine module - handles execution of monitoring checks
///
/// This module is responsible for:
/// - Parsing target addresses into probe inputs
/// - Executing HTTP/HTTPS/FTP/SSH checks under a timeout
/// - Classifying health from recent history
/// - Driving periodic sweeps over every registered target
pub mod executor;
pub mod health;
pub mod scheduler;
pub mod types;


pub use executor::MonitoringExecutor;
pub use scheduler::MonitoringScheduler;
