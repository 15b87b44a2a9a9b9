pub mod rdns;
pub mod resolve;

pub use rdns::DnsLookup;
pub use resolve::{is_valid_hostname, is_valid_ip, is_valid_target, resolve_target};
