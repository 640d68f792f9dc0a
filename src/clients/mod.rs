mod sentinel;
mod single;

pub use sentinel::SentinelClient;
pub use single::SingleConnPool;
