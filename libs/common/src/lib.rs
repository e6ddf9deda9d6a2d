pub mod aggregate;
pub mod id;

pub use aggregate::LaunchAggregate;
pub use id::PrefixedId;
