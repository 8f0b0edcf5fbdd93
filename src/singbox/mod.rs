pub mod apply;
pub mod generator;
pub mod outbound;

pub use apply::{ApplyError, ConfigApplier};
pub use generator::{generate, GeneratorOptions, DIRECT_TAG, TUN_INBOUND_TAG};
pub use outbound::{Outbound, SingBoxConfig};
