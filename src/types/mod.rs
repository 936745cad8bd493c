pub mod account;
pub mod cycle;
pub mod policy;
pub mod position;
pub mod risk;
pub mod strategy;
pub mod trade;

pub use account::*;
pub use cycle::*;
pub use policy::*;
pub use position::*;
pub use risk::*;
pub use strategy::*;
pub use trade::*;
