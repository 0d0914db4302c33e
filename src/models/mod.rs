mod cody_gateway;
mod license;
mod subscription;

pub use cody_gateway::*;
pub use license::*;
pub use subscription::*;
