pub mod diff;
pub mod error;
pub mod hlc;
pub mod identity;
pub mod ids;
pub mod model;
pub mod node;
pub mod scalar;

pub use diff::{ScalarChange, TreeDiff, apply_diff, diff};
pub use error::CoreError;
pub use hlc::Hlc;
pub use identity::{ActorIdentity, UserRole, verify_signature};
pub use ids::*;
pub use node::{EntityNode, NodeSnapshot, copy_into, same_as};
pub use scalar::ScalarValue;
