// API response shapes, limited to the endpoints the typed client wraps

pub mod responses;
pub mod ship;
pub mod transaction;
pub mod waypoint;

pub use responses::*;
pub use ship::*;
pub use transaction::*;
pub use waypoint::*;
