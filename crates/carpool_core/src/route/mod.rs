pub mod engine;
pub mod progression;
pub mod state;

pub use engine::{RouteProgressionEngine, TickReport};
pub use progression::{advance, station_update, Advance, ProgressionParams, StationUpdate};
pub use state::{DriverRouteState, DriverRouteStates};
