// Entity Models
//
// Each entity has:
// - A numeric identity assigned by the database
// - A wire shape (camelCase JSON) shared by the API and the client
// - A `snapshot()` of the fields recorded in audit entries

pub mod pump;
pub mod station;
pub mod user;

pub use pump::{
    validate_child_tags, ChildTagSpec, ExpectedChildTag, NewPump, Pump, PumpStatus, PumpUpdate,
};
pub use station::{GasStation, NewStation, StationStatus, StationUpdate};
pub use user::{
    hash_token, issue_token, Credentials, IssuedUser, LoginRequest, LoginResponse, NewUser, Role,
    User,
};
