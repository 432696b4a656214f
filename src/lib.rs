pub mod car;
pub mod controller;
pub mod doorstate;
pub mod floor;
pub mod framing;
pub mod maintenance;
pub mod region;
pub mod safety;
