pub mod net;
pub mod time;
