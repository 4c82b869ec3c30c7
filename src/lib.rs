pub mod models {
    pub mod telemetry;
}

pub mod client;
pub mod config;
pub mod db {
    pub mod models;
}
pub mod schema;
pub mod source;
pub mod services {
    pub mod acquisition;
    pub mod api;
    pub mod diag;
    pub mod store;
    pub mod trips;
}
