pub mod assets;
pub mod audit;
pub mod config;
pub mod discovery;
pub mod eras;
pub mod history;
pub mod model;
pub mod paths;
pub mod pipeline;
pub mod posts;
pub mod seed;
pub mod source;
pub mod store;
pub mod transport;
pub mod util;
pub mod warn;
