pub mod analysis;
pub mod cleaning;
pub mod config;
pub mod error;
pub mod imputation;
pub mod layout;
pub mod output;
pub mod pipeline;
pub mod publish;
pub mod schema;
pub mod stats;
pub mod table;
pub mod trip;
pub mod zones;
