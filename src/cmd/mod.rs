pub mod migrate;
pub mod run;

pub use migrate::{MigrateArgs, handle_migrate};
pub use run::{RunArgs, handle_run};
