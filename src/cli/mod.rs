mod health;
mod load;
mod query;
mod run;
mod wipe;

pub use health::*;
pub use load::*;
pub use query::*;
pub use run::*;
pub use wipe::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
