//! CLI command handlers, one per file.

mod checksum;
mod completions;
mod delete;
mod list;
mod recover;
mod run;
mod status;
mod stream;
mod submit;

pub use checksum::run_checksum;
pub use completions::run_completions;
pub use delete::run_delete;
pub use list::run_list;
pub use recover::run_recover;
pub use run::run_pipeline;
pub use status::run_status;
pub use stream::run_stream;
pub use submit::run_submit;
